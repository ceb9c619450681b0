use thiserror::Error;
use tonic::metadata::MetadataValue;
use tonic::{Code, Status};

/// Response metadata key naming the coordinator-side error. Lets clients
/// tell apart errors that share a status code.
pub const ERROR_KIND_KEY: &str = "x-framefarm-error";

#[derive(Error, Debug)]
pub enum FarmError {
    #[error("Worker name already registered: {0}")]
    NameTaken(String),

    #[error("Worker not registered: {0}")]
    UnknownWorker(String),

    #[error("Invalid job id: {0}")]
    InvalidJob(u64),

    #[error("Invalid frame index {index} for job {job_id}")]
    InvalidFrame { job_id: u64, index: u32 },

    #[error("Invalid frame range: end {end} is before start {start}")]
    InvalidFrameRange { start: i64, end: i64 },

    #[error("Invalid progress value: {0} (expected 0-100)")]
    InvalidProgress(u32),

    #[error("Frame {index} of job {job_id} is not held by worker {worker}")]
    StaleClaim {
        job_id: u64,
        index: u32,
        worker: String,
    },

    #[error("Frame {index} of job {job_id} has not been completed")]
    FrameNotCompleted { job_id: u64, index: u32 },

    #[error("Job queue is at capacity")]
    QueueFull,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Render failed: {0}")]
    Render(String),

    #[error("gRPC error: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FarmError {
    /// True for failures a worker should retry after a delay: the
    /// coordinator was unreachable or the call was cut short.
    pub fn is_transient(&self) -> bool {
        match self {
            FarmError::Transport(_) => true,
            FarmError::Rpc(status) => matches!(
                status.code(),
                Code::Unavailable
                    | Code::DeadlineExceeded
                    | Code::Cancelled
                    | Code::Unknown
                    | Code::ResourceExhausted
            ),
            _ => false,
        }
    }

    /// Stable name sent alongside the status code.
    pub fn kind(&self) -> &'static str {
        match self {
            FarmError::NameTaken(_) => "name-taken",
            FarmError::UnknownWorker(_) => "unknown-worker",
            FarmError::InvalidJob(_) => "invalid-job",
            FarmError::InvalidFrame { .. } => "invalid-frame",
            FarmError::InvalidFrameRange { .. } => "invalid-frame-range",
            FarmError::InvalidProgress(_) => "invalid-progress",
            FarmError::StaleClaim { .. } => "stale-claim",
            FarmError::FrameNotCompleted { .. } => "frame-not-completed",
            FarmError::QueueFull => "queue-full",
            FarmError::InvalidArgument(_) => "invalid-argument",
            FarmError::Render(_) => "render",
            FarmError::Rpc(_) => "rpc",
            FarmError::Transport(_) => "transport",
            FarmError::Io(_) => "io",
        }
    }
}

/// The error kind a coordinator attached to `status`, if any.
pub fn status_kind(status: &Status) -> Option<&str> {
    status
        .metadata()
        .get(ERROR_KIND_KEY)
        .and_then(|value| value.to_str().ok())
}

impl From<FarmError> for Status {
    fn from(err: FarmError) -> Self {
        let message = err.to_string();
        let kind = err.kind();
        let mut status = match err {
            FarmError::NameTaken(_) => Status::already_exists(message),
            FarmError::UnknownWorker(_) => Status::failed_precondition(message),
            FarmError::InvalidJob(_)
            | FarmError::InvalidFrame { .. }
            | FarmError::FrameNotCompleted { .. } => Status::not_found(message),
            FarmError::StaleClaim { .. } => Status::aborted(message),
            FarmError::InvalidFrameRange { .. }
            | FarmError::InvalidProgress(_)
            | FarmError::InvalidArgument(_) => Status::invalid_argument(message),
            FarmError::QueueFull => Status::resource_exhausted(message),
            FarmError::Rpc(status) => return status,
            FarmError::Render(_) | FarmError::Transport(_) | FarmError::Io(_) => {
                Status::internal(message)
            }
        };
        status
            .metadata_mut()
            .insert(ERROR_KIND_KEY, MetadataValue::from_static(kind));
        status
    }
}

pub type Result<T> = std::result::Result<T, FarmError>;
