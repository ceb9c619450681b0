//! gRPC client used by worker agents to talk to the coordinator.

use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};

use crate::config::AgentConfig;
use crate::error::{status_kind, FarmError, Result};
use crate::proto::frame_coordinator_client::FrameCoordinatorClient;
use crate::proto::{
    JobDescriptor, RegisterWorkerRequest, ReportProgressRequest, RequestFrameRequest,
    RequestJobRequest, UnregisterWorkerRequest, UploadFrameRequest,
};

/// Thin wrapper over the generated client that turns status codes back
/// into [`FarmError`] variants the agent can branch on.
///
/// The channel connects lazily, so constructing a client never fails on an
/// unreachable coordinator; the first call reports it as a transport error.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    inner: FrameCoordinatorClient<Channel>,
    worker_name: String,
}

impl CoordinatorClient {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let endpoint = Endpoint::from_shared(config.coordinator_url.clone())
            .map_err(|e| {
                FarmError::InvalidArgument(format!(
                    "invalid coordinator url {}: {e}",
                    config.coordinator_url
                ))
            })?
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms));

        let inner = FrameCoordinatorClient::new(endpoint.connect_lazy())
            .max_decoding_message_size(config.max_message_bytes)
            .max_encoding_message_size(config.max_message_bytes);

        Ok(Self {
            inner,
            worker_name: config.worker_name.clone(),
        })
    }

    /// Returns the coordinator's worker timeout.
    pub async fn register(&mut self) -> Result<Duration> {
        let response = self
            .inner
            .register_worker(RegisterWorkerRequest {
                name: self.worker_name.clone(),
            })
            .await
            .map_err(|s| map_status(s, &self.worker_name, None))?
            .into_inner();
        Ok(Duration::from_millis(response.worker_timeout_ms))
    }

    /// Returns the number of frames the coordinator reclaimed.
    pub async fn unregister(&mut self) -> Result<u32> {
        let response = self
            .inner
            .unregister_worker(UnregisterWorkerRequest {
                name: self.worker_name.clone(),
            })
            .await
            .map_err(|s| map_status(s, &self.worker_name, None))?
            .into_inner();
        Ok(response.reclaimed_frames)
    }

    pub async fn request_job(&mut self) -> Result<Option<JobDescriptor>> {
        let response = self
            .inner
            .request_job(RequestJobRequest {
                name: self.worker_name.clone(),
            })
            .await
            .map_err(|s| map_status(s, &self.worker_name, None))?
            .into_inner();
        Ok(response.job)
    }

    pub async fn request_frame(&mut self, job_id: u64) -> Result<Option<u32>> {
        let response = self
            .inner
            .request_frame(RequestFrameRequest {
                job_id,
                worker_name: self.worker_name.clone(),
            })
            .await
            .map_err(|s| map_status(s, &self.worker_name, Some((job_id, None))))?
            .into_inner();
        Ok(response.frame_index)
    }

    pub async fn report_progress(&mut self, job_id: u64, index: u32, progress: u8) -> Result<()> {
        self.inner
            .report_progress(ReportProgressRequest {
                job_id,
                frame_index: index,
                worker_name: self.worker_name.clone(),
                progress: u32::from(progress),
            })
            .await
            .map_err(|s| map_status(s, &self.worker_name, Some((job_id, Some(index)))))?;
        Ok(())
    }

    /// Returns whether the coordinator considers the job complete.
    pub async fn upload_frame(&mut self, job_id: u64, index: u32, data: Vec<u8>) -> Result<bool> {
        let response = self
            .inner
            .upload_frame(UploadFrameRequest {
                job_id,
                frame_index: index,
                worker_name: self.worker_name.clone(),
                data,
            })
            .await
            .map_err(|s| map_status(s, &self.worker_name, Some((job_id, Some(index)))))?
            .into_inner();
        Ok(response.job_complete)
    }
}

/// Translate a coordinator status into the error the agent acts on.
/// `target` is the job and frame the request referred to, if any.
pub(crate) fn map_status(
    status: Status,
    worker: &str,
    target: Option<(u64, Option<u32>)>,
) -> FarmError {
    match (status.code(), target) {
        (Code::AlreadyExists, _) => FarmError::NameTaken(worker.to_string()),
        (Code::FailedPrecondition, _) => FarmError::UnknownWorker(worker.to_string()),
        (Code::Aborted, Some((job_id, Some(index)))) => FarmError::StaleClaim {
            job_id,
            index,
            worker: worker.to_string(),
        },
        (Code::NotFound, Some((job_id, Some(index))))
            if status_kind(&status) == Some("invalid-frame") =>
        {
            FarmError::InvalidFrame { job_id, index }
        }
        (Code::NotFound, Some((job_id, _))) => FarmError::InvalidJob(job_id),
        (Code::InvalidArgument, _) => FarmError::InvalidArgument(status.message().to_string()),
        _ => FarmError::Rpc(status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_lease_errors() {
        assert!(matches!(
            map_status(Status::already_exists("taken"), "w1", None),
            FarmError::NameTaken(name) if name == "w1"
        ));
        assert!(matches!(
            map_status(Status::failed_precondition("gone"), "w1", Some((3, Some(0)))),
            FarmError::UnknownWorker(name) if name == "w1"
        ));
    }

    #[test]
    fn maps_claim_errors_with_context() {
        let err = map_status(Status::aborted("held elsewhere"), "w2", Some((5, Some(4))));
        assert!(matches!(
            err,
            FarmError::StaleClaim { job_id: 5, index: 4, ref worker } if worker == "w2"
        ));

        let err = map_status(Status::not_found("Invalid job id: 9"), "w2", Some((9, None)));
        assert!(matches!(err, FarmError::InvalidJob(9)));

        let err = map_status(
            Status::from(FarmError::InvalidFrame { job_id: 9, index: 12 }),
            "w2",
            Some((9, Some(12))),
        );
        assert!(matches!(err, FarmError::InvalidFrame { job_id: 9, index: 12 }));

        // Without the kind the message text is not consulted
        let err = map_status(
            Status::not_found("Invalid frame index 12 for job 9"),
            "w2",
            Some((9, Some(12))),
        );
        assert!(matches!(err, FarmError::InvalidJob(9)));

        let err = map_status(
            Status::from(FarmError::InvalidJob(9)),
            "w2",
            Some((9, Some(12))),
        );
        assert!(matches!(err, FarmError::InvalidJob(9)));
    }

    #[test]
    fn transient_codes_stay_transient() {
        let err = map_status(Status::unavailable("connection refused"), "w", None);
        assert!(err.is_transient());
    }

    #[test]
    fn rejects_malformed_url() {
        let config = AgentConfig::new("not a url", "w");
        assert!(matches!(
            CoordinatorClient::new(&config),
            Err(FarmError::InvalidArgument(_))
        ));
    }
}
