pub mod assigner;
pub mod job;
pub mod queue;
pub mod registry;

pub use job::{Frame, FrameStatus, Job};
pub use queue::JobQueue;
pub use registry::{WorkerRegistry, WorkerState};
