//! Worker side of the render farm.
//!
//! A worker agent runs on every render node:
//! - **Registration**: announces itself by name and keeps its lease alive
//! - **Pull loop**: asks for a job, then claims that job's frames one at a time
//! - **Rendering**: hands each frame to a [`RenderBackend`](crate::render::RenderBackend)
//!   and streams progress back while it runs
//!
//! # Components
//!
//! - [`WorkerAgent`]: the pull-protocol state machine
//! - [`CoordinatorClient`]: typed wrapper over the generated gRPC client
//! - [`Backoff`]: exponential delays for idle polling and retries
//!
//! # Failure handling
//!
//! Transient RPC failures are retried with backoff. A lost lease (the
//! coordinator reaped this worker) leads to a fresh registration. A frame
//! that was handed to someone else is dropped. A failed render stops the
//! agent after unregistering, which returns its frame to the pool.

pub mod agent;
pub mod backoff;
pub mod client;

pub use agent::{AgentState, AgentSummary, WorkerAgent};
pub use backoff::Backoff;
pub use client::CoordinatorClient;
