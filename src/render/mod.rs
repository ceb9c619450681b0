//! Rendering capability used by the worker agent.
//!
//! The agent hands a [`RenderRequest`] to a [`RenderBackend`] and gets the
//! encoded frame back. Backends publish progress (0-100) on a watch channel
//! while they work; the agent samples it on its reporting interval.
//!
//! - [`BlenderRenderer`]: runs `blender -b` as a subprocess
//! - [`progress`]: log-line parsers for the supported engines

pub mod blender;
pub mod progress;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;

pub use blender::BlenderRenderer;

/// One frame to render.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub job_id: u64,
    /// Engine identifier, e.g. `CYCLES` or `BLENDER_RENDER`.
    pub renderer: String,
    /// First frame number of the job.
    pub start_frame: i64,
    /// Zero-based offset of this frame from `start_frame`.
    pub frame_offset: u32,
    /// Serialized scene.
    pub input: Vec<u8>,
}

impl RenderRequest {
    pub fn frame_number(&self) -> i64 {
        self.start_frame + i64::from(self.frame_offset)
    }
}

#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub data: Vec<u8>,
    pub elapsed: Duration,
}

#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Render one frame. Progress updates go to `progress`; dropping the
    /// returned future must abandon the render.
    async fn render(
        &self,
        request: RenderRequest,
        progress: watch::Sender<u8>,
    ) -> Result<RenderOutput>;
}
