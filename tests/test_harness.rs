//! Test harness for coordinator and worker integration tests.
//!
//! Starts an in-process coordinator on an ephemeral port and provides a
//! scripted render backend, so agents can run end to end without Blender.

#![allow(dead_code)]

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use framefarm::config::{AgentConfig, BackoffConfig, CoordinatorConfig};
use framefarm::coordinator::Coordinator;
use framefarm::error::{FarmError, Result};
use framefarm::grpc::GrpcServer;
use framefarm::render::{RenderBackend, RenderOutput, RenderRequest};

/// Coordinator config with short leases for faster tests
pub fn test_coordinator_config() -> CoordinatorConfig {
    CoordinatorConfig::new("127.0.0.1:0".parse().unwrap())
        .with_worker_timeout_ms(2_000)
        .with_reap_interval_ms(100)
}

/// Agent config that polls and reports quickly
pub fn test_agent_config(url: &str, name: &str) -> AgentConfig {
    let mut config = AgentConfig::new(url, name)
        .with_backoff(BackoffConfig::fixed(20))
        .with_progress_interval_ms(20);
    config.connect_timeout_ms = 500;
    config.request_timeout_ms = 2_000;
    config
}

/// Handle to a running in-process coordinator
pub struct TestCoordinator {
    pub coordinator: Arc<Coordinator>,
    pub url: String,
    shutdown: CancellationToken,
    server_handle: JoinHandle<()>,
    reaper_handle: JoinHandle<()>,
}

impl TestCoordinator {
    pub async fn start() -> Self {
        Self::start_with(test_coordinator_config()).await
    }

    pub async fn start_with(config: CoordinatorConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = CancellationToken::new();
        let coordinator = Arc::new(Coordinator::new(config));
        let reaper_handle = coordinator.spawn_reaper(shutdown.clone());

        let server = GrpcServer::new(coordinator.clone());
        let token = shutdown.clone();
        let server_handle = tokio::spawn(async move {
            if let Err(e) = server.run_with_listener(listener, token).await {
                eprintln!("test coordinator failed: {e}");
            }
        });

        Self {
            coordinator,
            url: format!("http://{addr}"),
            shutdown,
            server_handle,
            reaper_handle,
        }
    }

    pub fn agent_config(&self, name: &str) -> AgentConfig {
        test_agent_config(&self.url, name)
    }

    pub async fn submit(&self, start: i64, end: i64) -> u64 {
        self.coordinator
            .submit_job(start, end, "CYCLES".to_string(), b"scene".to_vec())
            .await
            .unwrap()
    }

    pub async fn is_complete(&self, job_id: u64) -> bool {
        self.coordinator.jobs().read().await.is_complete(job_id)
    }

    pub async fn worker_count(&self) -> usize {
        self.coordinator.registry().read().await.len()
    }

    /// Stop serving and wait for the server and reaper to exit
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        let _ = (&mut self.server_handle).await;
        let _ = (&mut self.reaper_handle).await;
    }
}

impl Drop for TestCoordinator {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.server_handle.abort();
        self.reaper_handle.abort();
    }
}

/// Bytes a scripted render produces for a frame
pub fn scripted_output(job_id: u64, frame_number: i64) -> Vec<u8> {
    format!("job-{job_id}-frame-{frame_number}").into_bytes()
}

/// Render backend that walks through fixed progress steps and returns
/// deterministic bytes, without spawning any process.
#[derive(Clone)]
pub struct ScriptedRenderer {
    steps: Vec<u8>,
    step_delay: Duration,
    fail_frames: Arc<HashSet<i64>>,
    rendered: Arc<AtomicUsize>,
    frames: Arc<Mutex<Vec<(u64, i64)>>>,
}

impl ScriptedRenderer {
    pub fn new(step_delay: Duration) -> Self {
        Self {
            steps: vec![10, 40, 70, 100],
            step_delay,
            fail_frames: Arc::new(HashSet::new()),
            rendered: Arc::new(AtomicUsize::new(0)),
            frames: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail when asked to render any of these frame numbers
    pub fn failing_on(mut self, frames: impl IntoIterator<Item = i64>) -> Self {
        self.fail_frames = Arc::new(frames.into_iter().collect());
        self
    }

    pub fn render_count(&self) -> usize {
        self.rendered.load(Ordering::SeqCst)
    }

    /// `(job_id, frame_number)` of every finished render, in order
    pub fn rendered_frames(&self) -> Vec<(u64, i64)> {
        self.frames.lock().unwrap().clone()
    }
}

#[async_trait]
impl RenderBackend for ScriptedRenderer {
    async fn render(
        &self,
        request: RenderRequest,
        progress: watch::Sender<u8>,
    ) -> Result<RenderOutput> {
        let frame_number = request.frame_number();
        let started = tokio::time::Instant::now();

        for step in &self.steps {
            tokio::time::sleep(self.step_delay).await;
            if self.fail_frames.contains(&frame_number) {
                return Err(FarmError::Render(format!(
                    "scripted failure on frame {frame_number}"
                )));
            }
            progress.send_replace(*step);
        }

        self.rendered.fetch_add(1, Ordering::SeqCst);
        self.frames
            .lock()
            .unwrap()
            .push((request.job_id, frame_number));

        Ok(RenderOutput {
            data: scripted_output(request.job_id, frame_number),
            elapsed: started.elapsed(),
        })
    }
}

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout_duration: Duration, poll_interval: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(20)).await;
    assert!(result, "{}", message);
}
