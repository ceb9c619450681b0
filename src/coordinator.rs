use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::CoordinatorConfig;
use crate::error::{FarmError, Result};
use crate::proto::JobDescriptor;
use crate::scheduler::assigner;
use crate::scheduler::{Job, JobQueue, WorkerRegistry};

/// Shared coordinator state: the worker registry and the job/frame store.
///
/// Each lives behind its own read/write lock. Operations that need both
/// always lock the registry first and the jobs second, so worker removal
/// and frame claims cannot deadlock against each other.
pub struct Coordinator {
    config: CoordinatorConfig,
    registry: Arc<RwLock<WorkerRegistry>>,
    jobs: Arc<RwLock<JobQueue>>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            registry: Arc::new(RwLock::new(WorkerRegistry::new(config.worker_timeout()))),
            jobs: Arc::new(RwLock::new(JobQueue::with_limits(
                config.max_jobs,
                config.max_frames_per_job,
            ))),
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Read access to the job store for queries.
    pub fn jobs(&self) -> &Arc<RwLock<JobQueue>> {
        &self.jobs
    }

    /// Read access to the worker registry for queries.
    pub fn registry(&self) -> &Arc<RwLock<WorkerRegistry>> {
        &self.registry
    }

    pub async fn submit_job(
        &self,
        start: i64,
        end: i64,
        renderer: String,
        input: Vec<u8>,
    ) -> Result<u64> {
        self.jobs.write().await.submit(start, end, renderer, input)
    }

    pub async fn register_worker(&self, name: &str) -> Result<()> {
        self.registry.write().await.register(name)
    }

    /// Remove a worker and reclaim its unfinished frames. Unknown names are
    /// accepted so that retried unregistrations stay harmless.
    pub async fn unregister_worker(&self, name: &str) -> usize {
        let mut registry = self.registry.write().await;
        let mut jobs = self.jobs.write().await;
        registry.unregister(name);
        jobs.release_worker(name)
    }

    /// Descriptor of the first open job, or `None` when there is nothing
    /// left to hand out. Job selection is advisory: the frame claim that
    /// follows re-checks availability.
    pub async fn request_job(&self, name: &str) -> Result<Option<JobDescriptor>> {
        let mut registry = self.registry.write().await;
        registry.touch(name)?;
        let jobs = self.jobs.read().await;
        Ok(assigner::next_open_job(&jobs).map(job_descriptor))
    }

    /// Claim the next free frame of `job_id` for `name`.
    ///
    /// The registry lock is held across the claim so a concurrent reap can
    /// never leave a frame assigned to a worker that is no longer registered.
    pub async fn request_frame(&self, job_id: u64, name: &str) -> Result<Option<u32>> {
        let mut registry = self.registry.write().await;
        registry.touch(name)?;
        let mut jobs = self.jobs.write().await;
        assigner::claim_frame(&mut jobs, job_id, name)
    }

    pub async fn report_progress(
        &self,
        job_id: u64,
        index: u32,
        name: &str,
        progress: u32,
    ) -> Result<()> {
        let mut registry = self.registry.write().await;
        registry.touch(name)?;
        let mut jobs = self.jobs.write().await;
        jobs.report_progress(job_id, index, name, progress)?;
        tracing::debug!(job_id, frame = index, worker = name, progress, "Progress reported");
        Ok(())
    }

    /// Store a finished frame. Returns whether the whole job is complete.
    pub async fn upload_frame(
        &self,
        job_id: u64,
        index: u32,
        name: &str,
        data: Vec<u8>,
    ) -> Result<bool> {
        let mut registry = self.registry.write().await;
        registry.touch(name)?;
        let mut jobs = self.jobs.write().await;
        jobs.complete_frame(job_id, index, name, data)?;

        let complete = jobs.is_complete(job_id);
        if complete {
            tracing::info!(job_id, "Job complete");
        }
        Ok(complete)
    }

    /// Rendered output of a completed frame.
    pub async fn fetch_frame(&self, job_id: u64, index: u32) -> Result<(i64, Vec<u8>)> {
        let jobs = self.jobs.read().await;
        let job = jobs.get_job(job_id).ok_or(FarmError::InvalidJob(job_id))?;
        let frame = job
            .frame(index)
            .ok_or(FarmError::InvalidFrame { job_id, index })?;
        let data = frame
            .output()
            .ok_or(FarmError::FrameNotCompleted { job_id, index })?;
        Ok((job.frame_number(index), data.to_vec()))
    }

    /// Remove every worker silent for longer than the configured timeout
    /// and return their frames to the pool.
    pub async fn reap_stale(&self, now: Instant) -> Vec<String> {
        let mut registry = self.registry.write().await;
        let stale = registry.remove_stale(now);
        if stale.is_empty() {
            return stale;
        }

        let mut jobs = self.jobs.write().await;
        for name in &stale {
            let reclaimed = jobs.release_worker(name);
            tracing::info!(worker = %name, reclaimed, "Reaped stale worker");
        }
        stale
    }

    /// Run [`reap_stale`](Self::reap_stale) on a fixed interval until
    /// `shutdown` is cancelled.
    pub fn spawn_reaper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let period = self.config.reap_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Reaper stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        coordinator.reap_stale(Instant::now()).await;
                    }
                }
            }
        })
    }
}

pub fn job_descriptor(job: &Job) -> JobDescriptor {
    JobDescriptor {
        id: job.id,
        start: job.start,
        end: job.end,
        renderer: job.renderer.clone(),
        file: job.input.clone(),
    }
}
