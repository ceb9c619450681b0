use std::collections::BTreeMap;

use crate::config::DEFAULT_MAX_FRAMES_PER_JOB;
use crate::error::{FarmError, Result};
use crate::scheduler::job::{Frame, Job};

const DEFAULT_MAX_JOBS: usize = 10_000;

/// Holds every submitted job, keyed by id. Iteration order is submission
/// order because ids are handed out monotonically.
#[derive(Debug)]
pub struct JobQueue {
    jobs: BTreeMap<u64, Job>,
    next_id: u64,
    max_jobs: usize,
    max_frames_per_job: u32,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self::with_limits(max_jobs, DEFAULT_MAX_FRAMES_PER_JOB)
    }

    pub fn with_limits(max_jobs: usize, max_frames_per_job: u32) -> Self {
        Self {
            jobs: BTreeMap::new(),
            next_id: 1,
            max_jobs,
            max_frames_per_job,
        }
    }

    /// Create a job for `start..=end` and return its id.
    pub fn submit(
        &mut self,
        start: i64,
        end: i64,
        renderer: impl Into<String>,
        input: Vec<u8>,
    ) -> Result<u64> {
        let renderer = renderer.into();
        if renderer.trim().is_empty() {
            return Err(FarmError::InvalidArgument(
                "renderer cannot be empty".to_string(),
            ));
        }
        if self.is_full() {
            return Err(FarmError::QueueFull);
        }
        if end < start {
            return Err(FarmError::InvalidFrameRange { start, end });
        }
        let frames = i128::from(end) - i128::from(start) + 1;
        if frames > i128::from(self.max_frames_per_job) {
            return Err(FarmError::InvalidArgument(format!(
                "frame range {}..={} spans {} frames, limit is {}",
                start, end, frames, self.max_frames_per_job
            )));
        }

        // The id is only consumed once the job exists
        let id = self.next_id;
        let job = Job::new(id, start, end, renderer, input)?;
        self.next_id += 1;
        tracing::info!(
            job_id = id,
            start,
            end,
            frames = job.frame_count(),
            renderer = %job.renderer,
            "Job submitted"
        );
        self.jobs.insert(id, job);
        Ok(id)
    }

    pub fn get_job(&self, id: u64) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub(crate) fn get_job_mut(&mut self, id: u64) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    pub fn get_frame(&self, id: u64, index: u32) -> Option<&Frame> {
        self.jobs.get(&id).and_then(|job| job.frame(index))
    }

    pub fn is_open(&self, id: u64) -> bool {
        self.jobs.get(&id).is_some_and(Job::is_open)
    }

    pub fn is_complete(&self, id: u64) -> bool {
        self.jobs.get(&id).is_some_and(Job::is_complete)
    }

    /// All jobs in submission order
    pub fn all_jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// `(job_id, frame_index)` of every incomplete frame held by `worker`
    pub fn frames_for_worker(&self, worker: &str) -> Vec<(u64, u32)> {
        self.jobs
            .values()
            .flat_map(|job| job.frames().iter())
            .filter(|f| !f.is_completed() && f.is_held_by(worker))
            .map(|f| (f.job_id, f.index))
            .collect()
    }

    /// Record a progress report from `worker`.
    ///
    /// Reports for completed frames are accepted and ignored. Reports for a
    /// frame the worker no longer holds are rejected as stale.
    pub fn report_progress(
        &mut self,
        job_id: u64,
        index: u32,
        worker: &str,
        progress: u32,
    ) -> Result<()> {
        let frame = self.frame_for_update(job_id, index)?;
        if progress > 100 {
            return Err(FarmError::InvalidProgress(progress));
        }
        if frame.is_completed() {
            return Ok(());
        }
        if !frame.is_held_by(worker) {
            return Err(stale(job_id, index, worker));
        }
        frame.record_progress(progress as u8);
        Ok(())
    }

    /// Store the rendered output of a frame held by `worker` and mark it
    /// completed.
    ///
    /// A repeated upload by the worker that completed the frame is
    /// acknowledged without touching the stored output.
    pub fn complete_frame(
        &mut self,
        job_id: u64,
        index: u32,
        worker: &str,
        data: Vec<u8>,
    ) -> Result<()> {
        let frame = self.frame_for_update(job_id, index)?;
        if !frame.is_held_by(worker) {
            return Err(stale(job_id, index, worker));
        }
        if frame.is_completed() {
            tracing::debug!(job_id, frame = index, worker, "Duplicate upload ignored");
            return Ok(());
        }
        let bytes = data.len();
        frame.complete(data);
        tracing::info!(job_id, frame = index, worker, bytes, "Frame completed");
        Ok(())
    }

    /// Return every incomplete frame held by `worker` to the pool.
    /// Returns the number of frames released.
    pub fn release_worker(&mut self, worker: &str) -> usize {
        let mut released = 0;
        for job in self.jobs.values_mut() {
            for frame in job.frames_mut() {
                if frame.is_held_by(worker) && frame.release() {
                    tracing::info!(job_id = frame.job_id, frame = frame.index, worker, "Frame reclaimed");
                    released += 1;
                }
            }
        }
        released
    }

    fn frame_for_update(&mut self, job_id: u64, index: u32) -> Result<&mut Frame> {
        self.jobs
            .get_mut(&job_id)
            .ok_or(FarmError::InvalidJob(job_id))?
            .frame_mut(index)
            .ok_or(FarmError::InvalidFrame { job_id, index })
    }

    /// Returns the current number of jobs
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.max_jobs
    }
}

fn stale(job_id: u64, index: u32, worker: &str) -> FarmError {
    tracing::warn!(job_id, frame = index, worker, "Rejected update for frame not held by worker");
    FarmError::StaleClaim {
        job_id,
        index,
        worker: worker.to_string(),
    }
}
