use chrono::{DateTime, Utc};

use crate::error::{FarmError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Pending,
    Assigned,
    Completed,
}

impl std::fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameStatus::Pending => write!(f, "pending"),
            FrameStatus::Assigned => write!(f, "assigned"),
            FrameStatus::Completed => write!(f, "completed"),
        }
    }
}

/// One unit of work within a job: a single output image.
#[derive(Debug, Clone)]
pub struct Frame {
    pub job_id: u64,
    pub index: u32,
    assigned_worker: Option<String>,
    progress: u8,
    output: Option<Vec<u8>>,
    completed_at: Option<DateTime<Utc>>,
}

impl Frame {
    fn new(job_id: u64, index: u32) -> Self {
        Self {
            job_id,
            index,
            assigned_worker: None,
            progress: 0,
            output: None,
            completed_at: None,
        }
    }

    pub fn assigned_worker(&self) -> Option<&str> {
        self.assigned_worker.as_deref()
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn output(&self) -> Option<&[u8]> {
        self.output.as_deref()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_completed(&self) -> bool {
        self.output.is_some()
    }

    pub fn is_assigned(&self) -> bool {
        self.assigned_worker.is_some()
    }

    /// Free frames may be claimed by any worker.
    pub fn is_free(&self) -> bool {
        !self.is_completed() && !self.is_assigned()
    }

    pub fn is_held_by(&self, worker: &str) -> bool {
        self.assigned_worker.as_deref() == Some(worker)
    }

    pub fn status(&self) -> FrameStatus {
        if self.is_completed() {
            FrameStatus::Completed
        } else if self.is_assigned() {
            FrameStatus::Assigned
        } else {
            FrameStatus::Pending
        }
    }

    pub(crate) fn claim(&mut self, worker: &str) {
        debug_assert!(self.is_free());
        self.assigned_worker = Some(worker.to_string());
        self.progress = 0;
    }

    /// Progress only moves forward while the frame stays assigned.
    pub(crate) fn record_progress(&mut self, progress: u8) {
        if !self.is_completed() {
            self.progress = self.progress.max(progress.min(100));
        }
    }

    pub(crate) fn complete(&mut self, data: Vec<u8>) {
        self.output = Some(data);
        self.progress = 100;
        self.completed_at = Some(Utc::now());
    }

    /// Return an incomplete frame to the pool. Completed frames keep their
    /// output and assignment.
    pub(crate) fn release(&mut self) -> bool {
        if self.is_completed() || !self.is_assigned() {
            return false;
        }
        self.assigned_worker = None;
        self.progress = 0;
        true
    }
}

/// A render job spanning the contiguous frame range `start..=end`.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: u64,
    pub start: i64,
    pub end: i64,
    pub renderer: String,
    pub input: Vec<u8>,
    pub created_at: DateTime<Utc>,
    frames: Vec<Frame>,
}

impl Job {
    pub fn new(id: u64, start: i64, end: i64, renderer: String, input: Vec<u8>) -> Result<Self> {
        if end < start {
            return Err(FarmError::InvalidFrameRange { start, end });
        }
        let count = u32::try_from(i128::from(end) - i128::from(start) + 1).map_err(|_| {
            FarmError::InvalidArgument(format!("frame range {}..={} is too large", start, end))
        })?;

        Ok(Self {
            id,
            start,
            end,
            renderer,
            input,
            created_at: Utc::now(),
            frames: (0..count).map(|index| Frame::new(id, index)).collect(),
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame(&self, index: u32) -> Option<&Frame> {
        self.frames.get(index as usize)
    }

    pub(crate) fn frame_mut(&mut self, index: u32) -> Option<&mut Frame> {
        self.frames.get_mut(index as usize)
    }

    pub(crate) fn frames_mut(&mut self) -> impl Iterator<Item = &mut Frame> {
        self.frames.iter_mut()
    }

    /// Absolute frame number of a job-relative index.
    pub fn frame_number(&self, index: u32) -> i64 {
        self.start + i64::from(index)
    }

    pub fn completed_count(&self) -> usize {
        self.frames.iter().filter(|f| f.is_completed()).count()
    }

    pub fn assigned_count(&self) -> usize {
        self.frames
            .iter()
            .filter(|f| f.status() == FrameStatus::Assigned)
            .count()
    }

    /// A job is open while at least one frame is neither completed nor assigned.
    pub fn is_open(&self) -> bool {
        self.frames.iter().any(Frame::is_free)
    }

    pub fn is_complete(&self) -> bool {
        self.frames.iter().all(Frame::is_completed)
    }
}
