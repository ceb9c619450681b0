//! First-fit work assignment.
//!
//! Jobs are served strictly in submission order and frames within a job
//! lowest index first. Every function here takes the job queue by `&mut`,
//! so a scan and the claim it leads to always happen inside the same write
//! lock: two concurrent claims against one job can never observe the same
//! free frame.

use crate::error::{FarmError, Result};
use crate::scheduler::job::Job;
use crate::scheduler::queue::JobQueue;

/// First job, in submission order, with a frame that is neither completed
/// nor assigned.
pub fn next_open_job(queue: &JobQueue) -> Option<&Job> {
    queue.all_jobs().find(|job| job.is_open())
}

/// Claim the lowest-index free frame of `job_id` for `worker`.
///
/// Returns `Ok(None)` when every frame is either completed or held.
pub fn claim_frame(queue: &mut JobQueue, job_id: u64, worker: &str) -> Result<Option<u32>> {
    let job = queue
        .get_job_mut(job_id)
        .ok_or(FarmError::InvalidJob(job_id))?;

    let claimed = job.frames_mut().find(|f| f.is_free()).map(|frame| {
        frame.claim(worker);
        frame.index
    });

    if let Some(index) = claimed {
        tracing::info!(job_id, frame = index, worker, "Frame assigned");
    }
    Ok(claimed)
}

/// Pick the first open job and claim its first free frame in one step.
pub fn claim_next(queue: &mut JobQueue, worker: &str) -> Option<(u64, u32)> {
    let job_id = next_open_job(queue)?.id;
    // The job was open under the same borrow, so the claim cannot miss
    claim_frame(queue, job_id, worker)
        .ok()
        .flatten()
        .map(|index| (job_id, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with_job(start: i64, end: i64) -> (JobQueue, u64) {
        let mut queue = JobQueue::new();
        let id = queue.submit(start, end, "CYCLES", b"x".to_vec()).unwrap();
        (queue, id)
    }

    #[test]
    fn claims_lowest_free_index() {
        let (mut queue, id) = queue_with_job(1, 3);
        assert_eq!(claim_frame(&mut queue, id, "a").unwrap(), Some(0));
        assert_eq!(claim_frame(&mut queue, id, "b").unwrap(), Some(1));
        assert_eq!(queue.get_frame(id, 0).unwrap().assigned_worker(), Some("a"));
        assert_eq!(queue.get_frame(id, 1).unwrap().assigned_worker(), Some("b"));
    }

    #[test]
    fn exhausted_job_returns_none() {
        let (mut queue, id) = queue_with_job(1, 1);
        assert_eq!(claim_frame(&mut queue, id, "a").unwrap(), Some(0));
        assert_eq!(claim_frame(&mut queue, id, "b").unwrap(), None);
    }

    #[test]
    fn unknown_job_is_invalid() {
        let mut queue = JobQueue::new();
        assert!(matches!(
            claim_frame(&mut queue, 99, "a"),
            Err(FarmError::InvalidJob(99))
        ));
    }

    #[test]
    fn next_open_job_is_fifo() {
        let mut queue = JobQueue::new();
        let first = queue.submit(1, 1, "CYCLES", Vec::new()).unwrap();
        let second = queue.submit(1, 2, "CYCLES", Vec::new()).unwrap();

        assert_eq!(next_open_job(&queue).map(|j| j.id), Some(first));
        claim_frame(&mut queue, first, "a").unwrap();
        assert_eq!(next_open_job(&queue).map(|j| j.id), Some(second));
    }

    #[test]
    fn claim_next_walks_jobs_in_order() {
        let mut queue = JobQueue::new();
        let first = queue.submit(1, 1, "CYCLES", Vec::new()).unwrap();
        let second = queue.submit(10, 11, "CYCLES", Vec::new()).unwrap();

        assert_eq!(claim_next(&mut queue, "a"), Some((first, 0)));
        assert_eq!(claim_next(&mut queue, "a"), Some((second, 0)));
        assert_eq!(claim_next(&mut queue, "b"), Some((second, 1)));
        assert_eq!(claim_next(&mut queue, "b"), None);
    }

    #[test]
    fn released_frame_is_claimed_again_before_higher_indices() {
        let (mut queue, id) = queue_with_job(1, 3);
        claim_frame(&mut queue, id, "a").unwrap();
        claim_frame(&mut queue, id, "b").unwrap();
        assert_eq!(queue.release_worker("a"), 1);
        assert_eq!(claim_frame(&mut queue, id, "c").unwrap(), Some(0));
    }
}
