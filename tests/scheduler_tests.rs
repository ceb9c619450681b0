use std::collections::HashSet;
use std::time::{Duration, Instant};

use framefarm::error::FarmError;
use framefarm::scheduler::assigner::{claim_frame, claim_next, next_open_job};
use framefarm::scheduler::{FrameStatus, JobQueue, WorkerRegistry};

fn submit(queue: &mut JobQueue, start: i64, end: i64) -> u64 {
    queue.submit(start, end, "CYCLES", b"x".to_vec()).unwrap()
}

#[test]
fn test_frame_count_matches_range() {
    let mut queue = JobQueue::new();
    for (start, end) in [(1, 1), (1, 3), (-5, 5), (100, 349), (0, 0)] {
        let id = submit(&mut queue, start, end);
        let job = queue.get_job(id).unwrap();
        assert_eq!(job.frame_count() as i64, end - start + 1);

        for (i, frame) in job.frames().iter().enumerate() {
            assert_eq!(frame.index, i as u32);
            assert_eq!(frame.job_id, id);
            assert_eq!(frame.status(), FrameStatus::Pending);
            assert_eq!(frame.progress(), 0);
            assert_eq!(job.frame_number(frame.index), start + i as i64);
        }
    }
}

#[test]
fn test_job_ids_are_unique_and_increasing() {
    let mut queue = JobQueue::new();
    let ids: Vec<u64> = (0..5).map(|_| submit(&mut queue, 1, 2)).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(queue.len(), 5);
}

#[test]
fn test_reversed_range_is_rejected() {
    let mut queue = JobQueue::new();
    let err = queue.submit(10, 9, "CYCLES", Vec::new()).unwrap_err();
    assert!(matches!(err, FarmError::InvalidFrameRange { start: 10, end: 9 }));
    assert!(queue.is_empty());
}

#[test]
fn test_queue_capacity() {
    let mut queue = JobQueue::with_capacity(2);
    submit(&mut queue, 1, 1);
    submit(&mut queue, 1, 1);
    assert!(queue.is_full());
    assert!(matches!(
        queue.submit(1, 1, "CYCLES", Vec::new()),
        Err(FarmError::QueueFull)
    ));
}

#[test]
fn test_oversized_range_is_rejected_before_allocation() {
    let mut queue = JobQueue::new();
    let err = queue
        .submit(0, i64::from(u32::MAX) - 1, "CYCLES", Vec::new())
        .unwrap_err();
    assert!(matches!(err, FarmError::InvalidArgument(_)));

    let err = queue.submit(i64::MIN, i64::MAX, "CYCLES", Vec::new()).unwrap_err();
    assert!(matches!(err, FarmError::InvalidArgument(_)));
    assert!(queue.is_empty());
}

#[test]
fn test_frame_limit_is_inclusive() {
    let mut queue = JobQueue::with_limits(10, 5);
    let id = queue.submit(1, 5, "CYCLES", Vec::new()).unwrap();
    assert_eq!(queue.get_job(id).unwrap().frame_count(), 5);
    assert!(matches!(
        queue.submit(1, 6, "CYCLES", Vec::new()),
        Err(FarmError::InvalidArgument(_))
    ));
}

#[test]
fn test_rejected_submissions_do_not_consume_ids() {
    let mut queue = JobQueue::with_limits(10, 5);
    let first = queue.submit(1, 1, "CYCLES", Vec::new()).unwrap();
    assert!(queue.submit(1, 100, "CYCLES", Vec::new()).is_err());
    assert!(queue.submit(5, 4, "CYCLES", Vec::new()).is_err());
    assert!(queue.submit(1, 1, " ", Vec::new()).is_err());
    let second = queue.submit(1, 1, "CYCLES", Vec::new()).unwrap();
    assert_eq!(second, first + 1);
}

#[test]
fn test_claims_are_exclusive_and_exhaustive() {
    let mut queue = JobQueue::new();
    let id = submit(&mut queue, 1, 10);

    let mut seen = HashSet::new();
    for i in 0..10 {
        let worker = format!("w{}", i % 3);
        let index = claim_frame(&mut queue, id, &worker).unwrap().unwrap();
        assert!(seen.insert(index), "frame {index} handed out twice");
    }
    assert_eq!(claim_frame(&mut queue, id, "late").unwrap(), None);
    assert!(!queue.is_open(id));
    assert!(!queue.is_complete(id));
}

#[test]
fn test_claim_unknown_job() {
    let mut queue = JobQueue::new();
    assert!(matches!(
        claim_frame(&mut queue, 99, "w"),
        Err(FarmError::InvalidJob(99))
    ));
}

#[test]
fn test_next_open_job_skips_fully_assigned_jobs() {
    let mut queue = JobQueue::new();
    let first = submit(&mut queue, 1, 1);
    let second = submit(&mut queue, 1, 2);

    assert_eq!(next_open_job(&queue).map(|j| j.id), Some(first));
    claim_frame(&mut queue, first, "a").unwrap();
    assert_eq!(next_open_job(&queue).map(|j| j.id), Some(second));

    assert_eq!(claim_next(&mut queue, "b"), Some((second, 0)));
    assert_eq!(claim_next(&mut queue, "b"), Some((second, 1)));
    assert!(next_open_job(&queue).is_none());
}

#[test]
fn test_progress_rules() {
    let mut queue = JobQueue::new();
    let id = submit(&mut queue, 1, 2);
    let index = claim_frame(&mut queue, id, "a").unwrap().unwrap();

    queue.report_progress(id, index, "a", 40).unwrap();
    // Lower values never move progress backwards
    queue.report_progress(id, index, "a", 20).unwrap();
    assert_eq!(queue.get_frame(id, index).unwrap().progress(), 40);

    assert!(matches!(
        queue.report_progress(id, index, "a", 101),
        Err(FarmError::InvalidProgress(101))
    ));
    assert!(matches!(
        queue.report_progress(id, index, "b", 50),
        Err(FarmError::StaleClaim { .. })
    ));
    assert!(matches!(
        queue.report_progress(id, 7, "a", 50),
        Err(FarmError::InvalidFrame { index: 7, .. })
    ));
    assert!(matches!(
        queue.report_progress(42, 0, "a", 50),
        Err(FarmError::InvalidJob(42))
    ));
}

#[test]
fn test_completion_is_monotonic() {
    let mut queue = JobQueue::new();
    let id = submit(&mut queue, 1, 1);
    let index = claim_frame(&mut queue, id, "a").unwrap().unwrap();

    queue.complete_frame(id, index, "a", b"png".to_vec()).unwrap();
    let frame = queue.get_frame(id, index).unwrap();
    assert!(frame.is_completed());
    assert_eq!(frame.progress(), 100);
    assert!(frame.completed_at().is_some());

    // Late progress is accepted and ignored
    queue.report_progress(id, index, "a", 10).unwrap();
    assert_eq!(queue.get_frame(id, index).unwrap().progress(), 100);

    // Duplicate upload keeps the first output
    queue.complete_frame(id, index, "a", b"other".to_vec()).unwrap();
    assert_eq!(queue.get_frame(id, index).unwrap().output(), Some(&b"png"[..]));

    // Reclamation never touches completed frames
    assert_eq!(queue.release_worker("a"), 0);
    assert!(queue.get_frame(id, index).unwrap().is_completed());

    // Another worker cannot overwrite it
    assert!(matches!(
        queue.complete_frame(id, index, "b", b"x".to_vec()),
        Err(FarmError::StaleClaim { .. })
    ));
    assert!(queue.is_complete(id));
}

#[test]
fn test_release_worker_reclaims_only_its_frames() {
    let mut queue = JobQueue::new();
    let id = submit(&mut queue, 1, 4);
    claim_frame(&mut queue, id, "a").unwrap();
    claim_frame(&mut queue, id, "b").unwrap();
    claim_frame(&mut queue, id, "a").unwrap();
    queue.report_progress(id, 0, "a", 60).unwrap();

    assert_eq!(queue.frames_for_worker("a"), vec![(id, 0), (id, 2)]);
    assert_eq!(queue.release_worker("a"), 2);

    let frame = queue.get_frame(id, 0).unwrap();
    assert_eq!(frame.status(), FrameStatus::Pending);
    assert_eq!(frame.progress(), 0);
    assert!(frame.assigned_worker().is_none());
    assert!(queue.get_frame(id, 1).unwrap().is_held_by("b"));
    assert!(queue.frames_for_worker("a").is_empty());

    // The reclaimed frames are handed out again, lowest index first
    assert_eq!(claim_frame(&mut queue, id, "c").unwrap(), Some(0));
    assert_eq!(claim_frame(&mut queue, id, "c").unwrap(), Some(2));
}

#[test]
fn test_registry_lease_lifecycle() {
    let mut registry = WorkerRegistry::new(Duration::from_secs(300));
    registry.register("a").unwrap();
    registry.register("b").unwrap();
    assert!(matches!(registry.register("a"), Err(FarmError::NameTaken(_))));
    assert!(matches!(
        registry.touch("ghost"),
        Err(FarmError::UnknownWorker(_))
    ));

    let now = Instant::now();
    assert!(registry.stale_workers(now).is_empty());

    let later = now + Duration::from_secs(301);
    let mut stale = registry.remove_stale(later);
    stale.sort();
    assert_eq!(stale, vec!["a".to_string(), "b".to_string()]);
    assert!(registry.is_empty());

    // A reaped name may register again
    registry.register("a").unwrap();
    assert!(registry.contains("a"));
}
