//! tests/cancel.rs
//! Tests for job lineage cancellation with both queue backends, and forgetting ended lineages.

mod common;

use common::{build_scheduler, queue_types, setup_tracing, task_counter, task_failing};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use tracing::info;
use triggerkeeper::{
  EnhancedJobRequest, JobStatus, PriorityQueueType, QueryError, TriggerKeeper,
};
use uuid::Uuid;

#[tokio::test(start_paused = true)]
async fn test_cancel_before_first_run() {
  setup_tracing();
  for pq_type in queue_types() {
    let scheduler = build_scheduler(1, pq_type).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    let job_id = scheduler
      .submit_enhanced(
        EnhancedJobRequest::new(StdDuration::from_millis(1000)).with_name("Cancel Me"),
        task_counter(counter.clone(), StdDuration::ZERO),
      )
      .unwrap();

    scheduler.cancel_job(job_id).expect("cancel should succeed");

    let details = scheduler.job_details(job_id).unwrap();
    assert!(details.is_cancelled);
    assert_eq!(details.status, JobStatus::Cancelled);
    assert!(details.next_run_instance.is_none());

    match pq_type {
      PriorityQueueType::BinaryHeap => {
        // Discarded lazily once it reaches the head.
        assert_eq!(scheduler.queued_len(), 1);
      }
      #[cfg(feature = "priority_queue_handle_based")]
      PriorityQueueType::HandleBased => {
        assert_eq!(scheduler.queued_len(), 0);
        assert_eq!(scheduler.metrics_snapshot().jobs_instance_discarded_cancelled, 1);
      }
    }

    tokio::time::sleep(StdDuration::from_millis(3000)).await;

    info!("Cancelled job ran {} times ({:?})", counter.load(Ordering::SeqCst), pq_type);
    assert_eq!(counter.load(Ordering::SeqCst), 0, "cancelled job must never run");
    assert_eq!(scheduler.queued_len(), 0);

    let metrics = scheduler.metrics_snapshot();
    assert_eq!(metrics.jobs_lineage_cancelled, 1);
    assert_eq!(metrics.jobs_instance_discarded_cancelled, 1);
    assert!(scheduler.task_statistics(job_id).is_none());

    scheduler.shutdown().await.unwrap();
  }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_basic_repeats() {
  setup_tracing();
  for pq_type in queue_types() {
    let scheduler = build_scheduler(1, pq_type).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    let job_id = scheduler
      .submit(StdDuration::from_millis(100), task_counter(counter.clone(), StdDuration::ZERO))
      .unwrap();

    tokio::time::sleep(StdDuration::from_millis(250)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    scheduler.cancel_job(job_id).unwrap();
    tokio::time::sleep(StdDuration::from_millis(500)).await;

    assert_eq!(counter.load(Ordering::SeqCst), 2, "no runs after cancellation");
    assert_eq!(scheduler.job_details(job_id).unwrap().status, JobStatus::Cancelled);
    assert_eq!(scheduler.queued_len(), 0);

    scheduler.shutdown().await.unwrap();
  }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_running_prevents_next_cycle() {
  setup_tracing();
  let scheduler = build_scheduler(1, PriorityQueueType::BinaryHeap).unwrap();
  let counter = Arc::new(AtomicUsize::new(0));

  // Runs from 100 ms to 600 ms.
  let job_id = scheduler
    .submit_enhanced(
      EnhancedJobRequest::new(StdDuration::from_millis(100)),
      task_counter(counter.clone(), StdDuration::from_millis(500)),
    )
    .unwrap();

  tokio::time::sleep(StdDuration::from_millis(300)).await;
  assert_eq!(counter.load(Ordering::SeqCst), 1);
  scheduler.cancel_job(job_id).unwrap();

  tokio::time::sleep(StdDuration::from_millis(1000)).await;

  assert_eq!(counter.load(Ordering::SeqCst), 1, "running instance finishes but is not repeated");
  let details = scheduler.job_details(job_id).unwrap();
  assert_eq!(details.status, JobStatus::Cancelled);
  assert_eq!(details.executions, 1);
  assert!(details.next_run_instance.is_none());
  assert_eq!(scheduler.queued_len(), 0);

  let stats = scheduler.task_statistics(job_id).unwrap();
  assert_eq!(stats.success_count, 1);

  scheduler.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_is_idempotent_and_checks_ids() {
  setup_tracing();
  let scheduler = build_scheduler(1, PriorityQueueType::BinaryHeap).unwrap();
  let counter = Arc::new(AtomicUsize::new(0));

  let job_id = scheduler
    .submit(StdDuration::from_secs(1), task_counter(counter, StdDuration::ZERO))
    .unwrap();

  scheduler.cancel_job(job_id).unwrap();
  scheduler.cancel_job(job_id).expect("second cancel is not an error");
  assert_eq!(scheduler.metrics_snapshot().jobs_lineage_cancelled, 1);

  let unknown = Uuid::new_v4();
  assert_eq!(scheduler.cancel_job(unknown), Err(QueryError::JobNotFound(unknown)));
  assert_eq!(scheduler.job_details(unknown), Err(QueryError::JobNotFound(unknown)));

  scheduler.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_ended_lineages_beyond_retention_are_forgotten() {
  setup_tracing();
  for pq_type in queue_types() {
    let scheduler = TriggerKeeper::builder()
      .max_concurrency(1)
      .priority_queue(pq_type)
      .ended_job_retention(1)
      .build()
      .unwrap();
    let failures = Arc::new(AtomicUsize::new(0));
    let ticks = Arc::new(AtomicUsize::new(0));

    // Fails permanently at 100 ms.
    let failed = scheduler
      .submit_enhanced(
        EnhancedJobRequest::new(StdDuration::from_millis(100)).with_name("failed"),
        task_failing(failures.clone()),
      )
      .unwrap();
    let ticker = scheduler
      .submit(StdDuration::from_millis(100), task_counter(ticks.clone(), StdDuration::ZERO))
      .unwrap();

    tokio::time::sleep(StdDuration::from_millis(250)).await;
    assert_eq!(scheduler.job_details(failed).unwrap().status, JobStatus::Failed);
    assert!(scheduler.task_statistics(failed).is_some());

    // A second ended lineage pushes the failed one out.
    scheduler.cancel_job(ticker).unwrap();
    assert_eq!(scheduler.job_details(failed), Err(QueryError::JobNotFound(failed)));
    assert!(scheduler.task_statistics(failed).is_none());
    assert!(!scheduler.all_task_statistics().contains_key(&failed));
    assert_eq!(scheduler.list_jobs().len(), 1);

    let cancelled = scheduler.job_details(ticker).unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    let ticks_at_cancel = ticks.load(Ordering::SeqCst);
    assert_eq!(ticks_at_cancel, 2);

    tokio::time::sleep(StdDuration::from_millis(500)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), ticks_at_cancel, "cancelled lineage stays stopped");
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.queued_len(), 0, "lazily discarded or removed by now");

    scheduler.shutdown().await.unwrap();
  }
}
