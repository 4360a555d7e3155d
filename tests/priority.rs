//! tests/priority.rs
//! Priority ordering among due jobs, early wake-up on offer, the repeat policies and the
//! independence of basic jobs from enhanced priorities.

mod common;

use common::{queue_types, setup_tracing, task_counter, task_order_log};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use parking_lot::Mutex;
use tracing::info;
use triggerkeeper::{EnhancedJobRequest, JobStatus, PriorityQueueType, RepeatPolicy, TriggerKeeper};

#[tokio::test(start_paused = true)]
async fn test_lower_level_runs_first_among_due_jobs() {
  setup_tracing();
  for pq_type in queue_types() {
    let scheduler = TriggerKeeper::builder()
      .max_concurrency(1)
      .priority_queue(pq_type)
      .build()
      .unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    // Submitted in reverse priority order with identical delays.
    for (name, level) in [("p5", 5), ("p3", 3), ("p1", 1)] {
      scheduler
        .submit_enhanced(
          EnhancedJobRequest::new(StdDuration::from_millis(100))
            .with_name(name)
            .with_priority(level),
          task_order_log(log.clone(), name),
        )
        .unwrap();
    }

    tokio::time::sleep(StdDuration::from_millis(150)).await;

    let order = log.lock().clone();
    info!("Execution order for {:?}: {:?}", pq_type, order);
    assert_eq!(order, vec!["p1", "p3", "p5"]);

    scheduler.shutdown().await.unwrap();
  }
}

#[tokio::test(start_paused = true)]
async fn test_equal_priority_runs_in_submission_order() {
  setup_tracing();
  let scheduler = TriggerKeeper::builder()
    .max_concurrency(1)
    .priority_queue(PriorityQueueType::BinaryHeap)
    .build()
    .unwrap();
  let log = Arc::new(Mutex::new(Vec::new()));

  for name in ["a", "b", "c", "d"] {
    scheduler
      .submit_enhanced(
        EnhancedJobRequest::new(StdDuration::from_millis(100)).with_name(name),
        task_order_log(log.clone(), name),
      )
      .unwrap();
  }

  tokio::time::sleep(StdDuration::from_millis(150)).await;
  assert_eq!(log.lock().clone(), vec!["a", "b", "c", "d"]);

  scheduler.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_new_offer_wakes_parked_dispatcher() {
  setup_tracing();
  for wake_on_offer in [true, false] {
    let scheduler = TriggerKeeper::builder()
      .max_concurrency(2)
      .priority_queue(PriorityQueueType::BinaryHeap)
      .wake_on_offer(wake_on_offer)
      .build()
      .unwrap();
    let distant = Arc::new(AtomicUsize::new(0));
    let urgent = Arc::new(AtomicUsize::new(0));

    scheduler
      .submit(StdDuration::from_secs(10), task_counter(distant.clone(), StdDuration::ZERO))
      .unwrap();
    // Let the dispatcher park on the distant head.
    tokio::time::sleep(StdDuration::from_millis(100)).await;

    scheduler
      .submit(StdDuration::from_millis(100), task_counter(urgent.clone(), StdDuration::ZERO))
      .unwrap();
    tokio::time::sleep(StdDuration::from_millis(400)).await;

    let urgent_runs = urgent.load(Ordering::SeqCst);
    info!(wake_on_offer, urgent_runs, "Urgent job runs after 500 ms");
    if wake_on_offer {
      assert!(urgent_runs >= 1, "urgent job should run without waiting for the distant head");
    } else {
      assert_eq!(urgent_runs, 0, "parked dispatcher should only look again at the head's due time");
    }

    tokio::time::sleep(StdDuration::from_millis(10_000)).await;
    assert!(urgent.load(Ordering::SeqCst) >= 1);
    assert!(distant.load(Ordering::SeqCst) >= 1);

    scheduler.shutdown().await.unwrap();
  }
}

#[tokio::test(start_paused = true)]
async fn test_success_promotes_higher_priority_head() {
  setup_tracing();
  for policy in [RepeatPolicy::OwnCycle, RepeatPolicy::PromoteHigherPriorityHead] {
    let scheduler = TriggerKeeper::builder()
      .max_concurrency(2)
      .priority_queue(PriorityQueueType::BinaryHeap)
      .repeat_policy(policy)
      .build()
      .unwrap();
    let low_runs = Arc::new(AtomicUsize::new(0));
    let high_runs = Arc::new(AtomicUsize::new(0));

    // Runs from 100 ms to 200 ms.
    let low = scheduler
      .submit_enhanced(
        EnhancedJobRequest::new(StdDuration::from_millis(100))
          .with_name("low")
          .with_priority(5),
        task_counter(low_runs.clone(), StdDuration::from_millis(100)),
      )
      .unwrap();

    // Becomes the queue head while `low` is running.
    tokio::time::sleep(StdDuration::from_millis(150)).await;
    let high = scheduler
      .submit_enhanced(
        EnhancedJobRequest::new(StdDuration::from_secs(10))
          .with_name("high")
          .with_priority(0),
        task_counter(high_runs.clone(), StdDuration::ZERO),
      )
      .unwrap();

    tokio::time::sleep(StdDuration::from_millis(350)).await;

    let low_details = scheduler.job_details(low).unwrap();
    assert_eq!(low_runs.load(Ordering::SeqCst), 1);
    let high_details = scheduler.job_details(high).unwrap();

    match policy {
      RepeatPolicy::OwnCycle => {
        assert!(low_details.next_run_instance.is_some(), "own repeat should be queued");
        assert_eq!(low_details.status, JobStatus::Pending);
        assert_eq!(scheduler.queued_len(), 2);
      }
      RepeatPolicy::PromoteHigherPriorityHead => {
        assert!(low_details.next_run_instance.is_none(), "lineage ends when the head is promoted");
        assert_eq!(low_details.status, JobStatus::Completed);
        assert!(high_details.next_run_instance.is_some());
        // The original head instance plus the promoted cycle.
        assert_eq!(scheduler.queued_len(), 2);
      }
    }
    assert_eq!(high_runs.load(Ordering::SeqCst), 0);

    scheduler.shutdown().await.unwrap();
  }
}

#[tokio::test(start_paused = true)]
async fn test_basic_job_is_not_held_behind_distant_enhanced_head() {
  setup_tracing();
  for pq_type in queue_types() {
    for wake_on_offer in [true, false] {
      let scheduler = TriggerKeeper::builder()
        .max_concurrency(1)
        .priority_queue(pq_type)
        .wake_on_offer(wake_on_offer)
        .build()
        .unwrap();
      let urgent_runs = Arc::new(AtomicUsize::new(0));
      let ticks = Arc::new(AtomicUsize::new(0));

      // Top priority, but only due in an hour.
      let urgent = scheduler
        .submit_enhanced(
          EnhancedJobRequest::new(StdDuration::from_secs(3600))
            .with_name("urgent")
            .with_priority(0),
          task_counter(urgent_runs.clone(), StdDuration::ZERO),
        )
        .unwrap();
      tokio::time::sleep(StdDuration::from_millis(10)).await;
      scheduler
        .submit(StdDuration::from_millis(100), task_counter(ticks.clone(), StdDuration::ZERO))
        .unwrap();

      tokio::time::sleep(StdDuration::from_millis(50)).await;
      assert_eq!(ticks.load(Ordering::SeqCst), 0, "not before its delay");

      tokio::time::sleep(StdDuration::from_millis(10_000)).await;
      let tick_count = ticks.load(Ordering::SeqCst);
      info!(?pq_type, wake_on_offer, tick_count, "Basic firings in 10 s");
      assert!(tick_count >= 99, "basic job fired only {} times", tick_count);
      assert_eq!(urgent_runs.load(Ordering::SeqCst), 0);
      assert!(scheduler.job_details(urgent).unwrap().next_run_instance.is_some());
      assert_eq!(scheduler.queued_len(), 2);

      scheduler.shutdown().await.unwrap();
    }
  }
}
