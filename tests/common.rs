//! tests/common.rs
//! Shared helper functions for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing_subscriber::fmt::TestWriter;
use triggerkeeper::{error::BuildError, PriorityQueueType, Task, TriggerKeeper};

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  // Use try_init to avoid panic if called multiple times
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_writer(TestWriter::new())
    .with_test_writer()
    .try_init();
}

// Builds a scheduler instance with specified parameters.
pub fn build_scheduler(
  max_concurrency: usize,
  pq_type: PriorityQueueType,
) -> Result<TriggerKeeper, BuildError> {
  TriggerKeeper::builder()
    .max_concurrency(max_concurrency)
    .priority_queue(pq_type)
    .build()
}

// Every queue backend compiled into this build.
pub fn queue_types() -> Vec<PriorityQueueType> {
  vec![
    PriorityQueueType::BinaryHeap,
    #[cfg(feature = "priority_queue_handle_based")]
    PriorityQueueType::HandleBased,
  ]
}

// A task that increments a counter, optionally sleeps, and then succeeds.
pub fn task_counter(counter: Arc<AtomicUsize>, delay: StdDuration) -> Task {
  Task::from_fn(move || {
    let ctr = counter.clone();
    async move {
      let count = ctr.fetch_add(1, Ordering::SeqCst) + 1;
      tracing::debug!("Counter job executing (Count: {})", count);
      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }
      Ok(())
    }
  })
}

// A task that sets a flag after sleeping for `delay`.
pub fn task_flag(flag: Arc<AtomicBool>, delay: StdDuration) -> Task {
  Task::from_fn(move || {
    let flg = flag.clone();
    async move {
      tracing::debug!("Flag job executing");
      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }
      flg.store(true, Ordering::SeqCst);
      tracing::debug!("Flag job set flag to true");
      Ok(())
    }
  })
}

// A task that always fails with `"failure #N"`, N being the 1-based attempt number.
pub fn task_failing(attempts: Arc<AtomicUsize>) -> Task {
  Task::from_fn(move || {
    let attempts = attempts.clone();
    async move {
      let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
      tracing::debug!("Failing job executing (Attempt: {})", attempt);
      Err(format!("failure #{}", attempt).into())
    }
  })
}

// A task that records the scheduler-clock instant of every start.
pub fn task_start_recorder(starts: Arc<Mutex<Vec<Instant>>>, succeeds: bool) -> Task {
  Task::from_fn(move || {
    let starts = starts.clone();
    async move {
      starts.lock().push(Instant::now());
      if succeeds {
        Ok(())
      } else {
        Err("recorded failure".into())
      }
    }
  })
}

// A task that appends `label` to a shared execution log.
pub fn task_order_log(log: Arc<Mutex<Vec<String>>>, label: &str) -> Task {
  let label = label.to_string();
  Task::from_fn(move || {
    let log = log.clone();
    let label = label.clone();
    async move {
      log.lock().push(label);
      Ok(())
    }
  })
}

// A task that panics.
pub fn task_panic() -> Task {
  Task::from_fn(|| async {
    tracing::debug!("Panic job executing...");
    tokio::task::yield_now().await;
    panic!("Job forced panic!");
    #[allow(unreachable_code)]
    Ok(())
  })
}

// A task for concurrency testing.
// Increments active count on start, decrements on end. Updates max observed.
pub fn task_concurrency_tracker(
  active_counter: Arc<AtomicUsize>,
  max_observed_active: Arc<AtomicUsize>,
  started: Arc<AtomicUsize>,
  delay: StdDuration,
) -> Task {
  Task::from_fn(move || {
    let active = active_counter.clone();
    let max_obs = max_observed_active.clone();
    let started = started.clone();
    async move {
      started.fetch_add(1, Ordering::SeqCst);
      let current_active = active.fetch_add(1, Ordering::SeqCst) + 1;
      tracing::debug!("Concurrency job START (Active: {})", current_active);

      max_obs.fetch_max(current_active, Ordering::SeqCst);

      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }

      let current_active_after = active.fetch_sub(1, Ordering::SeqCst) - 1;
      tracing::debug!("Concurrency job END (Active: {})", current_active_after);
      Ok(())
    }
  })
}
