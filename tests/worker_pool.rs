//! tests/worker_pool.rs
//! Blocking job bodies and the dedicated worker pool. These run on real time.

mod common;

use common::setup_tracing;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use parking_lot::Mutex;
use triggerkeeper::{
  EnhancedJobRequest, JobStatus, PriorityQueueType, Task, TriggerKeeper, WorkerPoolConfig,
};

async fn wait_for(mut condition: impl FnMut() -> bool, limit: StdDuration) -> bool {
  let deadline = tokio::time::Instant::now() + limit;
  while tokio::time::Instant::now() < deadline {
    if condition() {
      return true;
    }
    tokio::time::sleep(StdDuration::from_millis(10)).await;
  }
  condition()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_body_runs() {
  setup_tracing();
  let scheduler = TriggerKeeper::builder()
    .max_concurrency(2)
    .priority_queue(PriorityQueueType::BinaryHeap)
    .build()
    .unwrap();
  let runs = Arc::new(AtomicUsize::new(0));

  let task = {
    let runs = runs.clone();
    Task::blocking(move || {
      std::thread::sleep(StdDuration::from_millis(5));
      runs.fetch_add(1, Ordering::SeqCst);
      Ok(())
    })
  };
  let job_id = scheduler
    .submit_enhanced(EnhancedJobRequest::new(StdDuration::from_millis(20)), task)
    .unwrap();

  assert!(
    wait_for(|| runs.load(Ordering::SeqCst) >= 2, StdDuration::from_secs(5)).await,
    "blocking job should repeat"
  );
  let stats = scheduler.task_statistics(job_id).unwrap();
  assert!(stats.success_count >= 2);

  scheduler.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_body_times_out() {
  setup_tracing();
  let scheduler = TriggerKeeper::builder()
    .max_concurrency(1)
    .execution_timeout(StdDuration::from_millis(50))
    .priority_queue(PriorityQueueType::BinaryHeap)
    .build()
    .unwrap();

  let job_id = scheduler
    .submit_enhanced(
      EnhancedJobRequest::new(StdDuration::from_millis(10)),
      Task::blocking(|| {
        std::thread::sleep(StdDuration::from_millis(300));
        Ok(())
      }),
    )
    .unwrap();

  let failed = wait_for(
    || {
      scheduler
        .job_details(job_id)
        .map(|d| d.status == JobStatus::Failed)
        .unwrap_or(false)
    },
    StdDuration::from_secs(5),
  )
  .await;
  assert!(failed, "blocking job should be classified as timed out");

  let details = scheduler.job_details(job_id).unwrap();
  assert_eq!(details.last_error.as_deref(), Some("Task Timeout"));
  assert_eq!(scheduler.admission_gate().in_use(), 0);

  scheduler.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dedicated_pool_runs_bodies_on_named_threads() {
  setup_tracing();
  let pool = WorkerPoolConfig {
    core_threads: 1,
    max_threads: 2,
    keep_alive: StdDuration::from_secs(1),
  };
  let scheduler = TriggerKeeper::builder()
    .max_concurrency(2)
    .priority_queue(PriorityQueueType::BinaryHeap)
    .worker_pool(pool.clone())
    .build()
    .unwrap();
  assert_eq!(scheduler.config().worker_pool, Some(pool));

  let thread_names = Arc::new(Mutex::new(Vec::new()));

  let async_task = {
    let names = thread_names.clone();
    Task::from_fn(move || {
      let names = names.clone();
      async move {
        names.lock().push(std::thread::current().name().map(str::to_string));
        Ok(())
      }
    })
  };
  let blocking_task = {
    let names = thread_names.clone();
    Task::blocking(move || {
      names.lock().push(std::thread::current().name().map(str::to_string));
      Ok(())
    })
  };

  scheduler
    .submit_enhanced(EnhancedJobRequest::new(StdDuration::from_millis(20)), async_task)
    .unwrap();
  scheduler
    .submit(StdDuration::from_millis(20), blocking_task)
    .unwrap();

  assert!(
    wait_for(|| thread_names.lock().len() >= 4, StdDuration::from_secs(5)).await,
    "both jobs should run on the dedicated pool"
  );
  for name in thread_names.lock().iter() {
    let name = name.clone().unwrap_or_default();
    assert!(name.starts_with("enhanced-task-"), "unexpected thread: {}", name);
  }

  scheduler.shutdown().await.unwrap();
}
