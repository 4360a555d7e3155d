//! demos/retry_failure.rs
//!
//! Demonstrates the retry mechanism of enhanced jobs: a job that fails twice, is retried with
//! exponential backoff, and then succeeds; and a job that never succeeds and ends as `Failed`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use triggerkeeper::{task_fn, EnhancedJobRequest, JobStatus, MaxRetries, TriggerKeeper};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  // --- Setup Tracing ---
  let filter = tracing_subscriber::EnvFilter::try_new(
    "warn,triggerkeeper=info,retry_failure=trace", // Trace demo execution
  )
  .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();

  // --- Build Scheduler ---
  info!("Building scheduler...");
  let scheduler = TriggerKeeper::builder()
    .max_concurrency(1) // One slot to keep attempts sequential
    .execution_timeout(Duration::from_secs(2))
    .build()?;
  info!("Scheduler built.");

  // --- Shared State ---
  let execution_attempts = Arc::new(AtomicUsize::new(0));
  let max_retries: MaxRetries = 2;
  let succeed_on_attempt = max_retries as usize + 1; // Attempt numbers are 1-based

  // --- Flaky job: fails twice, then succeeds ---
  // Attempts at ~200 ms, ~600 ms (+400) and ~1400 ms (+800).
  let flaky_id = scheduler.submit_enhanced(
    EnhancedJobRequest::new(Duration::from_millis(200))
      .with_name("Retry Failing Job")
      .with_max_retries(max_retries),
    task_fn! {
      { let attempts = execution_attempts.clone(); }
      {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt < succeed_on_attempt {
          warn!("Attempt {} failing on purpose.", attempt);
          return Err(format!("attempt {} failed", attempt).into());
        }
        info!("Attempt {} succeeded.", attempt);
        Ok(())
      }
    },
  )?;

  // --- Hopeless job: exhausts its retries ---
  let hopeless_id = scheduler.submit_enhanced(
    EnhancedJobRequest::new(Duration::from_millis(300))
      .with_name("Hopeless Job")
      .with_max_retries(1),
    task_fn! {
      {
        Err("upstream unavailable".into())
      }
    },
  )?;

  // --- Let it Run ---
  info!("Waiting for retries to play out...");
  tokio::time::sleep(Duration::from_millis(1_800)).await;

  // --- Inspect ---
  let flaky = scheduler.job_details(flaky_id)?;
  info!(
    "Flaky job: status {:?}, last outcome {:?}, last error {:?}",
    flaky.status, flaky.last_outcome, flaky.last_error
  );
  let hopeless = scheduler.job_details(hopeless_id)?;
  if hopeless.status == JobStatus::Failed {
    info!(
      "Hopeless job failed permanently after {} retries: {:?}",
      hopeless.retry_count, hopeless.last_error
    );
  } else {
    error!("Hopeless job in unexpected state {:?}", hopeless.status);
  }
  if let Some(stats) = scheduler.task_statistics(flaky_id) {
    info!("Flaky job statistics: {:?}", stats);
  }
  info!("Final Metrics: {:#?}", scheduler.metrics_snapshot());

  // --- Shutdown ---
  scheduler.shutdown().await?;
  info!("Scheduler shut down.");
  Ok(())
}
