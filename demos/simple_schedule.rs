//! demos/simple_schedule.rs
//!
//! Demonstrates basic usage of TriggerKeeper:
//! - Building the scheduler.
//! - Submitting a basic job and an enhanced job with different delays.
//! - Letting them run a few cycles.
//! - Querying job details and metrics.
//! - Graceful shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use triggerkeeper::{task_fn, EnhancedJobRequest, PriorityQueueType, TriggerKeeper};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  // --- Setup Tracing ---
  let filter = tracing_subscriber::EnvFilter::try_new("warn,triggerkeeper=info,simple_schedule=info")
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();

  // --- Build Scheduler ---
  info!("Building scheduler...");
  let scheduler = TriggerKeeper::builder()
    .max_concurrency(2)
    .priority_queue(PriorityQueueType::BinaryHeap)
    .build()?;
  info!("Scheduler built.");

  // --- Shared State ---
  let ticks = Arc::new(AtomicUsize::new(0));
  let reports = Arc::new(AtomicUsize::new(0));

  // --- Basic job: every second ---
  let ticks_for_job = ticks.clone();
  let tick_id = scheduler.submit_named(
    "Ticker",
    Duration::from_secs(1),
    task_fn! {
      { let ticks = ticks_for_job.clone(); }
      {
        let count = ticks.fetch_add(1, Ordering::Relaxed) + 1;
        info!("*** Tick {} ***", count);
        Ok(())
      }
    },
  )?;
  info!("Basic job submitted with ID: {}", tick_id);

  // --- Enhanced job: every 2 seconds, retried once on failure ---
  let reports_for_job = reports.clone();
  let report_id = scheduler.submit_enhanced(
    EnhancedJobRequest::new(Duration::from_secs(2))
      .with_name("Report")
      .with_max_retries(1),
    task_fn! {
      { let reports = reports_for_job.clone(); }
      {
        let count = reports.fetch_add(1, Ordering::Relaxed) + 1;
        info!("*** Report {} building... ***", count);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
      }
    },
  )?;
  info!("Enhanced job submitted with ID: {}", report_id);

  // --- Let it Run ---
  info!("Waiting for jobs to run (approx 5 seconds)...");
  tokio::time::sleep(Duration::from_millis(5_500)).await;

  // --- Query State ---
  match scheduler.job_details(report_id) {
    Ok(details) => info!("Report job details: {:#?}", details),
    Err(e) => error!("Failed to query report job: {}", e),
  }
  for summary in scheduler.list_jobs() {
    info!(
      "Job {:?} ({}) status {:?}, next run {:?}",
      summary.name, summary.id, summary.status, summary.next_run_time
    );
  }
  info!("Final Metrics: {:#?}", scheduler.metrics_snapshot());
  info!(
    "Ticks: {}, reports: {}",
    ticks.load(Ordering::Relaxed),
    reports.load(Ordering::Relaxed)
  );

  // --- Shutdown ---
  info!("Requesting graceful shutdown...");
  match scheduler.shutdown().await {
    Ok(()) => info!("Scheduler shut down successfully."),
    Err(e) => error!("Scheduler shutdown failed: {}", e),
  }

  Ok(())
}
