//! TriggerKeeper: An In-Memory Delayed & Recurring Job Scheduler
//!
//! Jobs are submitted with a fixed delay. Each job fires no earlier than its delay after
//! submission and is then re-enqueued for its next cycle. Enhanced jobs additionally carry a
//! priority level, run behind an admission gate bounding concurrency, are limited by a
//! per-execution timeout, and are retried with exponential backoff up to a configured limit.
//!
//! # Features
//!
//! - Basic jobs: fire after the delay, repeat at the same delay. No gate, no timeout, no retries.
//! - Enhanced jobs:
//!   - Priority ordering among due jobs (lower level first, then due time, then submission order).
//!   - Admission control: at most `max_concurrency` executions at once; a due instance that
//!     cannot get a slot within the admission timeout is dropped and logged.
//!   - Execution timeout (default 60 s), reported as `"Task Timeout"`.
//!   - Retries with backoff `delay × 2^retry` until `max_retries`, then `Failed`.
//! - Async bodies ([`Task::from_fn`]) and blocking bodies ([`Task::blocking`]).
//! - Choice of queue backend via the builder:
//!   - `BinaryHeap`: Standard library, lazy cancellation.
//!   - `HandleBased`: Proactive cancellation removal (requires `priority_queue_handle_based` feature).
//! - Query job details ([`JobDetails`]), list summaries ([`JobSummary`]) and per-job
//!   execution statistics ([`TaskStatistics`]).
//! - Built-in metrics collection (snapshot via [`MetricsSnapshot`]).
//! - Graceful shutdown with a grace period, and forced shutdown.
//! - Optional dedicated worker runtime ([`WorkerPoolConfig`]).
//! - Optional task-local job context ([`JobContext`], requires `job_context` feature).
//! - Optional Serde support for configuration and snapshot types (requires `serde` feature).
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use triggerkeeper::{EnhancedJobRequest, Task, TriggerKeeper};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scheduler = TriggerKeeper::builder()
//!         .max_concurrency(4)
//!         .execution_timeout(Duration::from_secs(10))
//!         .build()?;
//!
//!     // A basic job, every second.
//!     scheduler.submit(
//!         Duration::from_secs(1),
//!         Task::from_fn(|| async {
//!             println!("tick");
//!             Ok(())
//!         }),
//!     )?;
//!
//!     // An enhanced job with up to three retries.
//!     let attempts = Arc::new(AtomicUsize::new(0));
//!     let counter = attempts.clone();
//!     let report_id = scheduler.submit_enhanced(
//!         EnhancedJobRequest::new(Duration::from_secs(2))
//!             .with_name("report")
//!             .with_max_retries(3),
//!         Task::from_fn(move || {
//!             let counter = counter.clone();
//!             async move {
//!                 if counter.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
//!                     return Err("flaky upstream".into());
//!                 }
//!                 Ok(())
//!             }
//!         }),
//!     )?;
//!
//!     tokio::time::sleep(Duration::from_secs(10)).await;
//!
//!     println!("{:#?}", scheduler.job_details(report_id)?);
//!     println!("{:#?}", scheduler.metrics_snapshot());
//!
//!     scheduler.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! Use the [`SchedulerBuilder`] (or a [`SchedulerConfig`]) to configure the scheduler:
//! - `max_concurrency`: admission gate capacity (default: available processing units).
//! - `execution_timeout`, `admission_timeout`, `shutdown_grace`.
//! - `priority_queue`: see [`PriorityQueueType`].
//! - `repeat_policy`: see [`RepeatPolicy`].
//! - `wake_on_offer`: whether a parked dispatcher re-examines the queue as soon as a job is offered.
//! - `worker_pool`: run executions on a dedicated runtime.
//!
//! # Observability
//!
//! - Metrics via [`TriggerKeeper::metrics_snapshot`].
//! - Job state via [`TriggerKeeper::job_details`] and [`TriggerKeeper::list_jobs`].
//! - Statistics via [`TriggerKeeper::task_statistics`].
//! - Integrate with the `tracing` crate for detailed logs; every execution runs in a `job_exec` span.

// --- Feature-gated Documentation ---

#[cfg(all(doc, feature = "job_context"))]
pub mod job_context_docs {
    //! # Accessing Job Context (`job_context` feature)
    //!
    //! Job bodies can read which lineage and instance they belong to:
    //!
    //! 1.  **`try_get_current_job_context() -> Option<JobContext>`**: Returns `None` if called
    //!     outside a body run by the scheduler.
    //! 2.  **`job_context!() -> JobContext`**: Panics if called outside such a body.
    //!
    //! ```no_run
    //! # #[cfg(feature = "job_context")] {
    //! use triggerkeeper::{job_context, try_get_current_job_context, Task};
    //!
    //! let task = Task::from_fn(|| async {
    //!     if let Some(ctx) = try_get_current_job_context() {
    //!         println!("job {} instance {} attempt {}", ctx.job_id, ctx.instance_id, ctx.attempt);
    //!     }
    //!     let required = job_context!();
    //!     println!("job {}", required.job_id);
    //!     Ok(())
    //! });
    //! # }
    //! ```
    //!
    //! Blocking bodies see the same context.
}

mod dispatcher;
pub mod error;
pub mod gate;
pub mod job;
mod macros;
pub mod metrics;
mod queue;
mod registry;
pub mod retry;
pub mod scheduler;
pub mod worker;

// --- Public Re-exports ---

// Core scheduler components
pub use gate::{AdmissionGate, GatePermit};
pub use retry::RepeatPolicy;
pub use scheduler::{PriorityQueueType, SchedulerBuilder, SchedulerConfig, TriggerKeeper};
pub use worker::WorkerPoolConfig;

// Error types
pub use error::{BuildError, ExecutionError, QueryError, ShutdownError, SubmitError};

// Job related types
pub use job::{
  AttemptOutcome, BoxError, EnhancedJobRequest, InstanceId, JobDetails, JobId, JobKind,
  JobStatus, JobSummary, MaxRetries, PriorityLevel, Task, TaskResult, NORMAL_PRIORITY,
};
#[cfg(feature = "job_context")]
pub use job::context::{try_get_current_job_context, JobContext};

// Metrics related types
pub use metrics::{
  DurationSummary, MetricsSnapshot, SchedulerMetrics, StatisticsRecorder, TaskStatistics,
};
