use crate::job::{JobId, Task};

use thiserror::Error;

/// Errors that can occur during the scheduler building phase using `SchedulerBuilder`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  #[error("Maximum concurrency (`max_concurrency`) must be greater than zero")]
  ZeroConcurrency,
  #[error("Scheduler must be built from within a Tokio runtime")]
  NoRuntime,
  #[error("Failed to build the dedicated worker pool runtime: {0}")]
  WorkerPool(String),
}

/// Errors related to submitting jobs via `submit`, `submit_named` or `submit_enhanced`.
///
/// The rejected task is handed back so the caller can decide what to do with it.
#[derive(Error, Debug)]
pub enum SubmitError {
  #[error("Scheduler is shutting down or has shut down, job rejected.")]
  ShuttingDown(Task),
}

impl SubmitError {
  /// Recovers the task that was rejected.
  pub fn into_task(self) -> Task {
    match self {
      SubmitError::ShuttingDown(task) => task,
    }
  }
}

// --- Query Errors ---

/// Errors related to querying or mutating a job lineage (e.g., via `cancel_job`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
  #[error("Job with ID {0} not found.")]
  JobNotFound(JobId),
}

// --- Shutdown Errors ---

/// Errors related to the scheduler shutdown process (`shutdown`, `shutdown_force`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
  #[error("Grace period elapsed; {aborted} in-flight execution(s) were forcibly terminated.")]
  Forced { aborted: usize },
  #[error("A dispatcher or a supervised execution panicked during the shutdown process.")]
  TaskPanic,
}

// --- Execution Errors ---

/// Classification of a single failed execution attempt.
///
/// The `Display` output is what ends up in a job's `last_error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
  /// The job body returned an error.
  #[error("{0}")]
  Failed(String),
  /// The job body did not finish within the configured execution timeout.
  #[error("Task Timeout")]
  TimedOut,
  /// The job body panicked.
  #[error("Task panicked: {0}")]
  Panicked(String),
  /// The execution was cancelled before it could report a result.
  #[error("Task interrupted")]
  Interrupted,
}
