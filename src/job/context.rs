use super::{InstanceId, JobId};

/// Contextual information available to a running job body via task-locals.
/// Accessible within a job body using `try_get_current_job_context()`
/// or the `job_context!()` macro when the `job_context` feature is enabled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobContext {
  /// The lineage ID of the job, stable across repeats and retries.
  pub job_id: JobId,
  /// The unique ID of this specific execution instance.
  pub instance_id: InstanceId,
  /// Retry counter of this attempt (0 for a regular cycle).
  pub attempt: u32,
}

tokio::task_local! {
    /// Provides access to the current `JobContext` within a job's execution scope.
    /// Set by the worker for async bodies, and for blocking bodies via `sync_scope`.
    pub static CURRENT_JOB_CONTEXT: JobContext;
}

/// Attempts to retrieve the current `JobContext` for the executing job.
///
/// Returns `None` when called outside a body run by the scheduler.
pub fn try_get_current_job_context() -> Option<JobContext> {
  CURRENT_JOB_CONTEXT.try_with(|ctx| *ctx).ok()
}

/// Retrieves the current `JobContext`, panicking if called outside a
/// scheduler-run job body.
///
/// # Panics
/// Panics if the `CURRENT_JOB_CONTEXT` task local has not been set.
#[macro_export]
macro_rules! job_context {
  () => {
    $crate::job::context::CURRENT_JOB_CONTEXT.with(|ctx| *ctx)
  };
}
