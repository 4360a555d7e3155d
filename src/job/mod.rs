#[cfg(feature = "job_context")]
pub mod context;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::{BoxFuture, FutureExt};
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

// --- Public Type Aliases ---

/// Unique identifier of a job lineage. Stable across repeats and retries, so it also serves
/// as the task identity for execution statistics.
pub type JobId = Uuid;

/// Unique identifier of one queued instance of a job.
pub type InstanceId = Uuid;

pub type MaxRetries = u32;

/// Priority level of an enhanced job. Lower values are served first.
pub type PriorityLevel = i32;

/// The priority level used when none is given, and the level basic jobs are ordered at.
pub const NORMAL_PRIORITY: PriorityLevel = 1;

/// Error type job bodies may return. Its `Display` output becomes the job's `last_error`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of one execution of a job body.
pub type TaskResult = Result<(), BoxError>;

/// Asynchronous job body. Each call produces the future for one execution.
pub type BoxedExecFn = Box<dyn Fn() -> BoxFuture<'static, TaskResult> + Send + Sync + 'static>;

/// Synchronous job body, run on the blocking pool.
pub type BoxedBlockingFn = Box<dyn Fn() -> TaskResult + Send + Sync + 'static>;

// Far-future clamp used when `now + delay` does not fit the clock (~30 years).
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// The unit of work a job executes.
///
/// Cloning is cheap; every repeat and retry instance of a job shares the same body.
#[derive(Clone)]
pub enum Task {
  /// An async body, spawned onto the worker pool. Aborted on timeout at its next await point.
  Async(Arc<BoxedExecFn>),
  /// A blocking body, run with `spawn_blocking`. A timeout releases the admission slot but
  /// cannot stop the thread; the body runs until it returns.
  Blocking(Arc<BoxedBlockingFn>),
}

impl Task {
  /// Wraps an async closure as a job body.
  ///
  /// ```no_run
  /// use triggerkeeper::Task;
  ///
  /// let task = Task::from_fn(|| async {
  ///   println!("tick");
  ///   Ok(())
  /// });
  /// ```
  pub fn from_fn<F, Fut>(f: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
  {
    let exec_fn: BoxedExecFn = Box::new(move || f().boxed());
    Task::Async(Arc::new(exec_fn))
  }

  /// Wraps a synchronous closure as a job body.
  pub fn blocking<F>(f: F) -> Self
  where
    F: Fn() -> TaskResult + Send + Sync + 'static,
  {
    let blocking_fn: BoxedBlockingFn = Box::new(f);
    Task::Blocking(Arc::new(blocking_fn))
  }

  pub fn is_blocking(&self) -> bool {
    matches!(self, Task::Blocking(_))
  }
}

impl fmt::Debug for Task {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Task::Async(_) => f.write_str("Task::Async(<Fn>)"),
      Task::Blocking(_) => f.write_str("Task::Blocking(<Fn>)"),
    }
  }
}

// --- Lifecycle ---

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JobStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
}

/// How a single execution attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AttemptOutcome {
  Succeeded,
  Failed,
  TimedOut,
  /// The due instance got no admission slot within the admission timeout and was dropped
  /// without running. The lineage's status is left as it was.
  NotAdmitted,
}

/// Whether a job was submitted through the basic or the enhanced front door.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JobKind {
  /// No priority, no admission gate, no timeout, no retries.
  Basic,
  /// Priority ordered, admission controlled, timed out and retried.
  Enhanced,
}

// --- Requests ---

/// Parameters of an enhanced job submission.
///
/// ```
/// use std::time::Duration;
/// use triggerkeeper::EnhancedJobRequest;
///
/// let request = EnhancedJobRequest::new(Duration::from_secs(1))
///   .with_name("report")
///   .with_priority(0)
///   .with_max_retries(3);
/// assert_eq!(request.priority_level, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnhancedJobRequest {
  /// Optional descriptive name (used in logging/tracing and queries).
  pub name: Option<String>,
  /// Fixed delay between cycles; also the first delay and the base of the retry backoff.
  pub delay: Duration,
  /// Lower values are dispatched first among due jobs. Defaults to [`NORMAL_PRIORITY`].
  pub priority_level: PriorityLevel,
  /// Maximum retries after a failed or timed out attempt. Defaults to 0.
  pub max_retries: MaxRetries,
}

impl EnhancedJobRequest {
  pub fn new(delay: Duration) -> Self {
    Self {
      name: None,
      delay,
      priority_level: NORMAL_PRIORITY,
      max_retries: 0,
    }
  }

  pub fn with_name(mut self, name: &str) -> Self {
    self.name = Some(name.to_string());
    self
  }

  pub fn with_priority(mut self, priority_level: PriorityLevel) -> Self {
    self.priority_level = priority_level;
    self
  }

  pub fn with_max_retries(mut self, max_retries: MaxRetries) -> Self {
    self.max_retries = max_retries;
    self
  }
}

// --- Core Job Structures ---

/// The priority/retry extension carried by enhanced jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enhancement {
  pub priority_level: PriorityLevel,
  pub status: JobStatus,
  pub retry_count: u32,
  pub max_retries: MaxRetries,
  pub last_execution_time: Option<Duration>,
  pub last_error: Option<String>,
}

impl Enhancement {
  fn fresh(priority_level: PriorityLevel, max_retries: MaxRetries) -> Self {
    Self {
      priority_level,
      status: JobStatus::Pending,
      retry_count: 0,
      max_retries,
      last_execution_time: None,
      last_error: None,
    }
  }
}

/// One queued instance of a job.
///
/// `due_at` is fixed when the instance is created. A repeat or a retry is always a new
/// instance (new `instance_id`, fresh `due_at`) sharing the job's `id` and task.
#[derive(Clone)]
pub struct Job {
  pub(crate) id: JobId,
  pub(crate) instance_id: InstanceId,
  pub(crate) name: Option<Arc<str>>,
  pub(crate) task: Task,
  /// The configured fixed delay between cycles.
  pub(crate) interval: Duration,
  /// The delay this instance was created with (the interval, or a retry backoff).
  pub(crate) delay: Duration,
  pub(crate) due_at: Instant,
  pub(crate) enhancement: Option<Enhancement>,
}

impl Job {
  pub(crate) fn basic(name: Option<String>, task: Task, delay: Duration) -> Self {
    Self {
      id: Uuid::new_v4(),
      instance_id: Uuid::new_v4(),
      name: name.map(Arc::from),
      task,
      interval: delay,
      delay,
      due_at: due_after(delay),
      enhancement: None,
    }
  }

  pub(crate) fn enhanced(request: EnhancedJobRequest, task: Task) -> Self {
    Self {
      id: Uuid::new_v4(),
      instance_id: Uuid::new_v4(),
      name: request.name.map(Arc::from),
      task,
      interval: request.delay,
      delay: request.delay,
      due_at: due_after(request.delay),
      enhancement: Some(Enhancement::fresh(
        request.priority_level,
        request.max_retries,
      )),
    }
  }

  /// A straight repeat: same task, interval, priority and retry limit; retry counter reset.
  pub(crate) fn next_cycle(&self) -> Self {
    let enhancement = self
      .enhancement
      .as_ref()
      .map(|e| Enhancement::fresh(e.priority_level, e.max_retries));
    self.new_instance(self.interval, enhancement)
  }

  /// A retry instance due after `backoff`, carrying the current retry counter and last error.
  pub(crate) fn retry_instance(&self, backoff: Duration) -> Self {
    let enhancement = self.enhancement.as_ref().map(|e| Enhancement {
      status: JobStatus::Pending,
      last_execution_time: None,
      ..e.clone()
    });
    self.new_instance(backoff, enhancement)
  }

  fn new_instance(&self, delay: Duration, enhancement: Option<Enhancement>) -> Self {
    Self {
      id: self.id,
      instance_id: Uuid::new_v4(),
      name: self.name.clone(),
      task: self.task.clone(),
      interval: self.interval,
      delay,
      due_at: due_after(delay),
      enhancement,
    }
  }

  pub fn id(&self) -> JobId {
    self.id
  }

  pub fn instance_id(&self) -> InstanceId {
    self.instance_id
  }

  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  pub fn kind(&self) -> JobKind {
    if self.enhancement.is_some() {
      JobKind::Enhanced
    } else {
      JobKind::Basic
    }
  }

  pub fn is_enhanced(&self) -> bool {
    self.enhancement.is_some()
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }

  pub fn delay(&self) -> Duration {
    self.delay
  }

  pub fn due_at(&self) -> Instant {
    self.due_at
  }

  pub fn is_due(&self, now: Instant) -> bool {
    self.due_at <= now
  }

  /// The level used for queue ordering. Basic jobs report [`NORMAL_PRIORITY`]; they are queued
  /// apart from enhanced jobs, so among themselves they are ordered by due time only.
  pub fn priority_level(&self) -> PriorityLevel {
    self
      .enhancement
      .as_ref()
      .map_or(NORMAL_PRIORITY, |e| e.priority_level)
  }

  pub fn enhancement(&self) -> Option<&Enhancement> {
    self.enhancement.as_ref()
  }

  pub fn status(&self) -> Option<JobStatus> {
    self.enhancement.as_ref().map(|e| e.status)
  }

  pub fn retry_count(&self) -> u32 {
    self.enhancement.as_ref().map_or(0, |e| e.retry_count)
  }

  pub fn max_retries(&self) -> MaxRetries {
    self.enhancement.as_ref().map_or(0, |e| e.max_retries)
  }

  pub fn last_error(&self) -> Option<&str> {
    self
      .enhancement
      .as_ref()
      .and_then(|e| e.last_error.as_deref())
  }

  pub(crate) fn set_status(&mut self, status: JobStatus) {
    if let Some(e) = self.enhancement.as_mut() {
      e.status = status;
    }
  }

  /// Label for logs: the name if there is one, otherwise the job ID.
  pub(crate) fn label(&self) -> String {
    match &self.name {
      Some(name) => name.to_string(),
      None => self.id.to_string(),
    }
  }
}

impl fmt::Debug for Job {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Job")
      .field("id", &self.id)
      .field("instance_id", &self.instance_id)
      .field("name", &self.name)
      .field("task", &self.task)
      .field("interval", &self.interval)
      .field("delay", &self.delay)
      .field("due_at", &self.due_at)
      .field("enhancement", &self.enhancement)
      .finish()
  }
}

/// `now + delay` on the scheduler clock, clamped instead of overflowing.
pub(crate) fn due_after(delay: Duration) -> Instant {
  let now = Instant::now();
  now.checked_add(delay).unwrap_or_else(|| {
    warn!(?delay, "Delay overflows the clock; clamping to the far future.");
    now + FAR_FUTURE
  })
}

pub(crate) fn instant_to_utc(instant: Instant) -> DateTime<Utc> {
  let now_utc = Utc::now();
  let remaining = instant.saturating_duration_since(Instant::now());
  ChronoDuration::from_std(remaining)
    .ok()
    .and_then(|d| now_utc.checked_add_signed(d))
    .unwrap_or(now_utc)
}

// --- Public Snapshot Structs for Querying ---

/// A summary of a job lineage's state, suitable for listing multiple jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JobSummary {
  pub id: JobId,
  pub name: Option<String>,
  pub kind: JobKind,
  pub status: JobStatus,
  /// `None` if nothing is currently queued for the lineage.
  pub next_run_time: Option<DateTime<Utc>>,
  pub retry_count: u32,
  pub is_cancelled: bool,
}

/// Detailed information about a specific job lineage retrieved via query.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JobDetails {
  pub id: JobId,
  pub name: Option<String>,
  pub kind: JobKind,
  /// `None` for basic jobs.
  pub priority_level: Option<PriorityLevel>,
  /// Current lifecycle status of the lineage.
  pub status: JobStatus,
  /// Retry counter of the queued instance (0 unless a retry is pending).
  pub retry_count: u32,
  pub max_retries: MaxRetries,
  /// The configured fixed delay between cycles.
  pub interval: Duration,
  /// The delay the most recently queued instance was created with.
  pub current_delay: Duration,
  /// The instance currently queued, if any.
  pub next_run_instance: Option<InstanceId>,
  /// Wall-clock estimate of when the queued instance becomes due.
  pub next_run_time: Option<DateTime<Utc>>,
  /// Duration of the most recent successful execution.
  pub last_execution_time: Option<Duration>,
  /// Message of the most recent failure, timeout or admission drop.
  pub last_error: Option<String>,
  pub last_outcome: Option<AttemptOutcome>,
  /// Number of execution attempts started.
  pub executions: u64,
  pub is_cancelled: bool,
}
