use crate::job::JobId;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

// --- Duration summary ---

/// Count, sum and maximum of observed durations, in microseconds. Lock-free.
#[derive(Debug, Default)]
pub struct DurationSummary {
  count: AtomicUsize,
  sum_micros: AtomicUsize,
  max_micros: AtomicUsize,
}

impl DurationSummary {
  pub fn record(&self, duration: Duration) {
    let micros = usize::try_from(duration.as_micros()).unwrap_or(usize::MAX);
    self.count.fetch_add(1, Ordering::Relaxed);
    self.sum_micros.fetch_add(micros, Ordering::Relaxed);
    self.max_micros.fetch_max(micros, Ordering::Relaxed);
  }

  pub fn count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }

  pub fn sum_micros(&self) -> usize {
    self.sum_micros.load(Ordering::Relaxed)
  }

  /// Longest observation so far, 0 before the first one.
  pub fn max_micros(&self) -> usize {
    self.max_micros.load(Ordering::Relaxed)
  }
}

// --- Main Metrics Struct (Internal State) ---

/// Scheduler-wide counters, shared between the handle, the dispatcher and executions.
///
/// Cloning only clones the `Arc`s.
#[derive(Debug, Clone)]
pub struct SchedulerMetrics {
  // --- Counters (Monotonically increasing) ---
  /// Jobs accepted by `submit`, `submit_named` or `submit_enhanced`.
  pub jobs_submitted: Arc<AtomicUsize>,
  /// Basic job instances handed to the worker pool.
  pub basic_jobs_fired: Arc<AtomicUsize>,
  /// Enhanced attempts that completed successfully.
  pub jobs_executed_success: Arc<AtomicUsize>,
  /// Enhanced attempts that failed (error, timeout, panic or interruption).
  pub jobs_executed_fail: Arc<AtomicUsize>,
  /// Enhanced attempts that hit the execution timeout.
  pub jobs_timed_out: Arc<AtomicUsize>,
  /// Executions (basic or enhanced) whose body panicked.
  pub jobs_panicked: Arc<AtomicUsize>,
  /// Retry instances offered after a failed attempt.
  pub jobs_retried: Arc<AtomicUsize>,
  /// Lineages that ended as `Failed` after exhausting their retries.
  pub jobs_permanently_failed: Arc<AtomicUsize>,
  /// Due enhanced instances dropped because no admission slot freed up in time.
  pub jobs_admission_dropped: Arc<AtomicUsize>,
  /// Lineages cancelled through the API.
  pub jobs_lineage_cancelled: Arc<AtomicUsize>,
  /// Instances discarded because their lineage was cancelled.
  pub jobs_instance_discarded_cancelled: Arc<AtomicUsize>,

  // --- Summaries ---
  /// Execution duration of enhanced attempts.
  pub job_execution_duration: Arc<DurationSummary>,
}

impl Default for SchedulerMetrics {
  fn default() -> Self {
    Self::new()
  }
}

impl SchedulerMetrics {
  /// Creates a new `SchedulerMetrics` instance with all counters initialized to zero.
  pub fn new() -> Self {
    Self {
      jobs_submitted: Default::default(),
      basic_jobs_fired: Default::default(),
      jobs_executed_success: Default::default(),
      jobs_executed_fail: Default::default(),
      jobs_timed_out: Default::default(),
      jobs_panicked: Default::default(),
      jobs_retried: Default::default(),
      jobs_permanently_failed: Default::default(),
      jobs_admission_dropped: Default::default(),
      jobs_lineage_cancelled: Default::default(),
      jobs_instance_discarded_cancelled: Default::default(),
      job_execution_duration: Arc::new(DurationSummary::default()),
    }
  }

  pub(crate) fn incr(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  /// Creates a snapshot of the counters. The gauges are filled in from live state.
  pub fn snapshot(&self, queue_len: usize, executions_active: usize) -> MetricsSnapshot {
    let order = Ordering::Relaxed;

    MetricsSnapshot {
      jobs_submitted: self.jobs_submitted.load(order),
      basic_jobs_fired: self.basic_jobs_fired.load(order),
      jobs_executed_success: self.jobs_executed_success.load(order),
      jobs_executed_fail: self.jobs_executed_fail.load(order),
      jobs_timed_out: self.jobs_timed_out.load(order),
      jobs_panicked: self.jobs_panicked.load(order),
      jobs_retried: self.jobs_retried.load(order),
      jobs_permanently_failed: self.jobs_permanently_failed.load(order),
      jobs_admission_dropped: self.jobs_admission_dropped.load(order),
      jobs_lineage_cancelled: self.jobs_lineage_cancelled.load(order),
      jobs_instance_discarded_cancelled: self.jobs_instance_discarded_cancelled.load(order),
      queue_len_current: queue_len,
      executions_active_current: executions_active,
      job_execution_duration_count: self.job_execution_duration.count(),
      job_execution_duration_sum_micros: self.job_execution_duration.sum_micros(),
      job_execution_duration_max_micros: self.job_execution_duration.max_micros(),
    }
  }
}

// --- Metrics Snapshot Struct (Public Data) ---

/// A snapshot of the scheduler's metrics at a specific point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
  // Counters
  pub jobs_submitted: usize,
  pub basic_jobs_fired: usize,
  pub jobs_executed_success: usize,
  pub jobs_executed_fail: usize,
  pub jobs_timed_out: usize,
  pub jobs_panicked: usize,
  pub jobs_retried: usize,
  pub jobs_permanently_failed: usize,
  pub jobs_admission_dropped: usize,
  pub jobs_lineage_cancelled: usize,
  pub jobs_instance_discarded_cancelled: usize,
  // Gauges
  /// Instances currently waiting in the queue.
  pub queue_len_current: usize,
  /// Admission slots currently held by enhanced executions.
  pub executions_active_current: usize,
  // Execution durations of enhanced attempts
  pub job_execution_duration_count: usize,
  pub job_execution_duration_sum_micros: usize,
  pub job_execution_duration_max_micros: usize,
}

impl MetricsSnapshot {
  /// Mean duration of the recorded attempts, `None` before the first one.
  pub fn mean_execution_duration(&self) -> Option<Duration> {
    let count = self.job_execution_duration_count;
    (count > 0).then(|| {
      Duration::from_micros((self.job_execution_duration_sum_micros / count) as u64)
    })
  }

  pub fn max_execution_duration(&self) -> Option<Duration> {
    (self.job_execution_duration_count > 0)
      .then(|| Duration::from_micros(self.job_execution_duration_max_micros as u64))
  }
}

// --- Per-job execution statistics ---

/// Aggregate execution counters of one job lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskStatistics {
  pub success_count: u64,
  pub failure_count: u64,
  /// Retry instances offered over the lineage's lifetime.
  pub retry_count: u64,
  /// Sum of the durations of all recorded attempts.
  pub total_execution_time: Duration,
}

impl TaskStatistics {
  pub fn attempts(&self) -> u64 {
    self.success_count + self.failure_count
  }

  /// Mean attempt duration, or `None` before the first attempt.
  pub fn mean_execution_time(&self) -> Option<Duration> {
    let attempts = u32::try_from(self.attempts()).ok().filter(|n| *n > 0)?;
    Some(self.total_execution_time / attempts)
  }
}

/// Best-effort recorder of [`TaskStatistics`], keyed by job ID. Observational only.
#[derive(Debug, Clone, Default)]
pub struct StatisticsRecorder {
  stats: Arc<Mutex<HashMap<JobId, TaskStatistics>>>,
}

impl StatisticsRecorder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Records one finished attempt.
  pub fn record(&self, job_id: JobId, success: bool, elapsed: Duration) {
    let mut stats = self.stats.lock();
    let entry = stats.entry(job_id).or_default();
    if success {
      entry.success_count += 1;
    } else {
      entry.failure_count += 1;
    }
    entry.total_execution_time = entry.total_execution_time.saturating_add(elapsed);
  }

  /// Records that a retry was scheduled.
  pub fn record_retry(&self, job_id: JobId) {
    self.stats.lock().entry(job_id).or_default().retry_count += 1;
  }

  /// Forgets the statistics of a lineage.
  pub fn remove(&self, job_id: &JobId) -> Option<TaskStatistics> {
    self.stats.lock().remove(job_id)
  }

  pub fn get(&self, job_id: &JobId) -> Option<TaskStatistics> {
    self.stats.lock().get(job_id).copied()
  }

  pub fn all(&self) -> HashMap<JobId, TaskStatistics> {
    self.stats.lock().clone()
  }
}
