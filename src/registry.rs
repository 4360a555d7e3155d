use crate::error::QueryError;
use crate::job::{
  instant_to_utc, AttemptOutcome, InstanceId, Job, JobDetails, JobId, JobKind, JobStatus,
  JobSummary, MaxRetries, PriorityLevel,
};
use crate::metrics::StatisticsRecorder;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, trace};

pub(crate) const ADMISSION_TIMEOUT_MESSAGE: &str = "admission timeout";

/// Result of [`JobRegistry::cancel`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cancellation {
  pub(crate) newly_cancelled: bool,
  /// The instance that was queued for the lineage when it was cancelled.
  pub(crate) queued_instance: Option<InstanceId>,
}

/// Bookkeeping for one job lineage, kept for queries after instances come and go.
#[derive(Debug, Clone)]
struct JobRecord {
  name: Option<String>,
  kind: JobKind,
  priority_level: Option<PriorityLevel>,
  max_retries: MaxRetries,
  interval: Duration,
  status: JobStatus,
  retry_count: u32,
  current_delay: Duration,
  next_instance: Option<InstanceId>,
  next_due: Option<Instant>,
  last_execution_time: Option<Duration>,
  last_error: Option<String>,
  last_outcome: Option<AttemptOutcome>,
  executions: u64,
  cancelled: bool,
  ended: bool,
}

impl JobRecord {
  fn new(job: &Job) -> Self {
    Self {
      name: job.name().map(str::to_string),
      kind: job.kind(),
      priority_level: job.enhancement().map(|e| e.priority_level),
      max_retries: job.max_retries(),
      interval: job.interval(),
      status: JobStatus::Pending,
      retry_count: 0,
      current_delay: job.delay(),
      next_instance: Some(job.instance_id()),
      next_due: Some(job.due_at()),
      last_execution_time: None,
      last_error: None,
      last_outcome: None,
      executions: 0,
      cancelled: false,
      ended: false,
    }
  }

  fn details(&self, id: JobId) -> JobDetails {
    JobDetails {
      id,
      name: self.name.clone(),
      kind: self.kind,
      priority_level: self.priority_level,
      status: self.status,
      retry_count: self.retry_count,
      max_retries: self.max_retries,
      interval: self.interval,
      current_delay: self.current_delay,
      next_run_instance: self.next_instance,
      next_run_time: self.next_due.map(instant_to_utc),
      last_execution_time: self.last_execution_time,
      last_error: self.last_error.clone(),
      last_outcome: self.last_outcome,
      executions: self.executions,
      is_cancelled: self.cancelled,
    }
  }

  fn summary(&self, id: JobId) -> JobSummary {
    JobSummary {
      id,
      name: self.name.clone(),
      kind: self.kind,
      status: self.status,
      next_run_time: self.next_due.map(instant_to_utc),
      retry_count: self.retry_count,
      is_cancelled: self.cancelled,
    }
  }
}

#[derive(Debug, Default)]
struct RegistryState {
  records: HashMap<JobId, JobRecord>,
  /// Ended lineages, oldest first.
  ended: VecDeque<JobId>,
}

/// Shared per-lineage state used by the query and cancellation API.
///
/// Scheduling itself never reads from here except to check whether a lineage is still live.
/// Lineages that ended (failed, cancelled, dropped or replaced by a promoted head) stay
/// queryable until more than `retention` of them accumulate; the oldest are then forgotten
/// together with their statistics.
#[derive(Debug, Clone)]
pub(crate) struct JobRegistry {
  state: Arc<RwLock<RegistryState>>,
  statistics: StatisticsRecorder,
  retention: usize,
}

impl JobRegistry {
  pub(crate) fn new(statistics: StatisticsRecorder, retention: usize) -> Self {
    Self {
      state: Arc::new(RwLock::new(RegistryState::default())),
      statistics,
      retention,
    }
  }

  /// Registers a freshly submitted job with its first queued instance.
  pub(crate) fn register(&self, job: &Job) {
    self.state.write().records.insert(job.id(), JobRecord::new(job));
  }

  /// Notes that `job` started executing.
  pub(crate) fn record_started(&self, job: &Job) {
    let mut state = self.state.write();
    if let Some(record) = state.records.get_mut(&job.id()) {
      record.executions += 1;
      if record.next_instance == Some(job.instance_id()) {
        record.next_instance = None;
        record.next_due = None;
      }
      if job.is_enhanced() && !record.cancelled {
        record.status = JobStatus::Running;
      }
    }
  }

  /// Notes the next queued instance of a lineage. Must be called before the instance is offered.
  ///
  /// Returns `false` if the lineage is cancelled, in which case the instance must not be offered.
  pub(crate) fn record_scheduled(&self, job: &Job) -> bool {
    let mut state = self.state.write();
    let Some(record) = state.records.get_mut(&job.id()) else {
      return false;
    };
    if record.cancelled {
      trace!(job_id = %job.id(), instance_id = %job.instance_id(), "Lineage cancelled; not scheduling.");
      return false;
    }
    record.next_instance = Some(job.instance_id());
    record.next_due = Some(job.due_at());
    record.current_delay = job.delay();
    record.retry_count = job.retry_count();
    if job.is_enhanced() {
      record.status = JobStatus::Pending;
    }
    true
  }

  /// Copies the bookkeeping of a finished enhanced attempt onto its lineage.
  pub(crate) fn record_outcome(&self, job: &Job, outcome: AttemptOutcome) {
    let mut state = self.state.write();
    if let Some(record) = state.records.get_mut(&job.id()) {
      record.last_outcome = Some(outcome);
      record.retry_count = job.retry_count();
      if let Some(enhancement) = job.enhancement() {
        if enhancement.last_execution_time.is_some() {
          record.last_execution_time = enhancement.last_execution_time;
        }
        if enhancement.last_error.is_some() {
          record.last_error = enhancement.last_error.clone();
        }
        if !record.cancelled {
          record.status = enhancement.status;
        }
      }
    }
  }

  /// Records that a basic execution finished. Basic lineages only track the outcome.
  pub(crate) fn record_basic_outcome(&self, id: &JobId, error: Option<String>) {
    let mut state = self.state.write();
    if let Some(record) = state.records.get_mut(id) {
      match error {
        Some(message) => {
          record.last_outcome = Some(AttemptOutcome::Failed);
          record.last_error = Some(message);
        }
        None => record.last_outcome = Some(AttemptOutcome::Succeeded),
      }
    }
  }

  /// Ends a lineage whose due instance could not get an admission slot. Its status is left
  /// as it was; the drop shows up as [`AttemptOutcome::NotAdmitted`].
  pub(crate) fn mark_admission_dropped(&self, job: &Job) {
    let mut state = self.state.write();
    if let Some(record) = state.records.get_mut(&job.id()) {
      if record.next_instance == Some(job.instance_id()) {
        record.next_instance = None;
        record.next_due = None;
      }
      record.last_error = Some(ADMISSION_TIMEOUT_MESSAGE.to_string());
      record.last_outcome = Some(AttemptOutcome::NotAdmitted);
    }
    self.retire(&mut state, job.id());
  }

  /// Ends a lineage that will not be offered again (retries exhausted, or replaced by a
  /// promoted head).
  pub(crate) fn end(&self, id: &JobId) {
    let mut state = self.state.write();
    self.retire(&mut state, *id);
  }

  /// Records a finished attempt in the statistics of a live lineage. Attempts of forgotten
  /// lineages are not recorded.
  pub(crate) fn record_attempt(&self, id: &JobId, success: bool, elapsed: Duration) {
    let state = self.state.read();
    if state.records.contains_key(id) {
      self.statistics.record(*id, success, elapsed);
    }
  }

  pub(crate) fn record_retry(&self, id: &JobId) {
    let state = self.state.read();
    if state.records.contains_key(id) {
      self.statistics.record_retry(*id);
    }
  }

  fn retire(&self, state: &mut RegistryState, id: JobId) {
    match state.records.get_mut(&id) {
      Some(record) if !record.ended => record.ended = true,
      _ => return,
    }
    state.ended.push_back(id);
    while state.ended.len() > self.retention {
      let Some(oldest) = state.ended.pop_front() else {
        break;
      };
      state.records.remove(&oldest);
      self.statistics.remove(&oldest);
      debug!(job_id = %oldest, retention = self.retention, "Forgot ended job lineage.");
    }
  }

  /// Clears the queued instance of a lineage after it was discarded without running.
  pub(crate) fn clear_instance(&self, id: &JobId, instance_id: &InstanceId) {
    let mut state = self.state.write();
    if let Some(record) = state.records.get_mut(id) {
      if record.next_instance.as_ref() == Some(instance_id) {
        record.next_instance = None;
        record.next_due = None;
      }
    }
  }

  /// Marks a lineage cancelled and hands back its queued instance, if one was recorded.
  ///
  /// Idempotent: cancelling an already cancelled lineage succeeds with nothing to remove.
  pub(crate) fn cancel(&self, id: &JobId) -> Result<Cancellation, QueryError> {
    let mut state = self.state.write();
    let record = state.records.get_mut(id).ok_or(QueryError::JobNotFound(*id))?;
    if record.cancelled {
      debug!(job_id = %id, "Job was already marked as cancelled.");
      return Ok(Cancellation::default());
    }
    record.cancelled = true;
    record.status = JobStatus::Cancelled;
    record.next_due = None;
    let cancellation = Cancellation {
      newly_cancelled: true,
      queued_instance: record.next_instance.take(),
    };
    self.retire(&mut state, *id);
    Ok(cancellation)
  }

  /// Whether instances of this lineage may still run. Cancelled and forgotten lineages are not
  /// live.
  pub(crate) fn is_live(&self, id: &JobId) -> bool {
    self.state.read().records.get(id).is_some_and(|r| !r.cancelled)
  }

  pub(crate) fn details(&self, id: &JobId) -> Option<JobDetails> {
    self.state.read().records.get(id).map(|r| r.details(*id))
  }

  pub(crate) fn summaries(&self) -> Vec<JobSummary> {
    self
      .state
      .read()
      .records
      .iter()
      .map(|(id, record)| record.summary(*id))
      .collect()
  }
}
