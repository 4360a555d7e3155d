use crate::dispatcher::{Dispatcher, ShutdownMode};
use crate::error::{BuildError, QueryError, ShutdownError, SubmitError};
use crate::gate::AdmissionGate;
use crate::job::{EnhancedJobRequest, Job, JobDetails, JobId, JobKind, JobSummary, Task};
use crate::metrics::{MetricsSnapshot, SchedulerMetrics, StatisticsRecorder, TaskStatistics};
use crate::queue::Lanes;
use crate::registry::JobRegistry;
use crate::retry::RepeatPolicy;
use crate::worker::{available_parallelism, Worker, WorkerPool, WorkerPoolConfig};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// Default per-execution timeout of enhanced jobs.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_millis(60_000);
/// Default wait for an admission slot before a due enhanced instance is dropped.
pub const DEFAULT_ADMISSION_TIMEOUT: Duration = Duration::from_secs(5);
/// Default time in-flight executions get to finish on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Default number of ended job lineages kept for queries.
pub const DEFAULT_ENDED_JOB_RETENTION: usize = 1024;

/// Specifies the underlying priority queue implementation used by the scheduler.
///
/// Both order instances identically; they differ in how cancellation reaches the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PriorityQueueType {
  /// Uses `std::collections::BinaryHeap`.
  /// - **Dependencies:** Standard library only.
  /// - **Cancellation:** A cancelled lineage's queued instance stays in the queue and is
  ///   discarded lazily when it reaches the head.
  BinaryHeap,

  /// Uses the `priority-queue` crate, providing handles to queued items.
  /// - **Dependencies:** Adds the `priority-queue` crate.
  /// - **Cancellation:** The queued instance is removed proactively by
  ///   [`TriggerKeeper::cancel_job`].
  #[cfg(feature = "priority_queue_handle_based")]
  HandleBased,
}

impl Default for PriorityQueueType {
  fn default() -> Self {
    #[cfg(feature = "priority_queue_handle_based")]
    return PriorityQueueType::HandleBased;
    #[cfg(not(feature = "priority_queue_handle_based"))]
    PriorityQueueType::BinaryHeap
  }
}

/// Every knob of a scheduler instance. Usually populated through [`SchedulerBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SchedulerConfig {
  /// Capacity of the admission gate. Defaults to the number of available processing units.
  pub max_concurrency: usize,
  /// Wall-clock limit of one enhanced execution.
  pub execution_timeout: Duration,
  /// How long a due enhanced instance waits for an admission slot.
  pub admission_timeout: Duration,
  /// How long `shutdown` waits for in-flight executions before aborting them.
  pub shutdown_grace: Duration,
  pub priority_queue: PriorityQueueType,
  pub repeat_policy: RepeatPolicy,
  /// End the dispatcher's timed park early whenever a job is offered.
  pub wake_on_offer: bool,
  /// Run executions on a dedicated runtime instead of the ambient one.
  pub worker_pool: Option<WorkerPoolConfig>,
  /// How many ended job lineages stay queryable before the oldest are forgotten.
  pub ended_job_retention: usize,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      max_concurrency: available_parallelism(),
      execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
      admission_timeout: DEFAULT_ADMISSION_TIMEOUT,
      shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
      priority_queue: PriorityQueueType::default(),
      repeat_policy: RepeatPolicy::default(),
      wake_on_offer: true,
      worker_pool: None,
      ended_job_retention: DEFAULT_ENDED_JOB_RETENTION,
    }
  }
}

/// Builder for configuring and creating a [`TriggerKeeper`] instance.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use triggerkeeper::{PriorityQueueType, TriggerKeeper};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let scheduler = TriggerKeeper::builder()
///     .max_concurrency(4)
///     .execution_timeout(Duration::from_secs(10))
///     .priority_queue(PriorityQueueType::BinaryHeap)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchedulerBuilder {
  config: SchedulerConfig,
}

impl SchedulerBuilder {
  /// Creates a new builder with [`SchedulerConfig::default`] settings.
  pub fn new() -> Self {
    Self::default()
  }

  /// Starts from an existing configuration.
  pub fn from_config(config: SchedulerConfig) -> Self {
    Self { config }
  }

  /// Sets how many enhanced executions may run at once. Must be greater than 0.
  pub fn max_concurrency(mut self, count: usize) -> Self {
    self.config.max_concurrency = count;
    self
  }

  pub fn execution_timeout(mut self, timeout: Duration) -> Self {
    self.config.execution_timeout = timeout;
    self
  }

  pub fn admission_timeout(mut self, timeout: Duration) -> Self {
    self.config.admission_timeout = timeout;
    self
  }

  pub fn shutdown_grace(mut self, grace: Duration) -> Self {
    self.config.shutdown_grace = grace;
    self
  }

  /// Sets the type of priority queue to use for scheduling.
  /// See [`PriorityQueueType`] documentation for implications.
  pub fn priority_queue(mut self, pq_type: PriorityQueueType) -> Self {
    self.config.priority_queue = pq_type;
    self
  }

  pub fn repeat_policy(mut self, policy: RepeatPolicy) -> Self {
    self.config.repeat_policy = policy;
    self
  }

  /// With `false`, the dispatcher parks until the head's due time even if a more urgent job
  /// is offered meanwhile.
  pub fn wake_on_offer(mut self, wake: bool) -> Self {
    self.config.wake_on_offer = wake;
    self
  }

  /// Runs executions on a dedicated runtime sized by `config`.
  pub fn worker_pool(mut self, config: WorkerPoolConfig) -> Self {
    self.config.worker_pool = Some(config);
    self
  }

  /// Sets how many failed, cancelled or otherwise ended lineages remain available to
  /// [`TriggerKeeper::job_details`] and the statistics queries. Beyond that, the oldest ended
  /// lineages are forgotten.
  pub fn ended_job_retention(mut self, retention: usize) -> Self {
    self.config.ended_job_retention = retention;
    self
  }

  /// Builds the scheduler and spawns its dispatchers on the current Tokio runtime.
  ///
  /// # Errors
  ///
  /// - [`BuildError::ZeroConcurrency`] if `max_concurrency` is 0.
  /// - [`BuildError::NoRuntime`] if called outside a Tokio runtime.
  /// - [`BuildError::WorkerPool`] if the dedicated runtime could not be created.
  pub fn build(self) -> Result<TriggerKeeper, BuildError> {
    let config = self.config;
    if config.max_concurrency == 0 {
      return Err(BuildError::ZeroConcurrency);
    }
    let ambient = Handle::try_current().map_err(|_| BuildError::NoRuntime)?;

    let lanes = Lanes::new(config.priority_queue);
    let gate = AdmissionGate::new(config.max_concurrency);
    let pool = Arc::new(WorkerPool::new(ambient.clone(), config.worker_pool.as_ref())?);
    let (shutdown_tx, shutdown_rx) = watch::channel::<Option<ShutdownMode>>(None);

    let statistics = StatisticsRecorder::new();
    let worker = Worker {
      pool,
      lanes: lanes.clone(),
      registry: JobRegistry::new(statistics.clone(), config.ended_job_retention),
      metrics: SchedulerMetrics::new(),
      statistics,
      execution_timeout: config.execution_timeout,
      repeat_policy: config.repeat_policy,
    };

    let dispatcher_handles: Vec<JoinHandle<()>> = [
      (JobKind::Basic, lanes.basic.clone()),
      (JobKind::Enhanced, lanes.enhanced.clone()),
    ]
    .into_iter()
    .map(|(lane, queue)| {
      let dispatcher = Dispatcher::new(
        lane,
        queue,
        gate.clone(),
        worker.clone(),
        shutdown_rx.clone(),
        config.admission_timeout,
        config.wake_on_offer,
      );
      ambient.spawn(async move {
        dispatcher.run().await;
        info!(?lane, "Dispatcher task finished.");
      })
    })
    .collect();

    info!(
      max_concurrency = config.max_concurrency,
      execution_timeout_ms = config.execution_timeout.as_millis(),
      pq_type = ?config.priority_queue,
      "Scheduler started."
    );

    Ok(TriggerKeeper {
      config,
      lanes,
      gate,
      worker,
      shutdown_tx,
      shutting_down: AtomicBool::new(false),
      dispatcher_handles: Mutex::new(dispatcher_handles),
    })
  }
}

/// An in-memory delayed/recurring job scheduler.
///
/// Basic jobs ([`submit`](Self::submit)) fire after their delay and repeat at the same delay.
/// Enhanced jobs ([`submit_enhanced`](Self::submit_enhanced)) are additionally ordered by
/// priority, admitted through a bounded [`AdmissionGate`], run under the execution timeout
/// and retried with exponential backoff.
///
/// Basic and enhanced jobs wait in separate queues drained by separate dispatchers, so neither
/// enhanced priorities nor admission waits delay a due basic job.
///
/// Use [`TriggerKeeper::builder()`] to create and configure an instance.
#[derive(Debug)]
pub struct TriggerKeeper {
  config: SchedulerConfig,
  lanes: Lanes,
  gate: AdmissionGate,
  worker: Worker,
  shutdown_tx: watch::Sender<Option<ShutdownMode>>,
  shutting_down: AtomicBool,
  dispatcher_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TriggerKeeper {
  /// Returns a builder to configure and create a `TriggerKeeper` instance.
  pub fn builder() -> SchedulerBuilder {
    SchedulerBuilder::new()
  }

  /// Submits a basic job: `task` runs after `delay`, then every `delay` after each firing.
  ///
  /// # Errors
  ///
  /// [`SubmitError::ShuttingDown`] once shutdown has begun; the task is handed back.
  pub fn submit(&self, delay: Duration, task: Task) -> Result<JobId, SubmitError> {
    self.submit_job(Job::basic(None, task, delay))
  }

  /// Like [`submit`](Self::submit), with a name used in logs and queries.
  pub fn submit_named(&self, name: &str, delay: Duration, task: Task) -> Result<JobId, SubmitError> {
    self.submit_job(Job::basic(Some(name.to_string()), task, delay))
  }

  /// Submits an enhanced job.
  ///
  /// # Errors
  ///
  /// [`SubmitError::ShuttingDown`] once shutdown has begun; the task is handed back.
  pub fn submit_enhanced(&self, request: EnhancedJobRequest, task: Task) -> Result<JobId, SubmitError> {
    self.submit_job(Job::enhanced(request, task))
  }

  fn submit_job(&self, job: Job) -> Result<JobId, SubmitError> {
    if self.is_shutting_down() {
      return Err(SubmitError::ShuttingDown(job.task));
    }
    let job_id = job.id();
    debug!(
      %job_id,
      job_name = %job.label(),
      kind = ?job.kind(),
      priority = job.priority_level(),
      delay_ms = job.delay().as_millis(),
      "Job submitted."
    );
    self.worker.registry.register(&job);
    SchedulerMetrics::incr(&self.worker.metrics.jobs_submitted);
    self.lanes.offer(job);
    Ok(job_id)
  }

  /// Cancels a job lineage: its queued instance never runs and no further instances are
  /// scheduled. An execution already running is not interrupted.
  ///
  /// With [`PriorityQueueType::HandleBased`] the queued instance is removed right away; with
  /// [`PriorityQueueType::BinaryHeap`] it is discarded when it reaches the head. Cancelling
  /// twice is not an error.
  ///
  /// # Errors
  ///
  /// [`QueryError::JobNotFound`] if no job with this ID was ever submitted, or if it was forgotten.
  pub fn cancel_job(&self, job_id: JobId) -> Result<(), QueryError> {
    let cancellation = self.worker.registry.cancel(&job_id)?;
    if !cancellation.newly_cancelled {
      return Ok(());
    }
    SchedulerMetrics::incr(&self.worker.metrics.jobs_lineage_cancelled);
    info!(%job_id, "Marked job lineage as cancelled.");

    #[cfg(feature = "priority_queue_handle_based")]
    if self.config.priority_queue == PriorityQueueType::HandleBased {
      if let Some(instance_id) = cancellation.queued_instance {
        if self.lanes.remove(&instance_id).is_some() {
          SchedulerMetrics::incr(&self.worker.metrics.jobs_instance_discarded_cancelled);
          trace!(%job_id, %instance_id, "Proactively removed cancelled instance.");
        }
      }
    }
    Ok(())
  }

  /// Retrieves detailed information about a specific job lineage.
  ///
  /// # Errors
  ///
  /// [`QueryError::JobNotFound`] if no job with this ID was ever submitted, or if it ended
  /// and was forgotten (see [`SchedulerBuilder::ended_job_retention`]).
  pub fn job_details(&self, job_id: JobId) -> Result<JobDetails, QueryError> {
    self
      .worker
      .registry
      .details(&job_id)
      .ok_or(QueryError::JobNotFound(job_id))
  }

  /// Lists summary information for every submitted job lineage.
  pub fn list_jobs(&self) -> Vec<JobSummary> {
    self.worker.registry.summaries()
  }

  /// Retrieves a snapshot of the current scheduler metrics.
  pub fn metrics_snapshot(&self) -> MetricsSnapshot {
    self
      .worker
      .metrics
      .snapshot(self.lanes.len(), self.gate.in_use())
  }

  /// Execution statistics of one job lineage, or `None` before its first attempt and after
  /// the lineage was forgotten.
  pub fn task_statistics(&self, job_id: JobId) -> Option<TaskStatistics> {
    self.worker.statistics.get(&job_id)
  }

  pub fn all_task_statistics(&self) -> HashMap<JobId, TaskStatistics> {
    self.worker.statistics.all()
  }

  /// The gate bounding concurrent enhanced executions.
  pub fn admission_gate(&self) -> &AdmissionGate {
    &self.gate
  }

  pub fn config(&self) -> &SchedulerConfig {
    &self.config
  }

  /// Number of instances currently waiting, basic and enhanced.
  pub fn queued_len(&self) -> usize {
    self.lanes.len()
  }

  pub fn is_shutting_down(&self) -> bool {
    self.shutting_down.load(AtomicOrdering::Acquire)
  }

  /// Stops dispatching, waits up to the configured grace period for in-flight executions and
  /// aborts whatever is still running afterwards.
  ///
  /// Only the first call does the work; later calls return `Ok(())` immediately.
  ///
  /// # Errors
  ///
  /// - [`ShutdownError::Forced`] if executions had to be aborted after the grace period.
  /// - [`ShutdownError::TaskPanic`] if the dispatcher or a supervised execution panicked.
  pub async fn shutdown(&self) -> Result<(), ShutdownError> {
    self
      .shutdown_with(ShutdownMode::Graceful, self.config.shutdown_grace)
      .await
  }

  /// Stops dispatching and aborts in-flight executions without a grace period.
  ///
  /// # Errors
  ///
  /// See [`shutdown`](Self::shutdown).
  pub async fn shutdown_force(&self) -> Result<(), ShutdownError> {
    self.shutdown_with(ShutdownMode::Force, Duration::ZERO).await
  }

  async fn shutdown_with(&self, mode: ShutdownMode, grace: Duration) -> Result<(), ShutdownError> {
    if self.shutting_down.swap(true, AtomicOrdering::AcqRel) {
      debug!("Shutdown already requested.");
      return Ok(());
    }
    info!(?mode, grace_ms = grace.as_millis(), "Initiating shutdown...");

    self.shutdown_tx.send_replace(Some(mode));
    self.gate.close();

    let mut dispatcher_panicked = false;
    let dispatchers = std::mem::take(&mut *self.dispatcher_handles.lock());
    for handle in dispatchers {
      match handle.await {
        Ok(()) => debug!("Dispatcher task joined."),
        Err(e) => {
          error!("Dispatcher task panicked: {:?}", e);
          dispatcher_panicked |= e.is_panic();
        }
      }
    }

    let report = self.worker.pool.drain(grace).await;

    if dispatcher_panicked || report.panicked > 0 {
      return Err(ShutdownError::TaskPanic);
    }
    if report.aborted > 0 {
      return Err(ShutdownError::Forced {
        aborted: report.aborted,
      });
    }
    info!("Scheduler shut down.");
    Ok(())
  }
}
