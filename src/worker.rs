use crate::error::{BuildError, ExecutionError};
use crate::gate::GatePermit;
use crate::job::{AttemptOutcome, Job, Task, TaskResult};
use crate::metrics::{SchedulerMetrics, StatisticsRecorder};
use crate::queue::Lanes;
use crate::registry::JobRegistry;
use crate::retry::{self, NextStep, RepeatPolicy};

#[cfg(feature = "job_context")]
use crate::job::context::{JobContext, CURRENT_JOB_CONTEXT};

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

// --- Pool configuration ---

/// Sizing of a dedicated runtime for job executions.
///
/// `core_threads` become the runtime's async worker threads; the blocking pool (used by
/// [`Task::blocking`] bodies) may grow to `max_threads - core_threads` threads, which are
/// reclaimed after `keep_alive` of idleness. When no dedicated pool is configured, executions
/// run on the runtime the scheduler was built in.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WorkerPoolConfig {
  pub core_threads: usize,
  pub max_threads: usize,
  pub keep_alive: Duration,
}

impl Default for WorkerPoolConfig {
  fn default() -> Self {
    let core_threads = available_parallelism();
    Self {
      core_threads,
      max_threads: core_threads * 2,
      keep_alive: Duration::from_secs(60),
    }
  }
}

impl WorkerPoolConfig {
  /// Builds the multi-thread runtime described by this configuration.
  /// Threads are named `enhanced-task-N`.
  pub fn build_runtime(&self) -> std::io::Result<Runtime> {
    let core_threads = self.core_threads.max(1);
    let blocking_threads = self.max_threads.saturating_sub(core_threads).max(1);
    let thread_counter = Arc::new(AtomicUsize::new(1));

    tokio::runtime::Builder::new_multi_thread()
      .worker_threads(core_threads)
      .max_blocking_threads(blocking_threads)
      .thread_keep_alive(self.keep_alive)
      .thread_name_fn(move || {
        let n = thread_counter.fetch_add(1, AtomicOrdering::Relaxed);
        format!("enhanced-task-{}", n)
      })
      .enable_all()
      .build()
  }
}

/// Number of available processing units, at least 1.
pub(crate) fn available_parallelism() -> usize {
  std::thread::available_parallelism().map_or(1, |n| n.get())
}

// --- Pool ---

/// Owns every execution spawned by the scheduler so shutdown can wait for or abort them.
#[derive(Debug)]
pub(crate) struct WorkerPool {
  handle: Handle,
  tasks: Mutex<JoinSet<()>>,
  runtime: Mutex<Option<Runtime>>,
}

/// Result of draining the pool at shutdown.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DrainReport {
  pub(crate) panicked: usize,
  pub(crate) aborted: usize,
}

impl WorkerPool {
  /// Uses a dedicated runtime if `config` is given, the ambient one otherwise.
  pub(crate) fn new(ambient: Handle, config: Option<&WorkerPoolConfig>) -> Result<Self, BuildError> {
    let (handle, runtime) = match config {
      Some(config) => {
        let runtime = config
          .build_runtime()
          .map_err(|e| BuildError::WorkerPool(e.to_string()))?;
        info!(
          core_threads = config.core_threads,
          max_threads = config.max_threads,
          keep_alive_ms = config.keep_alive.as_millis(),
          "Dedicated worker pool started."
        );
        (runtime.handle().clone(), Some(runtime))
      }
      None => (ambient, None),
    };
    Ok(Self {
      handle,
      tasks: Mutex::new(JoinSet::new()),
      runtime: Mutex::new(runtime),
    })
  }

  /// Spawns a supervised execution. Finished executions are reaped on the way.
  pub(crate) fn spawn_supervised<F>(&self, execution: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let mut tasks = self.tasks.lock();
    while let Some(result) = tasks.try_join_next() {
      if let Err(e) = result {
        if e.is_panic() {
          error!("Supervised execution panicked: {:?}", e);
        }
      }
    }
    tasks.spawn_on(execution, &self.handle);
  }

  /// Spawns one run of a job body. Dropping the returned guard aborts the body (async bodies
  /// stop at their next await point; blocking bodies run to completion).
  pub(crate) fn spawn_body(&self, job: &Job) -> AbortOnDrop<TaskResult> {
    #[cfg(feature = "job_context")]
    let context = JobContext {
      job_id: job.id(),
      instance_id: job.instance_id(),
      attempt: job.retry_count(),
    };

    let handle = match &job.task {
      Task::Async(exec_fn) => {
        let exec_fn = exec_fn.clone();
        let body = async move { (exec_fn.as_ref())().await };
        #[cfg(feature = "job_context")]
        let body = CURRENT_JOB_CONTEXT.scope(context, body);
        self.handle.spawn(body)
      }
      Task::Blocking(blocking_fn) => {
        let blocking_fn = blocking_fn.clone();
        let body = move || (blocking_fn.as_ref())();
        #[cfg(feature = "job_context")]
        let body = move || CURRENT_JOB_CONTEXT.sync_scope(context, body);
        self.handle.spawn_blocking(body)
      }
    };
    AbortOnDrop(handle)
  }

  /// Waits up to `grace` for every supervised execution, then aborts whatever is left.
  pub(crate) async fn drain(&self, grace: Duration) -> DrainReport {
    let mut tasks = std::mem::take(&mut *self.tasks.lock());
    let deadline = Instant::now() + grace;
    let mut report = DrainReport::default();

    loop {
      match tokio::time::timeout_at(deadline, tasks.join_next()).await {
        Ok(None) => break,
        Ok(Some(Ok(()))) => {}
        Ok(Some(Err(e))) => {
          if e.is_panic() {
            error!("Supervised execution panicked during shutdown: {:?}", e);
            report.panicked += 1;
          }
        }
        Err(_) => {
          report.aborted = tasks.len();
          warn!(
            aborted = report.aborted,
            grace_ms = grace.as_millis(),
            "Grace period elapsed; aborting in-flight executions."
          );
          tasks.shutdown().await;
          break;
        }
      }
    }

    if let Some(runtime) = self.runtime.lock().take() {
      debug!("Shutting down dedicated worker pool.");
      runtime.shutdown_background();
    }
    report
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    if let Some(runtime) = self.runtime.get_mut().take() {
      runtime.shutdown_background();
    }
  }
}

/// A `JoinHandle` that aborts its task when dropped.
#[derive(Debug)]
pub(crate) struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Future for AbortOnDrop<T> {
  type Output = Result<T, JoinError>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    Pin::new(&mut self.0).poll(cx)
  }
}

impl<T> Drop for AbortOnDrop<T> {
  fn drop(&mut self) {
    self.0.abort();
  }
}

// --- Execution ---

/// Runs dispatched instances and applies their outcome.
///
/// Cloned into every supervised execution; all fields are shared handles.
#[derive(Debug, Clone)]
pub(crate) struct Worker {
  pub(crate) pool: Arc<WorkerPool>,
  pub(crate) lanes: Lanes,
  pub(crate) registry: JobRegistry,
  pub(crate) metrics: SchedulerMetrics,
  pub(crate) statistics: StatisticsRecorder,
  pub(crate) execution_timeout: Duration,
  pub(crate) repeat_policy: RepeatPolicy,
}

impl Worker {
  /// Executes one enhanced instance under the execution timeout, releases its admission slot
  /// and offers whatever the retry policy produces.
  pub(crate) async fn execute_enhanced(self, mut job: Job, permit: GatePermit) {
    let span = info_span!(
      "job_exec",
      job_id = %job.id(),
      instance_id = %job.instance_id(),
      job_name = %job.label(),
      priority = job.priority_level(),
      retry_attempt = job.retry_count(),
    );

    async move {
      job.set_status(crate::job::JobStatus::Running);
      self.registry.record_started(&job);
      info!("Starting job execution.");

      let started = Instant::now();
      let outcome = self.run_with_timeout(&job).await;
      let elapsed = started.elapsed();
      permit.release();

      self.record_attempt(&job, &outcome, elapsed);

      let head = match self.repeat_policy {
        RepeatPolicy::OwnCycle => None,
        RepeatPolicy::PromoteHigherPriorityHead => self.lanes.enhanced.peek(),
      };
      let step = retry::decide(&mut job, &outcome, elapsed, head.as_ref(), self.repeat_policy);
      self.registry.record_outcome(&job, attempt_outcome(&outcome));

      match step {
        NextStep::Repeat(next) => {
          debug!(next_instance_id = %next.instance_id(), delay_ms = next.delay().as_millis(), "Job succeeded, scheduling next run.");
          self.schedule(next);
        }
        NextStep::Promoted(next) => {
          info!(
            promoted_job_id = %next.id(),
            promoted_priority = next.priority_level(),
            "Job succeeded; offering a cycle of the higher-priority queue head instead of its own repeat."
          );
          self.registry.end(&job.id());
          self.schedule(next);
        }
        NextStep::Retry { job: next, backoff } => {
          SchedulerMetrics::incr(&self.metrics.jobs_retried);
          self.registry.record_retry(&next.id());
          info!(
            retry_attempt = next.retry_count(),
            max_retries = next.max_retries(),
            backoff_ms = backoff.as_millis(),
            error = next.last_error().unwrap_or_default(),
            "Job failed, scheduling retry."
          );
          self.schedule(next);
        }
        NextStep::Exhausted => {
          SchedulerMetrics::incr(&self.metrics.jobs_permanently_failed);
          error!(
            retries = job.retry_count(),
            error = job.last_error().unwrap_or_default(),
            "Job failed permanently after exhausting retries."
          );
          self.registry.end(&job.id());
        }
      }
    }
    .instrument(span)
    .await
  }

  /// Executes one basic instance. Basic jobs have no timeout and no retries; their next cycle
  /// was already offered by the dispatcher.
  pub(crate) async fn execute_basic(self, job: Job) {
    let span = info_span!(
      "job_exec",
      job_id = %job.id(),
      instance_id = %job.instance_id(),
      job_name = %job.label(),
    );

    async move {
      self.registry.record_started(&job);
      trace!("Starting basic job execution.");

      let started = Instant::now();
      let outcome = classify(self.pool.spawn_body(&job).await);
      let elapsed = started.elapsed();

      self.registry.record_attempt(&job.id(), outcome.is_ok(), elapsed);
      match &outcome {
        Ok(()) => debug!(duration_ms = elapsed.as_millis(), "Basic job finished."),
        Err(e) => {
          if matches!(e, ExecutionError::Panicked(_)) {
            SchedulerMetrics::incr(&self.metrics.jobs_panicked);
          }
          warn!(error = %e, duration_ms = elapsed.as_millis(), "Basic job failed.");
        }
      }
      self
        .registry
        .record_basic_outcome(&job.id(), outcome.err().map(|e| e.to_string()));
    }
    .instrument(span)
    .await
  }

  /// Records `next` as the lineage's queued instance and offers it, unless the lineage was
  /// cancelled in the meantime.
  pub(crate) fn schedule(&self, next: Job) {
    if self.registry.record_scheduled(&next) {
      self.lanes.offer(next);
    } else {
      SchedulerMetrics::incr(&self.metrics.jobs_instance_discarded_cancelled);
      debug!(job_id = %next.id(), "Lineage cancelled; next instance discarded.");
    }
  }

  async fn run_with_timeout(&self, job: &Job) -> Result<(), ExecutionError> {
    let body = self.pool.spawn_body(job);
    match tokio::time::timeout(self.execution_timeout, body).await {
      Ok(joined) => classify(joined),
      Err(_elapsed) => {
        // The guard was dropped with the timeout future, which aborted the body.
        warn!(
          timeout_ms = self.execution_timeout.as_millis(),
          blocking = job.task.is_blocking(),
          "Job execution timed out."
        );
        Err(ExecutionError::TimedOut)
      }
    }
  }

  fn record_attempt(&self, job: &Job, outcome: &Result<(), ExecutionError>, elapsed: Duration) {
    self.metrics.job_execution_duration.record(elapsed);
    self.registry.record_attempt(&job.id(), outcome.is_ok(), elapsed);

    match outcome {
      Ok(()) => {
        SchedulerMetrics::incr(&self.metrics.jobs_executed_success);
        info!(duration_ms = elapsed.as_millis(), outcome = "Success", "Finished job execution.");
      }
      Err(e) => {
        SchedulerMetrics::incr(&self.metrics.jobs_executed_fail);
        match e {
          ExecutionError::TimedOut => SchedulerMetrics::incr(&self.metrics.jobs_timed_out),
          ExecutionError::Panicked(_) => SchedulerMetrics::incr(&self.metrics.jobs_panicked),
          _ => {}
        }
        warn!(duration_ms = elapsed.as_millis(), error = %e, "Finished job execution with failure.");
      }
    }
  }
}

/// Maps the joined body into the attempt classification.
fn classify(joined: Result<TaskResult, JoinError>) -> Result<(), ExecutionError> {
  match joined {
    Ok(Ok(())) => Ok(()),
    Ok(Err(e)) => Err(ExecutionError::Failed(e.to_string())),
    Err(join_error) if join_error.is_panic() => Err(ExecutionError::Panicked(panic_message(
      join_error.into_panic(),
    ))),
    Err(_) => Err(ExecutionError::Interrupted),
  }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic payload".to_string()
  }
}

fn attempt_outcome(outcome: &Result<(), ExecutionError>) -> AttemptOutcome {
  match outcome {
    Ok(()) => AttemptOutcome::Succeeded,
    Err(ExecutionError::TimedOut) => AttemptOutcome::TimedOut,
    Err(_) => AttemptOutcome::Failed,
  }
}
