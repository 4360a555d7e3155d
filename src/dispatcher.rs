use crate::gate::AdmissionGate;
use crate::job::{Job, JobKind};
use crate::metrics::SchedulerMetrics;
use crate::queue::{DelayQueue, QueuedJob};
use crate::worker::Worker;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

/// Shutdown modes signaled to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShutdownMode {
  /// Stop dispatching; in-flight executions get the grace period.
  Graceful,
  /// Stop dispatching; in-flight executions are aborted right away.
  Force,
}

/// The dispatch task of one lane. A scheduler runs one for basic and one for enhanced jobs.
///
/// Takes the minimum-key instance from its queue; fires it if due, otherwise puts it back and
/// parks until its due time. Only the enhanced lane waits on the admission gate. Parking ends early on shutdown and, when `wake_on_offer` is set,
/// on any new offer. With `wake_on_offer` off, an instance offered while the dispatcher is
/// parked on a later-due head is only seen once that head's due time passes.
pub(crate) struct Dispatcher {
  lane: JobKind,
  queue: Arc<DelayQueue>,
  gate: AdmissionGate,
  worker: Worker,
  shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
  admission_timeout: Duration,
  wake_on_offer: bool,
}

/// Whether the loop keeps going after handling one instance.
enum Flow {
  Continue,
  Stop,
}

impl Dispatcher {
  pub(crate) fn new(
    lane: JobKind,
    queue: Arc<DelayQueue>,
    gate: AdmissionGate,
    worker: Worker,
    shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
    admission_timeout: Duration,
    wake_on_offer: bool,
  ) -> Self {
    Self {
      lane,
      queue,
      gate,
      worker,
      shutdown_rx,
      admission_timeout,
      wake_on_offer,
    }
  }

  /// Runs the dispatch loop until shutdown is signaled or the scheduler handle is dropped.
  pub(crate) async fn run(mut self) {
    info!(
      lane = ?self.lane,
      capacity = self.gate.capacity(),
      wake_on_offer = self.wake_on_offer,
      "Dispatcher started."
    );

    loop {
      if self.is_shutting_down() {
        break;
      }

      let queued = tokio::select! {
        biased;

        changed = self.shutdown_rx.changed() => {
          if changed.is_err() {
            info!("Scheduler handle dropped; dispatcher exiting.");
            break;
          }
          continue;
        }

        queued = self.queue.take() => queued,
      };

      if let Flow::Stop = self.handle(queued).await {
        break;
      }
    }

    if let Some(mode) = *self.shutdown_rx.borrow() {
      info!(lane = ?self.lane, ?mode, "Dispatcher received shutdown signal.");
    }
    info!(lane = ?self.lane, queued = self.queue.len(), "Dispatcher task shutting down.");
  }

  fn is_shutting_down(&self) -> bool {
    self.shutdown_rx.borrow().is_some() || self.shutdown_rx.has_changed().is_err()
  }

  async fn handle(&mut self, queued: QueuedJob) -> Flow {
    let job = &queued.job;

    if !self.worker.registry.is_live(&job.id()) {
      info!(job_id = %job.id(), instance_id = %job.instance_id(), "Discarding cancelled job instance taken from the queue.");
      SchedulerMetrics::incr(&self.worker.metrics.jobs_instance_discarded_cancelled);
      self.worker.registry.clear_instance(&job.id(), &job.instance_id());
      return Flow::Continue;
    }

    if job.is_due(Instant::now()) {
      return self.fire(queued.job).await;
    }

    let due_at = job.due_at();
    trace!(
      job_id = %job.id(),
      wait_ms = due_at.saturating_duration_since(Instant::now()).as_millis(),
      "Head not yet due; parking."
    );
    self.queue.requeue(queued);

    tokio::select! {
      biased;

      changed = self.shutdown_rx.changed() => {
        if changed.is_err() {
          return Flow::Stop;
        }
      }

      _ = sleep_until(due_at) => {}

      _ = self.queue.offered(), if self.wake_on_offer => {
        trace!("Woken early by a new offer.");
      }
    }
    Flow::Continue
  }

  async fn fire(&mut self, job: Job) -> Flow {
    if !job.is_enhanced() {
      self.fire_basic(job);
      return Flow::Continue;
    }

    let permit = tokio::select! {
      biased;

      _ = self.shutdown_rx.changed() => {
        debug!(job_id = %job.id(), "Shutdown while waiting for an admission slot; instance not started.");
        return Flow::Stop;
      }

      permit = self.gate.try_acquire(self.admission_timeout) => permit,
    };

    match permit {
      Some(permit) => {
        trace!(job_id = %job.id(), instance_id = %job.instance_id(), "Dispatching enhanced job.");
        let execution = self.worker.clone().execute_enhanced(job, permit);
        self.worker.pool.spawn_supervised(execution);
      }
      None => {
        warn!(
          job_id = %job.id(),
          instance_id = %job.instance_id(),
          admission_timeout_ms = self.admission_timeout.as_millis(),
          in_use = self.gate.in_use(),
          "No admission slot within the timeout; dropping this cycle."
        );
        SchedulerMetrics::incr(&self.worker.metrics.jobs_admission_dropped);
        self.worker.registry.mark_admission_dropped(&job);
      }
    }
    Flow::Continue
  }

  /// Hands a basic instance to the pool and offers its next cycle right away.
  fn fire_basic(&self, job: Job) {
    SchedulerMetrics::incr(&self.worker.metrics.basic_jobs_fired);
    let next = job.next_cycle();
    debug!(
      job_id = %job.id(),
      next_instance_id = %next.instance_id(),
      delay_ms = next.delay().as_millis(),
      "Firing basic job and scheduling next run."
    );
    self.worker.schedule(next);

    let execution = self.worker.clone().execute_basic(job);
    self.worker.pool.spawn_supervised(execution);
  }
}
