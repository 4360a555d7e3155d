use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Counting semaphore bounding how many enhanced executions may be in flight at once.
///
/// Cloning the gate shares the same slots.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
  semaphore: Arc<Semaphore>,
  capacity: usize,
}

impl AdmissionGate {
  pub fn new(capacity: usize) -> Self {
    Self {
      semaphore: Arc::new(Semaphore::new(capacity)),
      capacity,
    }
  }

  /// Waits up to `timeout` for a free slot.
  ///
  /// Returns `None` if no slot became free in time or the gate was closed. The returned
  /// permit gives its slot back when dropped, so release happens exactly once on every path.
  pub async fn try_acquire(&self, timeout: Duration) -> Option<GatePermit> {
    match tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await {
      Ok(Ok(permit)) => {
        trace!(in_use = self.in_use(), "Admission slot acquired.");
        Some(GatePermit { _permit: permit })
      }
      Ok(Err(_closed)) => {
        trace!("Admission gate closed; slot not granted.");
        None
      }
      Err(_elapsed) => None,
    }
  }

  /// Takes a slot only if one is free right now.
  pub fn try_acquire_now(&self) -> Option<GatePermit> {
    self
      .semaphore
      .clone()
      .try_acquire_owned()
      .ok()
      .map(|permit| GatePermit { _permit: permit })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Number of slots currently free.
  pub fn available(&self) -> usize {
    self.semaphore.available_permits()
  }

  /// Number of slots currently held by executions.
  pub fn in_use(&self) -> usize {
    self.capacity.saturating_sub(self.available())
  }

  /// Stops granting new slots. Waiters are woken and receive `None`; held permits stay valid.
  pub(crate) fn close(&self) {
    self.semaphore.close();
  }

  pub fn is_closed(&self) -> bool {
    self.semaphore.is_closed()
  }
}

/// One admission slot, held for the duration of an execution attempt.
#[derive(Debug)]
#[must_use = "dropping the permit releases the slot immediately"]
pub struct GatePermit {
  _permit: OwnedSemaphorePermit,
}

impl GatePermit {
  /// Gives the slot back. Equivalent to dropping the permit.
  pub fn release(self) {
    drop(self);
  }
}
