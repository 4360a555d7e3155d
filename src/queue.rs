//! The priority-ordered delay queue shared between submitters, the dispatcher and workers.
//!
//! Jobs are keyed by `(priority_level, due_at, seq)`: lower priority level first, then earlier
//! due time, then insertion order. The job payloads live in a map keyed by instance ID; the
//! ordering index only stores keys, so a lazily removed instance simply leaves a stale index
//! entry behind that is skipped when it surfaces.
//!
//! A scheduler keeps one queue per job kind ([`Lanes`]), each drained by its own dispatcher.

use crate::job::{InstanceId, Job, PriorityLevel};
use crate::scheduler::PriorityQueueType;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
#[cfg(feature = "priority_queue_handle_based")]
use priority_queue::PriorityQueue;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Ordering key of a queued instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct QueueKey {
  priority_level: PriorityLevel,
  due_at: Instant,
  seq: u64,
}

/// A job removed from the queue together with the key it was queued under.
#[derive(Debug)]
pub(crate) struct QueuedJob {
  pub(crate) key: QueueKey,
  pub(crate) job: Job,
}

/// Enum abstracting the underlying ordering index.
#[derive(Debug)]
enum QueueIndex {
  Binary(BinaryHeap<Reverse<(QueueKey, InstanceId)>>),
  #[cfg(feature = "priority_queue_handle_based")]
  Handle(PriorityQueue<InstanceId, Reverse<QueueKey>>),
}

impl QueueIndex {
  fn new(pq_type: PriorityQueueType) -> Self {
    match pq_type {
      PriorityQueueType::BinaryHeap => QueueIndex::Binary(BinaryHeap::new()),
      #[cfg(feature = "priority_queue_handle_based")]
      PriorityQueueType::HandleBased => QueueIndex::Handle(PriorityQueue::new()),
    }
  }

  fn push(&mut self, key: QueueKey, instance_id: InstanceId) {
    match self {
      QueueIndex::Binary(heap) => heap.push(Reverse((key, instance_id))),
      #[cfg(feature = "priority_queue_handle_based")]
      QueueIndex::Handle(pq) => {
        pq.push(instance_id, Reverse(key));
      }
    }
  }

  fn peek(&self) -> Option<InstanceId> {
    match self {
      QueueIndex::Binary(heap) => heap.peek().map(|Reverse((_, id))| *id),
      #[cfg(feature = "priority_queue_handle_based")]
      QueueIndex::Handle(pq) => pq.peek().map(|(id, _)| *id),
    }
  }

  fn pop(&mut self) -> Option<(QueueKey, InstanceId)> {
    match self {
      QueueIndex::Binary(heap) => heap.pop().map(|Reverse(entry)| entry),
      #[cfg(feature = "priority_queue_handle_based")]
      QueueIndex::Handle(pq) => pq.pop().map(|(id, Reverse(key))| (key, id)),
    }
  }

  /// Removes an entry. Only effective for `HandleBased`; `BinaryHeap` entries go stale instead.
  fn remove(&mut self, instance_id: &InstanceId) -> bool {
    match self {
      QueueIndex::Binary(_) => false,
      #[cfg(feature = "priority_queue_handle_based")]
      QueueIndex::Handle(pq) => pq.remove(instance_id).is_some(),
    }
  }
}

#[derive(Debug)]
struct QueueState {
  index: QueueIndex,
  jobs: HashMap<InstanceId, Job>,
  next_seq: u64,
}

impl QueueState {
  fn insert(&mut self, key: QueueKey, job: Job) {
    self.index.push(key, job.instance_id);
    self.jobs.insert(job.instance_id, job);
  }

  fn next_key(&mut self, job: &Job) -> QueueKey {
    let seq = self.next_seq;
    self.next_seq += 1;
    QueueKey {
      priority_level: job.priority_level(),
      due_at: job.due_at,
      seq,
    }
  }

  /// Returns the live head, dropping stale index entries on the way.
  fn head(&mut self) -> Option<InstanceId> {
    loop {
      let id = self.index.peek()?;
      if self.jobs.contains_key(&id) {
        return Some(id);
      }
      self.index.pop();
    }
  }

  fn pop(&mut self) -> Option<QueuedJob> {
    loop {
      let (key, id) = self.index.pop()?;
      if let Some(job) = self.jobs.remove(&id) {
        return Some(QueuedJob { key, job });
      }
    }
  }
}

/// Thread-safe, blocking, priority-ordered delay queue.
///
/// `offer` may be called from any thread. `take` suspends the calling task until a job is
/// present. A single consumer (the lane's dispatcher) is assumed for the wake-up signal.
#[derive(Debug)]
pub(crate) struct DelayQueue {
  state: Mutex<QueueState>,
  offered: Notify,
}

impl DelayQueue {
  pub(crate) fn new(pq_type: PriorityQueueType) -> Self {
    Self {
      state: Mutex::new(QueueState {
        index: QueueIndex::new(pq_type),
        jobs: HashMap::new(),
        next_seq: 0,
      }),
      offered: Notify::new(),
    }
  }

  /// Inserts a job and wakes the consumer.
  pub(crate) fn offer(&self, job: Job) {
    {
      let mut state = self.state.lock();
      let key = state.next_key(&job);
      state.insert(key, job);
    }
    self.offered.notify_one();
  }

  /// Puts a job taken from the queue back under its original key, without waking the consumer.
  pub(crate) fn requeue(&self, queued: QueuedJob) {
    self.state.lock().insert(queued.key, queued.job);
  }

  /// Waits until a job is present, then removes and returns the minimum-key job.
  pub(crate) async fn take(&self) -> QueuedJob {
    loop {
      if let Some(queued) = self.try_take() {
        return queued;
      }
      self.offered.notified().await;
    }
  }

  pub(crate) fn try_take(&self) -> Option<QueuedJob> {
    self.state.lock().pop()
  }

  /// Resolves the next time a job is offered (or immediately if an offer is already pending).
  pub(crate) async fn offered(&self) {
    self.offered.notified().await;
  }

  /// Returns a copy of the minimum-key job without removing it.
  pub(crate) fn peek(&self) -> Option<Job> {
    let mut state = self.state.lock();
    let head = state.head()?;
    state.jobs.get(&head).cloned()
  }

  /// Removes a queued instance. `HandleBased` queues drop the index entry as well;
  /// `BinaryHeap` queues leave it to be skipped when it reaches the head.
  pub(crate) fn remove(&self, instance_id: &InstanceId) -> Option<Job> {
    let mut state = self.state.lock();
    let job = state.jobs.remove(instance_id)?;
    state.index.remove(instance_id);
    Some(job)
  }

  pub(crate) fn len(&self) -> usize {
    self.state.lock().jobs.len()
  }
}

/// The basic and enhanced queues of a scheduler.
///
/// Basic instances all share one priority level, so their queue is ordered by due time. An
/// enhanced head that is not yet due, or an enhanced instance waiting for admission, never
/// holds back a due basic instance.
#[derive(Debug, Clone)]
pub(crate) struct Lanes {
  pub(crate) basic: Arc<DelayQueue>,
  pub(crate) enhanced: Arc<DelayQueue>,
}

impl Lanes {
  pub(crate) fn new(pq_type: PriorityQueueType) -> Self {
    Self {
      basic: Arc::new(DelayQueue::new(pq_type)),
      enhanced: Arc::new(DelayQueue::new(pq_type)),
    }
  }

  pub(crate) fn for_job(&self, job: &Job) -> &Arc<DelayQueue> {
    if job.is_enhanced() {
      &self.enhanced
    } else {
      &self.basic
    }
  }

  /// Offers `job` to the queue of its kind.
  pub(crate) fn offer(&self, job: Job) {
    self.for_job(&job).offer(job);
  }

  pub(crate) fn remove(&self, instance_id: &InstanceId) -> Option<Job> {
    self
      .enhanced
      .remove(instance_id)
      .or_else(|| self.basic.remove(instance_id))
  }

  pub(crate) fn len(&self) -> usize {
    self.basic.len() + self.enhanced.len()
  }
}
