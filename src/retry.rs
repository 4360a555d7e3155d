//! Outcome handling for enhanced jobs: repeat on success, exponential backoff on failure.

use crate::error::ExecutionError;
use crate::job::{Job, JobStatus};

use std::time::Duration;

/// What a successful enhanced execution schedules next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RepeatPolicy {
  /// Every job schedules its own next cycle.
  #[default]
  OwnCycle,
  /// If the queue head is an enhanced job with a strictly lower priority level (higher
  /// priority) than the job that just succeeded, a fresh cycle of the head's job is offered
  /// in place of the finished job's own repeat, and the finished lineage ends.
  PromoteHigherPriorityHead,
}

/// The follow-up produced for a finished enhanced instance.
#[derive(Debug)]
pub(crate) enum NextStep {
  /// Next cycle of the same lineage, retry counter reset.
  Repeat(Job),
  /// A cycle of another lineage offered in place of this lineage's repeat.
  Promoted(Job),
  /// Retry instance of the same lineage, due after `backoff`.
  Retry { job: Job, backoff: Duration },
  /// Retry budget used up; the lineage ends as `Failed`.
  Exhausted,
}

/// Backoff before retry number `retry_count`: `interval × 2^retry_count` in whole
/// milliseconds, saturating instead of overflowing.
pub(crate) fn backoff_delay(interval: Duration, retry_count: u32) -> Duration {
  let base_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
  let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
  Duration::from_millis(base_ms.saturating_mul(factor))
}

/// Applies the outcome of one attempt to `job` (status, retry counter, error, duration) and
/// returns what should be offered next.
///
/// `head` is the current queue head, only consulted under
/// [`RepeatPolicy::PromoteHigherPriorityHead`].
pub(crate) fn decide(
  job: &mut Job,
  outcome: &Result<(), ExecutionError>,
  elapsed: Duration,
  head: Option<&Job>,
  policy: RepeatPolicy,
) -> NextStep {
  let Some(enhancement) = job.enhancement.as_mut() else {
    return NextStep::Repeat(job.next_cycle());
  };

  match outcome {
    Ok(()) => {
      enhancement.status = JobStatus::Completed;
      enhancement.last_execution_time = Some(elapsed);

      let own_level = enhancement.priority_level;
      let promoted = match policy {
        RepeatPolicy::OwnCycle => None,
        RepeatPolicy::PromoteHigherPriorityHead => head
          .filter(|h| h.is_enhanced() && h.priority_level() < own_level)
          .map(Job::next_cycle),
      };
      match promoted {
        Some(head_cycle) => NextStep::Promoted(head_cycle),
        None => NextStep::Repeat(job.next_cycle()),
      }
    }
    Err(error) => {
      enhancement.last_error = Some(error.to_string());
      if enhancement.retry_count < enhancement.max_retries {
        enhancement.retry_count += 1;
        enhancement.status = JobStatus::Pending;
        let backoff = backoff_delay(job.interval, job.retry_count());
        NextStep::Retry {
          job: job.retry_instance(backoff),
          backoff,
        }
      } else {
        enhancement.status = JobStatus::Failed;
        NextStep::Exhausted
      }
    }
  }
}
