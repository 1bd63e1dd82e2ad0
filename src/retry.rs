//! The retry state machine applied after every attempt of a job.

use crate::schema::JobState;
use chrono::{DateTime, TimeDelta, Utc};

/// Base delay of the exponential backoff.
pub const BACKOFF_BASE_SECS: i64 = 15;

/// What to persist for a job after one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// The state the job moves to
    pub state: JobState,
    /// When the job may be attempted again (unchanged unless the job errored)
    pub next_attempt_after: DateTime<Utc>,
    /// Failure details to record, `None` on success
    pub failure_info: Option<String>,
}

/// Delay added after the attempt numbered `attempt_count` fails.
///
/// `15s * 2^attempt_count`, saturating instead of overflowing for absurd attempt counts.
pub fn backoff(attempt_count: i32) -> TimeDelta {
    let exponent = u32::try_from(attempt_count.max(0)).unwrap_or(0).min(40);
    TimeDelta::try_seconds(BACKOFF_BASE_SECS.saturating_mul(1_i64 << exponent))
        .unwrap_or(TimeDelta::MAX)
}

/// Computes the next state of a job.
///
/// `attempt_count` is the count *including* the attempt that just ran.
/// `failure` carries the captured failure details, or `None` if the handler succeeded.
pub fn next_transition(
    attempt_count: i32,
    max_attempts: i32,
    next_attempt_after: DateTime<Utc>,
    failure: Option<String>,
) -> Transition {
    let Some(details) = failure else {
        return Transition {
            state: JobState::Completed,
            next_attempt_after,
            failure_info: None,
        };
    };

    if attempt_count >= max_attempts {
        Transition {
            state: JobState::Failed,
            next_attempt_after,
            failure_info: Some(details),
        }
    } else {
        Transition {
            state: JobState::Errored,
            next_attempt_after: next_attempt_after
                .checked_add_signed(backoff(attempt_count))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            failure_info: Some(details),
        }
    }
}
