//! Job outcome metrics.
//!
//! Recorded through the `metrics` facade, so nothing is exported unless the
//! application installs a recorder. Recording never fails.

use crate::schema::JobState;
use ::metrics::counter;

/// Name of the counter incremented once per finished attempt.
pub const JOBS_COUNTER: &str = "background_jobs_total";

/// Count one attempt of a job, labelled by its outcome.
///
/// `failure_kind` is empty for successful attempts.
pub(crate) fn record_job_outcome(
    job_type: &str,
    state: JobState,
    attempt_count: i32,
    failure_kind: &'static str,
) {
    counter!(
        JOBS_COUNTER,
        "job_type" => job_type.to_string(),
        "state" => state.as_str(),
        "attempt_count" => attempt_count.to_string(),
        "failure_kind" => failure_kind
    )
    .increment(1);
}
