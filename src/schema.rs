//! Database schema definitions for SQLx.
//!
//! This module contains the database types and structures for the background job system.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::fmt;

/// Lifecycle state of a background job.
///
/// `Completed` and `Failed` are terminal; a job only leaves `Queued` or
/// `Errored` through a worker claiming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, sqlx::Type)]
#[sqlx(type_name = "background_job_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for its first attempt
    Queued,
    /// Failed at least once, waiting for the next attempt
    Errored,
    /// Ran successfully
    Completed,
    /// Ran out of attempts
    Failed,
}

impl JobState {
    /// The label used for this state in the database and in metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Errored => "errored",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transition can happen from this state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a background job record in the database
#[derive(Debug, Clone, FromRow)]
pub struct BackgroundJob {
    /// Unique identifier for the job
    pub id: i64,
    /// Type identifier for the job (used for dispatch)
    pub job_type: String,
    /// Serialized job payload, decoded by the handler registered for `job_type`
    pub payload: Vec<u8>,
    /// Current lifecycle state
    pub state: JobState,
    /// Number of times the job has been claimed by a worker
    pub attempt_count: i32,
    /// Number of attempts after which a failing job is given up on
    pub max_attempts: i32,
    /// The job cannot be claimed before this point in time
    pub next_attempt_after: DateTime<Utc>,
    /// Details of the last failure, empty until the job first fails
    pub failure_info: String,
    /// Timestamp when the job was created
    pub created_at: DateTime<Utc>,
}
