use std::fmt;
use thiserror::Error;

/// Errors that can occur while enqueueing a job.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The job payload could not be serialized.
    #[error(transparent)]
    SerializationError(#[from] serde_json::Error),

    /// The insert into the job table failed.
    #[error(transparent)]
    DatabaseError(#[from] sqlx::Error),
}

/// Why a single attempt of a job did not succeed.
///
/// Every variant is handled the same way by the retry policy; the distinction
/// only shows up in logs, `failure_info` and the `failure_kind` metric label.
#[derive(Debug, Error)]
pub enum JobFailure {
    /// No handler is registered for the job's type.
    #[error("unknown job type {0:?}")]
    UnknownJobType(String),

    /// The payload does not match what the job type expects.
    #[error("failed to decode payload: {0}")]
    Decode(#[source] serde_json::Error),

    /// The handler returned an error.
    #[error(transparent)]
    Handler(anyhow::Error),

    /// The handler panicked.
    #[error("job panicked: {0}")]
    Panic(PanicMessage),
}

impl JobFailure {
    /// Short label naming the class of failure.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownJobType(_) => "unknown_job_type",
            Self::Decode(_) => "decode",
            Self::Handler(_) => "handler",
            Self::Panic(_) => "panic",
        }
    }

    /// The text persisted to `failure_info`, including the full error chain.
    pub fn details(&self) -> String {
        match self {
            Self::Handler(error) => format!("{error:?}"),
            other => other.to_string(),
        }
    }
}

/// Message recovered from a panic payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicMessage(pub(crate) Option<String>);

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(message) => f.write_str(message),
            None => f.write_str("<non-string panic payload>"),
        }
    }
}
