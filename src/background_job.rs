use crate::errors::EnqueueError;
use crate::storage;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use std::future::Future;
use tracing::instrument;

/// Number of attempts a job gets unless its type says otherwise.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// Trait for defining background jobs that can be enqueued and executed asynchronously.
pub trait BackgroundJob: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique name of the task.
    ///
    /// This MUST be unique for the whole application.
    const JOB_TYPE: &'static str;

    /// How many times a failing job of this type is attempted before it is
    /// marked as failed. Must be at least 1.
    const MAX_ATTEMPTS: i32 = DEFAULT_MAX_ATTEMPTS;

    /// The application data provided to this job at runtime.
    type Context: Clone + Send + 'static;

    /// Execute the task. This method should define its logic.
    fn run(&self, ctx: Self::Context) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Serializes the job into the opaque payload stored alongside it.
    fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decodes a stored payload back into the job.
    fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Enqueue this job for background execution.
    ///
    /// Returns the id of the inserted job.
    #[instrument(name = "jobqueue.enqueue", skip(self, pool), fields(message = Self::JOB_TYPE))]
    fn enqueue<'a>(&'a self, pool: &'a PgPool) -> BoxFuture<'a, Result<i64, EnqueueError>> {
        let payload = match self.to_payload() {
            Ok(payload) => payload,
            Err(err) => return async move { Err(EnqueueError::SerializationError(err)) }.boxed(),
        };

        async move {
            let id =
                storage::enqueue_raw(pool, Self::JOB_TYPE, &payload, Self::MAX_ATTEMPTS).await?;
            Ok(id)
        }
        .boxed()
    }
}

/// Something jobs can be inserted into.
///
/// The scheduler only needs to insert rows, so it is generic over this rather
/// than tied to a pool.
pub trait Enqueue: Send + Sync {
    /// Inserts a ready-to-run job and returns its id.
    fn enqueue(
        &self,
        job_type: &str,
        payload: &[u8],
        max_attempts: i32,
    ) -> impl Future<Output = Result<i64, EnqueueError>> + Send;
}

impl Enqueue for PgPool {
    async fn enqueue(
        &self,
        job_type: &str,
        payload: &[u8],
        max_attempts: i32,
    ) -> Result<i64, EnqueueError> {
        Ok(storage::enqueue_raw(self, job_type, payload, max_attempts).await?)
    }
}
