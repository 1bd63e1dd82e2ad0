use crate::errors::JobFailure;
use crate::job_registry::JobRegistry;
use crate::metrics::record_job_outcome;
use crate::util::{try_to_extract_panic_info, with_sentry_transaction};
use crate::retry;
use crate::storage::{self, Claim};
use futures_util::FutureExt;
use rand::Rng;
use sentry_core::{Hub, SentryFutureExt};
use sqlx::PgPool;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{Instrument, debug, info, info_span, trace, warn};

/// Claims that lose a race with another worker are retried this many times
/// before handing control back to the loop.
const MAX_CLAIM_RETRIES: usize = 5;

/// What a single call to [`Worker::process_once`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Processed {
    /// A job was run, whether it succeeded or not.
    Job,
    /// No job was ready to run.
    NothingReady,
    /// Every claim lost a race with another worker, so jobs may still be ready.
    Contended,
}

pub(crate) struct Worker<Context> {
    pub(crate) connection_pool: PgPool,
    pub(crate) context: Context,
    pub(crate) job_registry: Arc<JobRegistry<Context>>,
    pub(crate) shutdown_when_queue_empty: bool,
    pub(crate) poll_interval: Duration,
    pub(crate) jitter: Duration,
}

impl<Context: Clone + Send + Sync + 'static> Worker<Context> {
    /// Calculate the sleep duration with random jitter applied.
    fn sleep_duration_with_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.poll_interval;
        }

        let jitter_millis = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let random_jitter = rand::thread_rng().gen_range(0..=jitter_millis);
        self.poll_interval + Duration::from_millis(random_jitter)
    }

    /// Run background jobs forever, or until the queue is empty if
    /// `shutdown_when_queue_empty` is set.
    ///
    /// Failures of individual jobs are recorded on the job. Any other error
    /// (usually the database going away) ends the loop.
    pub(crate) async fn run(&self) -> anyhow::Result<()> {
        loop {
            match self.process_once().await? {
                Processed::Job | Processed::Contended => continue,
                Processed::NothingReady => {}
            }

            if self.shutdown_when_queue_empty {
                debug!("No pending background jobs found. Shutting down the worker…");
                return Ok(());
            }

            let sleep_duration = self.sleep_duration_with_jitter();
            trace!("No pending background jobs found. Polling again in {sleep_duration:?}…");
            sleep(sleep_duration).await;
        }
    }

    /// Claim and run the next ready job, if there is one.
    ///
    /// Returns an error only if talking to the database failed.
    pub(crate) async fn process_once(&self) -> anyhow::Result<Processed> {
        trace!("Looking for next background job…");

        let mut retries = 0;
        let (mut tx, mut job) = loop {
            // The transaction holds the job's row lock until the outcome is committed
            let mut tx = storage::begin_claim_tx(&self.connection_pool).await?;

            match storage::claim_one(&mut tx).await? {
                Claim::Job(job) => break (tx, job),
                Claim::Empty => {
                    tx.rollback().await?;
                    return Ok(Processed::NothingReady);
                }
                Claim::Contended => {
                    tx.rollback().await?;
                    retries += 1;
                    if retries > MAX_CLAIM_RETRIES {
                        debug!(retries, "Claims keep losing races, yielding to the loop");
                        return Ok(Processed::Contended);
                    }
                    trace!("Another worker updated a candidate job, claiming again…");
                }
            }
        };

        let span = info_span!("job", job.id = %job.id, job.type = %job.job_type);

        let attempt_count = storage::increment_attempt_count(&mut tx, job.id).await?;
        span.in_scope(|| debug!(attempt_count, "Running job…"));

        let context = self.context.clone();
        let job_registry = self.job_registry.clone();
        let job_type = job.job_type.clone();
        let payload = std::mem::take(&mut job.payload);

        let future = with_sentry_transaction(&job.job_type, || async move {
            AssertUnwindSafe(job_registry.run(&job_type, context, payload))
                .catch_unwind()
                .await
                .map_err(|e| JobFailure::Panic(try_to_extract_panic_info(&*e)))
                .and_then(std::convert::identity)
        });

        let result = future
            .instrument(span.clone())
            .bind_hub(Hub::current())
            .await;

        async move {
            let failure_kind = result.as_ref().err().map_or("", JobFailure::kind);
            if let Err(failure) = &result {
                warn!(failure.kind = failure_kind, "Failed to run job: {failure}");
            }

            let transition = retry::next_transition(
                attempt_count,
                job.max_attempts,
                job.next_attempt_after,
                result.err().map(|failure| failure.details()),
            );

            storage::apply_transition(&mut tx, job.id, &transition).await?;
            tx.commit().await?;
            record_job_outcome(&job.job_type, transition.state, attempt_count, failure_kind);

            if transition.state.is_terminal() {
                info!(attempt_count, state = %transition.state, "Job finished");
            } else {
                info!(
                    attempt_count,
                    next_attempt_after = %transition.next_attempt_after,
                    "Job errored, retrying later"
                );
            }

            Ok::<_, sqlx::Error>(())
        }
        .instrument(span)
        .await?;

        Ok(Processed::Job)
    }
}
