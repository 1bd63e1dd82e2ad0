use crate::retry::Transition;
use crate::schema::{BackgroundJob, JobState};
use sqlx::{Executor, PgPool, Postgres, Transaction};

const JOB_COLUMNS: &str = "id, job_type, payload, state, attempt_count, max_attempts, \
                           next_attempt_after, failure_info, created_at";

/// SQLSTATE raised by `REPEATABLE READ` when a row changed after our snapshot was taken.
const SERIALIZATION_FAILURE: &str = "40001";

/// Inserts a new job that is ready to run immediately.
pub async fn enqueue_raw<'e, E>(
    executor: E,
    job_type: &str,
    payload: &[u8],
    max_attempts: i32,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar::<_, i64>(
        r"
        INSERT INTO background_jobs
            (job_type, payload, state, attempt_count, max_attempts, next_attempt_after)
        VALUES ($1, $2, 'queued', 0, $3, NOW())
        RETURNING id
        ",
    )
    .bind(job_type)
    .bind(payload)
    .bind(max_attempts)
    .fetch_one(executor)
    .await
}

/// Starts the transaction a job is claimed and processed in.
///
/// `REPEATABLE READ` together with `FOR UPDATE SKIP LOCKED` guarantees that only
/// one transaction can ever see and modify a given job at a time.
pub(crate) async fn begin_claim_tx(
    pool: &PgPool,
) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

/// Result of looking for a job inside a claim transaction.
#[derive(Debug)]
pub(crate) enum Claim {
    /// A ready job, locked until the transaction ends.
    Job(BackgroundJob),
    /// No job is ready to run.
    Empty,
    /// Another worker finished a job after our snapshot was taken. The
    /// transaction is aborted and the claim has to be retried in a new one.
    Contended,
}

/// Finds a job that is ready to run and locks it for the rest of the transaction.
///
/// Rows locked by other transactions are skipped rather than waited on.
pub(crate) async fn claim_one(tx: &mut Transaction<'_, Postgres>) -> Result<Claim, sqlx::Error> {
    let result = sqlx::query_as::<_, BackgroundJob>(&format!(
        r"
        SELECT {JOB_COLUMNS}
        FROM background_jobs
        WHERE state IN ('queued', 'errored')
          AND next_attempt_after <= NOW()
        LIMIT 1
        FOR UPDATE SKIP LOCKED
        "
    ))
    .fetch_optional(&mut **tx)
    .await;

    match result {
        Ok(Some(job)) => Ok(Claim::Job(job)),
        Ok(None) => Ok(Claim::Empty),
        Err(sqlx::Error::Database(error))
            if error.code().as_deref() == Some(SERIALIZATION_FAILURE) =>
        {
            Ok(Claim::Contended)
        }
        Err(error) => Err(error),
    }
}

/// Charges one attempt against a claimed job and returns the new count.
///
/// Rolling back the transaction undoes this, so crashed attempts are free.
pub(crate) async fn increment_attempt_count(
    tx: &mut Transaction<'_, Postgres>,
    job_id: i64,
) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar::<_, i32>(
        r"
        UPDATE background_jobs
        SET attempt_count = attempt_count + 1
        WHERE id = $1
        RETURNING attempt_count
        ",
    )
    .bind(job_id)
    .fetch_one(&mut **tx)
    .await
}

/// Persists the outcome of an attempt.
pub(crate) async fn apply_transition(
    tx: &mut Transaction<'_, Postgres>,
    job_id: i64,
    transition: &Transition,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"
        UPDATE background_jobs
        SET state = $2,
            next_attempt_after = $3,
            failure_info = COALESCE($4, failure_info)
        WHERE id = $1
        ",
    )
    .bind(job_id)
    .bind(transition.state)
    .bind(transition.next_attempt_after)
    .bind(transition.failure_info.as_deref())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Loads a single job by id.
pub async fn get_job(pool: &PgPool, job_id: i64) -> Result<Option<BackgroundJob>, sqlx::Error> {
    sqlx::query_as::<_, BackgroundJob>(&format!(
        "SELECT {JOB_COLUMNS} FROM background_jobs WHERE id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await
}

/// All jobs currently in `state`, oldest first.
pub async fn jobs_in_state(
    pool: &PgPool,
    state: JobState,
) -> Result<Vec<BackgroundJob>, sqlx::Error> {
    sqlx::query_as::<_, BackgroundJob>(&format!(
        "SELECT {JOB_COLUMNS} FROM background_jobs WHERE state = $1 ORDER BY id ASC"
    ))
    .bind(state)
    .fetch_all(pool)
    .await
}

/// The number of jobs that have permanently failed
pub async fn failed_job_count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM background_jobs WHERE state = 'failed'")
        .fetch_one(pool)
        .await
}

/// The number of jobs still waiting to run, whether or not their backoff has elapsed
pub async fn pending_job_count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM background_jobs WHERE state IN ('queued', 'errored')",
    )
    .fetch_one(pool)
    .await
}
