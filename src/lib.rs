#![doc = include_str!("../README.md")]

mod background_job;
mod errors;
mod job_registry;
pub mod metrics;
pub mod retry;
mod runner;
mod schedule;
pub mod scheduler;
pub mod schema;
mod storage;
pub mod supervisor;
mod util;
mod worker;

/// The main trait for defining background jobs.
pub use self::background_job::{BackgroundJob, DEFAULT_MAX_ATTEMPTS, Enqueue};
/// Error types for enqueueing and running jobs.
pub use self::errors::{EnqueueError, JobFailure, PanicMessage};
/// The main runner that orchestrates job processing.
pub use self::runner::{Configured, RunHandle, Runner, Unconfigured};
/// Recurring job definitions.
pub use self::schedule::{Schedule, ScheduleEntry};
pub use self::scheduler::Scheduler;
pub use self::schema::JobState;
/// Queries for inspecting and inserting jobs.
pub use self::storage::{
    enqueue_raw, failed_job_count, get_job, jobs_in_state, pending_job_count,
};

/// Migrations creating the job table.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Create or update the tables the job queue needs.
///
/// # Errors
///
/// Returns an error if a migration fails to apply.
pub async fn setup_database(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}
