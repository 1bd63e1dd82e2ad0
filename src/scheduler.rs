//! Enqueues recurring jobs according to a [`Schedule`].

use crate::background_job::Enqueue;
use crate::schedule::Schedule;
use crate::supervisor::{DEFAULT_COOLDOWN, fresh_pool, supervise};
use anyhow::Context as _;
use sqlx::PgPool;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{Instrument, debug, info, info_span};

/// Supervised process that keeps enqueueing the jobs of a [`Schedule`].
///
/// Only one scheduler should run against a database at a time: every running
/// scheduler fires independently, so two of them enqueue every recurring job twice.
#[derive(Debug)]
pub struct Scheduler {
    connection_pool: PgPool,
    schedule: Arc<Schedule>,
    cooldown: Duration,
}

impl Scheduler {
    /// Create a scheduler that enqueues into the database behind `connection_pool`.
    pub fn new(connection_pool: PgPool, schedule: Schedule) -> Self {
        Self {
            connection_pool,
            schedule: Arc::new(schedule),
            cooldown: DEFAULT_COOLDOWN,
        }
    }

    /// Set how long to wait before restarting the scheduler after a failure.
    #[must_use]
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Start the scheduler in its own task.
    ///
    /// Every (re)start uses a new connection pool built from the settings of
    /// the one passed to [`Scheduler::new`], and fires all entries right away.
    pub fn start(self) -> JoinHandle<()> {
        let Self {
            connection_pool,
            schedule,
            cooldown,
        } = self;

        info!(entries = schedule.entries().len(), "Starting scheduler…");

        let span = info_span!("scheduler");
        tokio::spawn(
            async move {
                supervise("scheduler", cooldown, move || {
                    let pool = fresh_pool(&connection_pool);
                    let schedule = schedule.clone();
                    async move {
                        let result = run_schedule(&schedule, &pool).await;
                        pool.close().await;
                        result
                    }
                    .in_current_span()
                })
                .await;
            }
            .instrument(span),
        )
    }
}

/// Fires every entry of `schedule` now, then again each `period` after it last fired.
///
/// The next firing is timed from when an entry actually fired, so any delay
/// carries over to all later firings of that entry. Entries fire one at a time.
/// Only returns for an empty schedule or when enqueueing fails.
pub async fn run_schedule<E: Enqueue>(schedule: &Schedule, enqueuer: &E) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut timers: BinaryHeap<Reverse<(Instant, usize)>> = (0..schedule.entries().len())
        .map(|index| Reverse((start, index)))
        .collect();

    while let Some(Reverse((fire_at, index))) = timers.pop() {
        sleep_until(fire_at).await;

        let entry = &schedule.entries()[index];
        let fired_at = Instant::now();
        timers.push(Reverse((fired_at + entry.period(), index)));

        info!(job.type = entry.job_type(), "Enqueueing scheduled job");
        let payload = entry
            .payload()
            .with_context(|| format!("Failed to encode payload for {}", entry.job_type()))?;
        let job_id = enqueuer
            .enqueue(entry.job_type(), &payload, entry.max_attempts())
            .await
            .with_context(|| format!("Failed to enqueue scheduled {} job", entry.job_type()))?;
        debug!(job.id = job_id, job.type = entry.job_type(), "Scheduled job enqueued");
    }

    Ok(())
}
