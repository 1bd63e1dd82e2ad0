use crate::BackgroundJob;
use crate::job_registry::JobRegistry;
use crate::supervisor::{DEFAULT_COOLDOWN, fresh_pool, supervise};
use crate::worker::Worker;
use futures_util::future::join_all;
use sqlx::PgPool;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{Instrument, info, info_span, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_JITTER: Duration = Duration::from_millis(100);

/// Marker type for a configured runner
#[derive(Debug)]
#[allow(missing_copy_implementations)]
pub struct Configured;
/// Marker type for an unconfigured runner
#[derive(Debug)]
#[allow(missing_copy_implementations)]
pub struct Unconfigured;

/// The core runner responsible for locking and running jobs
pub struct Runner<Context: Clone + Send + Sync + 'static, State = Unconfigured> {
    connection_pool: PgPool,
    job_registry: JobRegistry<Context>,
    context: Context,
    num_workers: usize,
    poll_interval: Duration,
    jitter: Duration,
    cooldown: Duration,
    shutdown_when_queue_empty: bool,
    _state: PhantomData<State>,
}

impl<Context: std::fmt::Debug + Clone + Sync + Send, State: std::fmt::Debug> std::fmt::Debug
    for Runner<Context, State>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("job_types", &self.job_registry.job_types())
            .field("context", &self.context)
            .field("num_workers", &self.num_workers)
            .field("poll_interval", &self.poll_interval)
            .field("jitter", &self.jitter)
            .field("cooldown", &self.cooldown)
            .field("shutdown_when_queue_empty", &self.shutdown_when_queue_empty)
            .finish()
    }
}

impl<Context: Clone + Send + Sync + 'static> Runner<Context> {
    /// Create a new runner with the given connection pool and context.
    ///
    /// Workers never use `connection_pool` directly: each (re)started worker
    /// opens its own pool with the same settings.
    pub fn new(connection_pool: PgPool, context: Context) -> Self {
        Self {
            connection_pool,
            job_registry: JobRegistry::default(),
            context,
            num_workers: 1,
            poll_interval: DEFAULT_POLL_INTERVAL,
            jitter: DEFAULT_JITTER,
            cooldown: DEFAULT_COOLDOWN,
            shutdown_when_queue_empty: false,
            _state: PhantomData,
        }
    }
}

impl<Context: Clone + Send + Sync + 'static, State> Runner<Context, State> {
    /// Register a job type this runner can execute.
    pub fn register<J: BackgroundJob<Context = Context>>(mut self) -> Runner<Context, Configured> {
        self.job_registry.register::<J>();

        Runner {
            connection_pool: self.connection_pool,
            job_registry: self.job_registry,
            context: self.context,
            num_workers: self.num_workers,
            poll_interval: self.poll_interval,
            jitter: self.jitter,
            cooldown: self.cooldown,
            shutdown_when_queue_empty: self.shutdown_when_queue_empty,
            _state: PhantomData,
        }
    }

    /// Set the number of concurrent workers.
    #[must_use]
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Set how long an idle worker waits before looking for jobs again.
    #[must_use]
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the maximum random jitter to add to poll intervals.
    ///
    /// Jitter helps reduce thundering herd effects when multiple workers
    /// are polling for jobs simultaneously. The actual jitter applied will
    /// be a random value between 0 and the specified duration.
    #[must_use]
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set how long to wait before restarting a worker that hit an unexpected error.
    #[must_use]
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Set the runner to shut down when the background job queue is empty.
    #[must_use]
    pub fn shutdown_when_queue_empty(mut self) -> Self {
        self.shutdown_when_queue_empty = true;
        self
    }
}

impl<Context: Clone + Send + Sync + 'static> Runner<Context, Configured> {
    /// Start the background workers.
    ///
    /// Each worker runs in its own supervised task and is restarted after the
    /// cooldown whenever it fails. This returns a `RunHandle` which can be
    /// used to wait for the workers to shutdown.
    pub fn start(&self) -> RunHandle {
        let job_registry = Arc::new(self.job_registry.clone());

        let handles = (1..=self.num_workers)
            .map(|i| {
                let name = format!("background-worker-{i}");
                info!(worker.name = %name, "Starting worker…");

                let template = self.connection_pool.clone();
                let context = self.context.clone();
                let job_registry = job_registry.clone();
                let shutdown_when_queue_empty = self.shutdown_when_queue_empty;
                let poll_interval = self.poll_interval;
                let jitter = self.jitter;
                let cooldown = self.cooldown;

                let span = info_span!("worker", worker.name = %name);
                tokio::spawn(
                    async move {
                        supervise(&name, cooldown, move || {
                            let worker = Worker {
                                connection_pool: fresh_pool(&template),
                                context: context.clone(),
                                job_registry: job_registry.clone(),
                                shutdown_when_queue_empty,
                                poll_interval,
                                jitter,
                            };
                            async move {
                                let result = worker.run().await;
                                worker.connection_pool.close().await;
                                result
                            }
                            .in_current_span()
                        })
                        .await;
                    }
                    .instrument(span),
                )
            })
            .collect();

        RunHandle { handles }
    }
}

/// Handle to a running background job processing system
#[derive(Debug)]
pub struct RunHandle {
    handles: Vec<JoinHandle<()>>,
}

impl RunHandle {
    /// Wait for all background workers to shut down.
    ///
    /// Workers only shut down on their own when the runner was configured
    /// with [`Runner::shutdown_when_queue_empty`].
    pub async fn wait_for_shutdown(self) {
        join_all(self.handles).await.into_iter().for_each(|result| match result {
            Err(error) if error.is_panic() => warn!(%error, "Background worker task panicked"),
            _ => {}
        });
    }

    /// Stop all workers. Jobs that were running are rolled back and can be claimed again.
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
