//! Keeps a background loop alive by restarting it whenever it fails.

use crate::util::try_to_extract_panic_info;
use sqlx::PgPool;
use std::future::Future;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::sleep;
use tracing::{error, info};

/// How long a failed loop waits before being restarted.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Aborts the supervised task when the supervisor itself is dropped or aborted.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs the loop produced by `make_loop` in its own task, forever.
///
/// Whenever the loop returns an error or panics, the failure is logged, the
/// supervisor sleeps for `cooldown` and then starts a brand new loop. Only a
/// loop that finishes with `Ok(())` ends supervision.
pub async fn supervise<F, Fut>(name: &str, cooldown: Duration, make_loop: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    loop {
        info!(supervised = name, "Background loop starting");

        let handle = tokio::spawn(make_loop());
        let _guard = AbortOnDrop(handle.abort_handle());

        match handle.await {
            Ok(Ok(())) => {
                info!(supervised = name, "Background loop finished");
                return;
            }
            Ok(Err(error)) => {
                error!(supervised = name, "Unhandled error in background loop: {error:?}");
            }
            Err(join_error) if join_error.is_panic() => {
                let message = try_to_extract_panic_info(&*join_error.into_panic());
                error!(supervised = name, "Background loop panicked: {message}");
            }
            Err(_) => {
                info!(supervised = name, "Background loop cancelled");
                return;
            }
        }

        sleep(cooldown).await;
    }
}

/// Builds a new pool with the same settings as `template`.
///
/// Every (re)start of a supervised loop gets its own pool, so connections
/// from a run that failed are never handed to the next one.
pub(crate) fn fresh_pool(template: &PgPool) -> PgPool {
    template
        .options()
        .clone()
        .connect_lazy_with((*template.connect_options()).clone())
}
