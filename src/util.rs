use crate::errors::PanicMessage;
use sentry_core::protocol::SpanStatus;
use std::any::Any;
use std::future::Future;

/// Pulls the message out of a panic payload, if it was a string.
pub(crate) fn try_to_extract_panic_info(info: &(dyn Any + Send + 'static)) -> PanicMessage {
    if let Some(message) = info.downcast_ref::<&'static str>() {
        PanicMessage(Some((*message).to_string()))
    } else if let Some(message) = info.downcast_ref::<String>() {
        PanicMessage(Some(message.clone()))
    } else {
        PanicMessage(None)
    }
}

/// Runs `callback` inside a Sentry performance transaction named after the job type.
pub(crate) async fn with_sentry_transaction<F, Fut, T, E>(
    transaction_name: &str,
    callback: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let tx_ctx = sentry_core::TransactionContext::new(transaction_name, "jobqueue.perform");
    let tx = sentry_core::start_transaction(tx_ctx);

    let result = sentry_core::with_scope(|scope| scope.set_span(Some(tx.clone().into())), callback)
        .await;

    tx.set_status(if result.is_ok() {
        SpanStatus::Ok
    } else {
        SpanStatus::UnknownError
    });
    tx.finish();

    result
}
