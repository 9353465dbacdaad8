use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use brignext_core::Message;
use tokio_util::sync::CancellationToken;

/// Caller-supplied logic invoked once per delivered message.
///
/// ## Delivery Guarantees
///
/// The queue delivers **at least once**. A consumer that crashes after
/// claiming a message but before clearing the claim causes the message to be
/// redelivered (possibly to another consumer). Implementations must therefore
/// be idempotent, e.g. "create if not already present".
///
/// ## Errors
///
/// A returned error is logged by the consumer and otherwise ignored: the
/// message is **not** requeued. The queue's contract ends at "delivered".
///
/// ## Cancellation
///
/// `cancel` fires when the consumer is shutting down. Long-running handlers
/// should observe it and return early; the claim is then left in place and a
/// surviving consumer redelivers the message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, cancel: &CancellationToken, message: &Message) -> anyhow::Result<()>;
}

#[async_trait]
impl<H> MessageHandler for Arc<H>
where
    H: MessageHandler + ?Sized,
{
    async fn handle(&self, cancel: &CancellationToken, message: &Message) -> anyhow::Result<()> {
        (**self).handle(cancel, message).await
    }
}

/// Adapter turning an async closure into a [`MessageHandler`].
#[derive(Debug, Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap `f` so it can be registered as a consumer's handler.
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(CancellationToken, Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(CancellationToken, Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, cancel: &CancellationToken, message: &Message) -> anyhow::Result<()> {
        (self.f)(cancel.clone(), message.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn closure_handler_sees_message() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handler = handler_fn(move |_cancel, msg: Message| {
            let counter = counter.clone();
            async move {
                assert_eq!(msg.body(), b"abc");
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let cancel = CancellationToken::new();
        handler.handle(&cancel, &Message::new("abc")).await.unwrap();
        Arc::new(handler)
            .handle(&cancel, &Message::new("abc"))
            .await
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn closure_handler_propagates_errors() {
        let handler = handler_fn(|_cancel, _msg| async { anyhow::bail!("boom") });
        let err = handler
            .handle(&CancellationToken::new(), &Message::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
