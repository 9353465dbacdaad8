use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use brignext_core::{Clock, ConsumerId, Keyspace, SystemClock};
use brignext_events::MessageHandler;

use super::config::{ConsumerConfig, ConsumerOptions};
use super::{liveness, pipeline, scheduler};
use crate::error::{Component, QueueError, panic_message};
use crate::retries::manage_retries;
use crate::store::{QueueStore, StoreError};

/// State shared by every task of one running consumer.
#[derive(Debug)]
pub(crate) struct Context<S> {
    pub(crate) store: Arc<S>,
    pub(crate) keys: Keyspace,
    pub(crate) id: ConsumerId,
    pub(crate) config: ConsumerConfig,
    pub(crate) clock: Arc<dyn Clock>,
}

impl<S: QueueStore> Context<S> {
    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run a store operation under the consumer's retry policy.
    pub(crate) async fn retry<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: &str,
        attempt: F,
    ) -> Result<T, QueueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        manage_retries(
            cancel,
            operation,
            self.config.store_operation_max_attempts,
            self.config.store_operation_max_backoff,
            attempt,
        )
        .await
    }
}

/// Consumes one queue, handing each message to a [`MessageHandler`].
///
/// ## Delivery
///
/// At least once. Work claimed by a consumer that stops heartbeating is
/// returned to pending by a sibling's cleaner (or, in lone-consumer mode, by
/// the next instance at startup) and delivered again.
///
/// ## Lifecycle
///
/// [`Consumer::run`] blocks until the consumer stops and always returns the
/// reason: [`QueueError::Cancelled`] after the caller cancels, otherwise a
/// [`QueueError::Component`] naming the subsystem that failed. Operators are
/// expected to restart the process on the latter.
#[derive(Debug)]
pub struct Consumer<S, H> {
    store: Arc<S>,
    keys: Keyspace,
    id: ConsumerId,
    config: ConsumerConfig,
    clock: Arc<dyn Clock>,
    handler: Arc<H>,
}

impl<S, H> Consumer<S, H>
where
    S: QueueStore + 'static,
    H: MessageHandler + 'static,
{
    pub fn new(store: Arc<S>, queue: &str, options: ConsumerOptions, handler: H) -> Self {
        let config = options.normalize();
        Self {
            store,
            keys: Keyspace::new(&config.prefix, queue),
            id: ConsumerId::new(),
            config,
            clock: Arc::new(SystemClock),
            handler: Arc::new(handler),
        }
    }

    /// Replace the wall clock (tests drive it from tokio's paused time).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the generated consumer ID.
    pub fn with_id(mut self, id: ConsumerId) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> &ConsumerId {
        &self.id
    }

    pub fn keys(&self) -> &Keyspace {
        &self.keys
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    fn cancelled(&self) -> QueueError {
        QueueError::Cancelled {
            queue: self.keys.queue().to_string(),
            consumer: self.id.clone(),
        }
    }

    /// Consume until `cancel` fires or a subsystem fails.
    ///
    /// Startup order matters:
    /// 1. lone consumer: reclaim every other instance's active work;
    /// 2. first heartbeat, synchronously, before any work is claimed;
    /// 3. heartbeat and cleaner loops (unless lone);
    /// 4. scheduler loop;
    /// 5. receivers and handlers.
    ///
    /// On the way out, waits up to the shutdown grace period for tasks to
    /// finish. Tasks still running after that are left to finish on their own.
    pub async fn run(&self, cancel: CancellationToken) -> QueueError {
        let token = cancel.child_token();
        let ctx = Arc::new(Context {
            store: self.store.clone(),
            keys: self.keys.clone(),
            id: self.id.clone(),
            config: self.config.clone(),
            clock: self.clock.clone(),
        });

        info!(
            queue = %self.keys.queue(),
            consumer = %self.id,
            lone_consumer = self.config.lone_consumer,
            receivers = self.config.concurrent_receivers,
            handlers = self.config.concurrent_handlers,
            "starting consumer"
        );

        if let Err(err) = self.start(&ctx, &token).await {
            if cancel.is_cancelled() {
                return self.cancelled();
            }
            let err = err.in_component(Component::Startup);
            error!(queue = %self.keys.queue(), consumer = %self.id, error = %err, "consumer failed to start");
            return err;
        }

        let tracker = TaskTracker::new();
        let (err_tx, mut err_rx) = mpsc::channel::<QueueError>(1);
        // Every task runs until the token is cancelled. Ending any earlier,
        // cleanly or by panicking, is as fatal as an error.
        let spawn = |component: Component, task: std::pin::Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send>>| {
            let err_tx = err_tx.clone();
            let token = token.clone();
            tracker.spawn(async move {
                let err = match AssertUnwindSafe(task).catch_unwind().await {
                    Ok(Ok(()) | Err(QueueError::Interrupted { .. })) if token.is_cancelled() => return,
                    Ok(Ok(()) | Err(QueueError::Interrupted { .. })) => QueueError::TaskEnded {
                        reason: "exited before shutdown".to_string(),
                    },
                    Ok(Err(err)) => err,
                    Err(panic) => QueueError::TaskEnded {
                        reason: format!("panicked: {}", panic_message(&*panic)),
                    },
                };
                // First error wins; later ones only matter in the log.
                let _ = err_tx.try_send(err.in_component(component));
            });
        };

        if !self.config.lone_consumer {
            spawn(
                Component::Heartbeat,
                Box::pin(liveness::run_heartbeat(ctx.clone(), token.clone())),
            );
            spawn(
                Component::Cleaner,
                Box::pin(liveness::run_cleaner(ctx.clone(), token.clone())),
            );
        }
        spawn(
            Component::Scheduler,
            Box::pin(scheduler::run_scheduler(ctx.clone(), token.clone())),
        );

        let channels = pipeline::Channels::new();
        for _ in 0..self.config.concurrent_receivers {
            spawn(
                Component::Receiver,
                Box::pin(pipeline::run_receiver(
                    ctx.clone(),
                    token.clone(),
                    channels.receiver_side(),
                )),
            );
        }
        for _ in 0..self.config.concurrent_handlers {
            spawn(
                Component::Handler,
                Box::pin(pipeline::run_handler(
                    ctx.clone(),
                    token.clone(),
                    channels.handler_side(),
                    self.handler.clone(),
                )),
            );
        }
        drop(channels);
        drop(spawn);
        drop(err_tx);
        tracker.close();

        let err = tokio::select! {
            received = err_rx.recv() => match received {
                Some(err) => err,
                // Tasks report before their senders drop, so a closed
                // channel without cancellation means nothing is left running.
                None if cancel.is_cancelled() => self.cancelled(),
                None => QueueError::TaskEnded {
                    reason: "every consumer task exited".to_string(),
                },
            },
            _ = cancel.cancelled() => self.cancelled(),
        };
        token.cancel();

        match &err {
            QueueError::Cancelled { .. } => {
                info!(queue = %self.keys.queue(), consumer = %self.id, "consumer cancelled; shutting down")
            }
            err => {
                error!(queue = %self.keys.queue(), consumer = %self.id, error = %err, "consumer failed; shutting down")
            }
        }

        let grace = self.config.shutdown_grace_period;
        if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
            warn!(
                queue = %self.keys.queue(),
                consumer = %self.id,
                grace_secs = grace.as_secs(),
                "consumer tasks still running after shutdown grace period"
            );
        }
        err
    }

    async fn start(&self, ctx: &Context<S>, token: &CancellationToken) -> Result<(), QueueError> {
        if self.config.lone_consumer {
            liveness::reclaim_all(ctx, token).await?;
        }
        liveness::heartbeat_once(ctx, token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryQueueStore;
    use brignext_events::handler_fn;

    #[test]
    fn consumer_normalizes_options_and_namespaces_keys() {
        let store = Arc::new(InMemoryQueueStore::new());
        let consumer = Consumer::new(
            store,
            "workers",
            ConsumerOptions::new()
                .with_prefix("brignext:")
                .with_concurrent_handlers(0),
            handler_fn(|_cancel, _msg| async { Ok(()) }),
        );

        assert_eq!(consumer.config().concurrent_handlers, 1);
        assert_eq!(consumer.keys().pending(), "brignext:{workers}:pending");
    }

    #[test]
    fn consumers_get_distinct_ids() {
        let store = Arc::new(InMemoryQueueStore::new());
        let handler = handler_fn(|_cancel, _msg| async { Ok(()) });
        let a = Consumer::new(store.clone(), "q", ConsumerOptions::new(), handler.clone());
        let b = Consumer::new(store, "q", ConsumerOptions::new(), handler);
        assert_ne!(a.id(), b.id());
    }
}
