use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use brignext_core::{Keyspace, Message};

use super::config::ProducerConfig;
use crate::error::QueueError;
use crate::retries::manage_retries;
use crate::store::QueueStore;

/// Publishes messages onto one queue.
///
/// Cheap to clone; clones share the store.
#[derive(Debug)]
pub struct Producer<S> {
    store: Arc<S>,
    keys: Keyspace,
    config: ProducerConfig,
}

impl<S> Clone for Producer<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            keys: self.keys.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: QueueStore> Producer<S> {
    pub fn new(store: Arc<S>, queue: &str, config: ProducerConfig) -> Self {
        let keys = Keyspace::new(&config.prefix, queue);
        Self {
            store,
            keys,
            config,
        }
    }

    pub fn keys(&self) -> &Keyspace {
        &self.keys
    }

    /// Store `message` and make it reachable (pending, or scheduled when it
    /// has a handle time) in one atomic step.
    pub async fn publish(&self, message: &Message) -> Result<(), QueueError> {
        self.publish_with_cancel(&CancellationToken::new(), message)
            .await
    }

    /// Like [`Producer::publish`]; `cancel` interrupts retry backoff.
    #[instrument(
        skip(self, cancel, message),
        fields(queue = %self.keys.queue(), message_id = %message.id()),
        err
    )]
    pub async fn publish_with_cancel(
        &self,
        cancel: &CancellationToken,
        message: &Message,
    ) -> Result<(), QueueError> {
        let encoded = message.encode()?;
        let encoded = encoded.as_slice();
        manage_retries(
            cancel,
            "publish",
            self.config.max_attempts,
            self.config.max_backoff,
            move || {
                self.store
                    .publish(&self.keys, message.id(), encoded, message.handle_time())
            },
        )
        .await?;
        debug!(scheduled = message.handle_time().is_some(), "published message");
        Ok(())
    }
}
