//! Worker process: consumes a queue of work items and launches them.
//!
//! Each message body is a [`brignext_events::WorkItem`]: `"<eventID>"` for an
//! event's worker, `"<eventID>:<jobName>"` for a job.

pub mod settings;

pub use settings::WorkerSettings;

use std::sync::Arc;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;
use tracing::info;

use brignext_events::{DispatchHandler, InMemoryLauncher, WorkloadLauncher};
use brignext_infra::{Consumer, QueueError, QueueStore, RedisQueueStore};

/// Connect to Redis and consume until `cancel` fires or the consumer fails.
pub async fn run(settings: WorkerSettings, cancel: CancellationToken) -> anyhow::Result<()> {
    let store = RedisQueueStore::connect(&settings.redis_url)
        .await
        .context("connecting to Redis")?;
    info!(queue = %settings.queue, "connected to queue store");

    // Pod templating lives outside this process; launches are recorded only.
    let launcher = InMemoryLauncher::new();
    consume(Arc::new(store), launcher, settings, cancel).await
}

/// Consume `settings.queue` from `store`, dispatching each work item to
/// `launcher`. Cancellation is a clean exit; any other stop is an error.
pub async fn consume<S, L>(
    store: Arc<S>,
    launcher: L,
    settings: WorkerSettings,
    cancel: CancellationToken,
) -> anyhow::Result<()>
where
    S: QueueStore + 'static,
    L: WorkloadLauncher + 'static,
{
    let consumer = Consumer::new(
        store,
        &settings.queue,
        settings.options,
        DispatchHandler::new(launcher),
    );
    info!(queue = %settings.queue, consumer = %consumer.id(), "worker started");

    match consumer.run(cancel).await {
        QueueError::Cancelled { .. } => {
            info!(queue = %settings.queue, "worker stopped");
            Ok(())
        }
        err => Err(anyhow::Error::new(err).context(format!("consumer of {} failed", settings.queue))),
    }
}
