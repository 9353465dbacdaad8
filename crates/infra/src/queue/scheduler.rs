//! Promotion of due scheduled messages to pending.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::consumer::Context;
use super::liveness::tick;
use crate::error::QueueError;
use crate::store::QueueStore;

/// Promote everything due now, one batch per atomic step.
pub(crate) async fn promote_due<S: QueueStore>(
    ctx: &Context<S>,
    cancel: &CancellationToken,
) -> Result<usize, QueueError> {
    let batch = ctx.config.scheduler_batch_size;
    let mut total = 0;
    loop {
        let now = ctx.now();
        let moved = ctx
            .retry(cancel, "promote scheduled messages", move || {
                ctx.store.promote_due(&ctx.keys, now, batch)
            })
            .await?;
        total += moved;
        if moved < batch {
            break;
        }
    }
    if total > 0 {
        debug!(queue = %ctx.keys.queue(), promoted = total, "promoted scheduled messages");
    }
    Ok(total)
}

/// Runs for lone consumers too: deferred work still needs promoting.
pub(crate) async fn run_scheduler<S: QueueStore>(
    ctx: Arc<Context<S>>,
    cancel: CancellationToken,
) -> Result<(), QueueError> {
    loop {
        promote_due(&ctx, &cancel).await?;
        if !tick(&cancel, ctx.config.scheduler_interval).await {
            return Ok(());
        }
    }
}
