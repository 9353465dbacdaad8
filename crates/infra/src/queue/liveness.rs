//! Heartbeat and dead-consumer reclamation.
//!
//! Every consumer advertises liveness by writing its latest heartbeat into the
//! registry. Cleaners look for consumers whose heartbeat is older than the
//! dead-consumer threshold and return their claimed work to pending.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use brignext_core::ConsumerId;

use super::consumer::Context;
use crate::error::QueueError;
use crate::store::QueueStore;

/// Sleep for `interval`; `false` if cancelled first.
pub(crate) async fn tick(cancel: &CancellationToken, interval: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}

pub(crate) async fn heartbeat_once<S: QueueStore>(
    ctx: &Context<S>,
    cancel: &CancellationToken,
) -> Result<(), QueueError> {
    ctx.retry(cancel, "heartbeat", move || {
        ctx.store.heartbeat(&ctx.keys, &ctx.id, ctx.now())
    })
    .await?;
    debug!(queue = %ctx.keys.queue(), consumer = %ctx.id, "heartbeat");
    Ok(())
}

/// Heartbeat every interval. Failing to heartbeat is fatal: siblings would
/// otherwise reclaim work this consumer is still handling.
pub(crate) async fn run_heartbeat<S: QueueStore>(
    ctx: Arc<Context<S>>,
    cancel: CancellationToken,
) -> Result<(), QueueError> {
    while tick(&cancel, ctx.config.heartbeat_interval).await {
        heartbeat_once(&ctx, &cancel).await?;
    }
    Ok(())
}

/// Reclaim the work of every consumer in `dead` except this one.
async fn reclaim_each<S: QueueStore>(
    ctx: &Context<S>,
    cancel: &CancellationToken,
    dead: Vec<ConsumerId>,
    cutoff: DateTime<Utc>,
) -> Result<usize, QueueError> {
    let mut total = 0;
    for consumer in dead.iter().filter(|c| **c != ctx.id) {
        let moved = ctx
            .retry(cancel, "reclaim", move || {
                ctx.store.reclaim(&ctx.keys, consumer, cutoff)
            })
            .await?;
        match moved {
            Some(moved) => {
                info!(
                    queue = %ctx.keys.queue(),
                    consumer = %ctx.id,
                    dead_consumer = %consumer,
                    moved,
                    "reclaimed work of dead consumer"
                );
                total += moved;
            }
            None => debug!(
                queue = %ctx.keys.queue(),
                dead_consumer = %consumer,
                "consumer heartbeated since it was found dead; skipped"
            ),
        }
    }
    Ok(total)
}

/// One cleaner pass: reclaim from every consumer silent since before the
/// dead-consumer threshold.
pub(crate) async fn clean_once<S: QueueStore>(
    ctx: &Context<S>,
    cancel: &CancellationToken,
) -> Result<usize, QueueError> {
    let threshold = chrono::Duration::from_std(ctx.config.dead_consumer_threshold())
        .unwrap_or(chrono::Duration::MAX);
    let cutoff = ctx
        .now()
        .checked_sub_signed(threshold)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let dead = ctx
        .retry(cancel, "find dead consumers", move || {
            ctx.store.dead_consumers(&ctx.keys, cutoff)
        })
        .await?;
    reclaim_each(ctx, cancel, dead, cutoff).await
}

pub(crate) async fn run_cleaner<S: QueueStore>(
    ctx: Arc<Context<S>>,
    cancel: CancellationToken,
) -> Result<(), QueueError> {
    while tick(&cancel, ctx.config.cleaner_interval).await {
        clean_once(&ctx, &cancel).await?;
    }
    Ok(())
}

/// Lone-consumer startup: treat every other consumer as dead, registered or
/// not, and reclaim all of their active work.
pub(crate) async fn reclaim_all<S: QueueStore>(
    ctx: &Context<S>,
    cancel: &CancellationToken,
) -> Result<usize, QueueError> {
    let cutoff = DateTime::<Utc>::MAX_UTC;

    let mut dead = ctx
        .retry(cancel, "find dead consumers", move || {
            ctx.store.dead_consumers(&ctx.keys, cutoff)
        })
        .await?;
    let orphans = ctx
        .retry(cancel, "find orphaned consumers", move || {
            ctx.store.orphaned_consumers(&ctx.keys)
        })
        .await?;
    dead.extend(orphans);
    dead.sort();
    dead.dedup();

    let moved = reclaim_each(ctx, cancel, dead, cutoff).await?;
    if moved > 0 {
        warn!(
            queue = %ctx.keys.queue(),
            consumer = %ctx.id,
            moved,
            "lone consumer recovered work left by a previous instance"
        );
    }
    Ok(moved)
}
