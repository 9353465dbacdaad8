//! Receivers and handlers.
//!
//! Handlers announce capacity on a zero-capacity `ready` channel; a receiver
//! only claims a pending ID after taking one such signal, then hands the
//! decoded message over on a zero-capacity `messages` channel. A consumer
//! therefore never holds claimed work that no handler is about to take.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use brignext_core::{Message, MessageId};
use brignext_events::MessageHandler;

use super::consumer::Context;
use super::liveness::tick;
use crate::error::{QueueError, panic_message};
use crate::store::QueueStore;

pub(crate) struct Channels {
    ready: (flume::Sender<()>, flume::Receiver<()>),
    messages: (flume::Sender<Message>, flume::Receiver<Message>),
}

pub(crate) struct ReceiverSide {
    ready: flume::Receiver<()>,
    messages: flume::Sender<Message>,
}

pub(crate) struct HandlerSide {
    ready: flume::Sender<()>,
    messages: flume::Receiver<Message>,
}

impl Channels {
    pub(crate) fn new() -> Self {
        Self {
            ready: flume::bounded(0),
            messages: flume::bounded(0),
        }
    }

    pub(crate) fn receiver_side(&self) -> ReceiverSide {
        ReceiverSide {
            ready: self.ready.1.clone(),
            messages: self.messages.0.clone(),
        }
    }

    pub(crate) fn handler_side(&self) -> HandlerSide {
        HandlerSide {
            ready: self.ready.0.clone(),
            messages: self.messages.1.clone(),
        }
    }
}

/// Clear a claim whose message cannot be delivered (missing or malformed).
async fn discard<S: QueueStore>(
    ctx: &Context<S>,
    cancel: &CancellationToken,
    id: &MessageId,
) -> Result<(), QueueError> {
    ctx.retry(cancel, "discard message", move || {
        ctx.store.complete(&ctx.keys, &ctx.id, id)
    })
    .await
}

/// Claim the next deliverable message, pausing while nothing is pending.
/// `None` once cancelled.
async fn next_message<S: QueueStore>(
    ctx: &Context<S>,
    cancel: &CancellationToken,
) -> Result<Option<Message>, QueueError> {
    loop {
        let claimed = ctx
            .retry(cancel, "claim message", move || {
                ctx.store.claim(&ctx.keys, &ctx.id)
            })
            .await?;
        let Some(id) = claimed else {
            if !tick(cancel, ctx.config.receiver_pause_interval).await {
                return Ok(None);
            }
            continue;
        };

        let id = &id;
        let fetched = ctx
            .retry(cancel, "fetch message", move || ctx.store.fetch(&ctx.keys, id))
            .await?;
        let Some(encoded) = fetched else {
            warn!(queue = %ctx.keys.queue(), message_id = %id, "claimed message has no stored body; skipping");
            discard(ctx, cancel, id).await?;
            continue;
        };

        match Message::decode(&encoded) {
            Ok(message) => return Ok(Some(message)),
            Err(err) => {
                error!(queue = %ctx.keys.queue(), message_id = %id, error = %err, "claimed message is malformed; skipping");
                discard(ctx, cancel, id).await?;
            }
        }
    }
}

pub(crate) async fn run_receiver<S: QueueStore>(
    ctx: Arc<Context<S>>,
    cancel: CancellationToken,
    side: ReceiverSide,
) -> Result<(), QueueError> {
    let ctx: &Context<S> = &ctx;
    loop {
        let ready = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            ready = side.ready.recv_async() => ready,
        };
        if ready.is_err() {
            return Ok(());
        }

        let Some(message) = next_message(ctx, &cancel).await? else {
            return Ok(());
        };
        let id = message.id().clone();
        let sent = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            sent = side.messages.send_async(message) => sent,
        };
        if sent.is_err() {
            return Ok(());
        }
        debug!(queue = %ctx.keys.queue(), message_id = %id, "handed message to handler");
    }
}

pub(crate) async fn run_handler<S, H>(
    ctx: Arc<Context<S>>,
    cancel: CancellationToken,
    side: HandlerSide,
    handler: Arc<H>,
) -> Result<(), QueueError>
where
    S: QueueStore,
    H: MessageHandler,
{
    let ctx: &Context<S> = &ctx;
    loop {
        let signalled = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            signalled = side.ready.send_async(()) => signalled,
        };
        if signalled.is_err() {
            return Ok(());
        }

        let message = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            message = side.messages.recv_async() => match message {
                Ok(message) => message,
                Err(_) => return Ok(()),
            },
        };

        // A panicking handler is a failed handler; the task keeps serving.
        let outcome = AssertUnwindSafe(handler.handle(&cancel, &message))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(
                queue = %ctx.keys.queue(),
                message_id = %message.id(),
                error = %err,
                "handler failed; message will not be retried"
            ),
            Err(panic) => error!(
                queue = %ctx.keys.queue(),
                message_id = %message.id(),
                panic = %panic_message(&*panic),
                "handler panicked; message will not be retried"
            ),
        }

        if cancel.is_cancelled() {
            // The handler may have been cut short; leave the claim for a
            // cleaner to redeliver.
            debug!(queue = %ctx.keys.queue(), message_id = %message.id(), "shutting down; claim left in place");
            return Ok(());
        }

        let id = message.id();
        ctx.retry(&cancel, "complete message", move || {
            ctx.store.complete(&ctx.keys, &ctx.id, id)
        })
        .await?;
    }
}
