use async_trait::async_trait;
use brignext_core::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::handler::MessageHandler;
use crate::launcher::{LaunchOutcome, WorkloadLauncher};
use crate::work_item::WorkItem;

/// Message handler that decodes a [`WorkItem`] and launches it.
///
/// Redelivered messages reach the launcher again; it answers
/// [`LaunchOutcome::AlreadyPresent`] and nothing else happens.
#[derive(Debug, Clone)]
pub struct DispatchHandler<L> {
    launcher: L,
}

impl<L> DispatchHandler<L> {
    pub fn new(launcher: L) -> Self {
        Self { launcher }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }
}

#[async_trait]
impl<L> MessageHandler for DispatchHandler<L>
where
    L: WorkloadLauncher,
{
    async fn handle(&self, cancel: &CancellationToken, message: &Message) -> anyhow::Result<()> {
        let item = WorkItem::parse(message.body())?;

        if cancel.is_cancelled() {
            anyhow::bail!("shutting down before launching {item}");
        }

        let outcome = match &item {
            WorkItem::Worker { event_id } => self.launcher.launch_worker(event_id).await?,
            WorkItem::Job { event_id, job_name } => {
                self.launcher.launch_job(event_id, job_name).await?
            }
        };

        match outcome {
            LaunchOutcome::Created => {
                info!(message_id = %message.id(), work_item = %item, "launched workload")
            }
            LaunchOutcome::AlreadyPresent => {
                debug!(message_id = %message.id(), work_item = %item, "workload already present")
            }
        }
        Ok(())
    }
}
