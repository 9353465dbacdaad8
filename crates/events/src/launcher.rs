//! Downstream collaborator that turns work items into running workloads.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::work_item::WorkItem;

/// What a launch attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The workload did not exist and was created.
    Created,
    /// The workload already existed (redelivery); nothing was done.
    AlreadyPresent,
}

/// Creates the resources that run a worker or a job.
///
/// Messages can be delivered more than once, so both operations must have
/// "create if not already present" semantics.
#[async_trait]
pub trait WorkloadLauncher: Send + Sync {
    async fn launch_worker(&self, event_id: &str) -> anyhow::Result<LaunchOutcome>;

    async fn launch_job(&self, event_id: &str, job_name: &str) -> anyhow::Result<LaunchOutcome>;
}

#[async_trait]
impl<L: WorkloadLauncher + ?Sized> WorkloadLauncher for Arc<L> {
    async fn launch_worker(&self, event_id: &str) -> anyhow::Result<LaunchOutcome> {
        (**self).launch_worker(event_id).await
    }

    async fn launch_job(&self, event_id: &str, job_name: &str) -> anyhow::Result<LaunchOutcome> {
        (**self).launch_job(event_id, job_name).await
    }
}

/// In-memory launcher for tests/dev.
///
/// Records every launch attempt and every workload it "created".
#[derive(Debug, Default)]
pub struct InMemoryLauncher {
    created: Mutex<HashSet<WorkItem>>,
    attempts: Mutex<Vec<WorkItem>>,
}

impl InMemoryLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Workloads created so far (unordered).
    pub fn created(&self) -> Vec<WorkItem> {
        match self.created.lock() {
            Ok(created) => created.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Every launch attempt, duplicates included, in arrival order.
    pub fn attempts(&self) -> Vec<WorkItem> {
        match self.attempts.lock() {
            Ok(attempts) => attempts.clone(),
            Err(_) => Vec::new(),
        }
    }

    fn launch(&self, item: WorkItem) -> anyhow::Result<LaunchOutcome> {
        self.attempts
            .lock()
            .map_err(|_| anyhow::anyhow!("launcher state poisoned"))?
            .push(item.clone());

        let mut created = self
            .created
            .lock()
            .map_err(|_| anyhow::anyhow!("launcher state poisoned"))?;
        if created.insert(item) {
            Ok(LaunchOutcome::Created)
        } else {
            Ok(LaunchOutcome::AlreadyPresent)
        }
    }
}

#[async_trait]
impl WorkloadLauncher for InMemoryLauncher {
    async fn launch_worker(&self, event_id: &str) -> anyhow::Result<LaunchOutcome> {
        self.launch(WorkItem::worker(event_id))
    }

    async fn launch_job(&self, event_id: &str, job_name: &str) -> anyhow::Result<LaunchOutcome> {
        self.launch(WorkItem::job(event_id, job_name))
    }
}
