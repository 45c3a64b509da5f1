use std::sync::Arc;

use anyhow::Result;

use crate::config::DashboardConfig;
use crate::live::Broadcaster;
use crate::orchestrator::{RunOrchestrator, RunQueue};
use crate::projects::ProjectCatalog;
use crate::storage::{self, HistoryStore};

#[derive(Clone)]
pub struct AppState {
    pub catalog: ProjectCatalog,
    pub orchestrator: Arc<RunOrchestrator>,
    pub queue: RunQueue,
}

impl AppState {
    /// Wire storage, broadcaster, orchestrator and queue worker together.
    ///
    /// Must be called inside a tokio runtime; the queue worker is spawned
    /// onto it.
    pub fn build(config: &DashboardConfig) -> Result<Self> {
        let pool = storage::open_pool(&config.storage.db_path)?;
        let live = Broadcaster::new(config.live.channel_capacity);
        let orchestrator = Arc::new(RunOrchestrator::new(
            config.runner.clone(),
            HistoryStore::new(pool),
            live,
        ));
        let catalog = ProjectCatalog::new(&config.projects);
        let queue = RunQueue::spawn(Arc::clone(&orchestrator), catalog.clone());

        Ok(Self {
            catalog,
            orchestrator,
            queue,
        })
    }
}
