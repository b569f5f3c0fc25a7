use calcgraph_core::{Result, StatisticsGatherer, ViewProcessId};
use calcgraph_graph::ViewDefinition;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{EngineContext, ExecutionOptions, ViewProcess};

/// Starts and tracks view processes sharing one [`EngineContext`].
pub struct ViewProcessor {
    context: EngineContext,
    processes: DashMap<ViewProcessId, Arc<ViewProcess>>,
}

impl ViewProcessor {
    pub fn new(context: EngineContext) -> Self {
        Self {
            context,
            processes: DashMap::new(),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    pub fn create_view_process(
        &self,
        definition: ViewDefinition,
        options: ExecutionOptions,
    ) -> Result<Arc<ViewProcess>> {
        let process = Arc::new(ViewProcess::start(definition, options, &self.context)?);
        self.processes.insert(process.id(), process.clone());
        Ok(process)
    }

    pub fn view_process(&self, id: ViewProcessId) -> Option<Arc<ViewProcess>> {
        self.processes.get(&id).map(|entry| entry.value().clone())
    }

    pub fn view_process_ids(&self) -> Vec<ViewProcessId> {
        self.processes.iter().map(|entry| *entry.key()).collect()
    }

    /// Statistics of a view process started here and not yet stopped.
    pub fn statistics_gatherer(&self, id: ViewProcessId) -> Option<Arc<dyn StatisticsGatherer>> {
        self.context.statistics.statistics_gatherer(id)
    }

    /// Stops and forgets a view process, releasing its statistics. Returns
    /// false if it was unknown.
    pub async fn stop_view_process(&self, id: ViewProcessId) -> Result<bool> {
        let Some((_, process)) = self.processes.remove(&id) else {
            return Ok(false);
        };
        let stopped = process.stop().await;
        self.context.statistics.release(id);
        stopped?;
        info!("Stopped view process {}", id);
        Ok(true)
    }

    pub async fn shutdown(&self) {
        for id in self.view_process_ids() {
            if let Err(err) = self.stop_view_process(id).await {
                warn!("Failed to stop view process {}: {}", id, err);
            }
        }
    }
}
