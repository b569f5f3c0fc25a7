use calcgraph_core::{
    DiscardingStatisticsGathererProvider, EngineConfig, RecordingStatisticsGathererProvider,
    SchedulerConfig, StatisticsGathererProvider,
};
use calcgraph_graph::{FunctionRepository, MarketDataAvailabilityProvider};
use std::sync::Arc;

/// Shared services every view process started by a processor draws on.
#[derive(Clone)]
pub struct EngineContext {
    pub functions: Arc<FunctionRepository>,
    pub market_data: Arc<dyn MarketDataAvailabilityProvider>,
    pub statistics: Arc<dyn StatisticsGathererProvider>,
    pub scheduler: SchedulerConfig,
}

impl EngineContext {
    /// Context with recording statistics and default scheduler settings.
    pub fn new(
        functions: Arc<FunctionRepository>,
        market_data: Arc<dyn MarketDataAvailabilityProvider>,
    ) -> Self {
        Self {
            functions,
            market_data,
            statistics: Arc::new(RecordingStatisticsGathererProvider::default()),
            scheduler: SchedulerConfig::default(),
        }
    }

    pub fn from_config(
        config: &EngineConfig,
        functions: Arc<FunctionRepository>,
        market_data: Arc<dyn MarketDataAvailabilityProvider>,
    ) -> Self {
        let statistics: Arc<dyn StatisticsGathererProvider> = if config.statistics.enabled {
            Arc::new(RecordingStatisticsGathererProvider::new(
                config.statistics.window,
            ))
        } else {
            Arc::new(DiscardingStatisticsGathererProvider)
        };
        Self {
            functions,
            market_data,
            statistics,
            scheduler: config.scheduler.clone(),
        }
    }

    pub fn with_statistics(mut self, statistics: Arc<dyn StatisticsGathererProvider>) -> Self {
        self.statistics = statistics;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }
}
