use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::ViewProcessId;

/// Batching metrics of one processed cycle, as simple means over its jobs.
///
/// `mean_job_io_cost` is reported alongside `mean_job_cycle_cost` and may
/// overlap with it; consumers should not add the two together.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JobStatistics {
    pub total_jobs: usize,
    pub mean_job_size: f64,
    pub mean_job_cycle_cost: Duration,
    pub mean_job_io_cost: Duration,
}

/// Per view process accumulator of execution metrics.
pub trait StatisticsGatherer: Send + Sync {
    fn graph_executed(
        &self,
        configuration: &str,
        node_count: usize,
        execution_time: Duration,
        duration: Duration,
    );

    fn graph_processed(
        &self,
        configuration: &str,
        total_jobs: usize,
        mean_job_size: f64,
        mean_job_cycle_cost: Duration,
        mean_job_io_cost: Duration,
    );

    /// Metrics of the most recent `graph_processed` call for `configuration`.
    fn latest_job_statistics(&self, configuration: &str) -> Option<JobStatistics>;

    fn snapshot(&self) -> Vec<ConfigurationStatistics>;
}

/// Owns the gatherer of each running view process.
///
/// Only [`register`](Self::register) creates a gatherer; lookups of ids that
/// were never registered, or were released, find nothing.
pub trait StatisticsGathererProvider: Send + Sync {
    /// Gatherer for a starting view process, created if needed.
    fn register(&self, view_process_id: ViewProcessId) -> Arc<dyn StatisticsGatherer>;

    fn statistics_gatherer(
        &self,
        view_process_id: ViewProcessId,
    ) -> Option<Arc<dyn StatisticsGatherer>>;

    /// Drops the gatherer of a stopped view process. Returns false if unknown.
    fn release(&self, view_process_id: ViewProcessId) -> bool;
}

/// Serializable per-configuration summary for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationStatistics {
    pub configuration: String,
    pub executed_graphs: u64,
    pub executed_nodes: u64,
    pub processed_graphs: u64,
    pub mean_execution_time_ms: f64,
    pub mean_duration_ms: f64,
    pub rolling_mean_job_size: f64,
    pub rolling_mean_job_cycle_cost_ms: f64,
    pub rolling_mean_job_io_cost_ms: f64,
    pub latest_job_statistics: Option<JobStatistics>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
struct GraphExecution {
    execution_time: Duration,
    duration: Duration,
}

/// Lifetime counters plus the last `window` samples of each kind.
#[derive(Debug)]
struct ConfigurationAccumulator {
    window: usize,
    executed_graphs: u64,
    executed_nodes: u64,
    processed_graphs: u64,
    executions: VecDeque<GraphExecution>,
    processed: VecDeque<JobStatistics>,
    last_updated: Option<DateTime<Utc>>,
}

impl ConfigurationAccumulator {
    fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            executed_graphs: 0,
            executed_nodes: 0,
            processed_graphs: 0,
            executions: VecDeque::with_capacity(window),
            processed: VecDeque::with_capacity(window),
            last_updated: None,
        }
    }

    fn record_execution(&mut self, node_count: usize, sample: GraphExecution) {
        self.executed_graphs += 1;
        self.executed_nodes += node_count as u64;
        push_bounded(&mut self.executions, sample, self.window);
    }

    fn record_processed(&mut self, statistics: JobStatistics) {
        self.processed_graphs += 1;
        push_bounded(&mut self.processed, statistics, self.window);
    }

    fn latest(&self) -> Option<JobStatistics> {
        self.processed.back().copied()
    }

    fn summary(&self, configuration: &str) -> ConfigurationStatistics {
        let executions = &self.executions;
        let processed = &self.processed;
        ConfigurationStatistics {
            configuration: configuration.to_string(),
            executed_graphs: self.executed_graphs,
            executed_nodes: self.executed_nodes,
            processed_graphs: self.processed_graphs,
            mean_execution_time_ms: mean(executions.iter().map(|e| millis(e.execution_time))),
            mean_duration_ms: mean(executions.iter().map(|e| millis(e.duration))),
            rolling_mean_job_size: mean(processed.iter().map(|p| p.mean_job_size)),
            rolling_mean_job_cycle_cost_ms: mean(
                processed.iter().map(|p| millis(p.mean_job_cycle_cost)),
            ),
            rolling_mean_job_io_cost_ms: mean(
                processed.iter().map(|p| millis(p.mean_job_io_cost)),
            ),
            latest_job_statistics: self.latest(),
            last_updated: self.last_updated,
        }
    }
}

fn push_bounded<T>(samples: &mut VecDeque<T>, sample: T, window: usize) {
    while samples.len() >= window {
        samples.pop_front();
    }
    samples.push_back(sample);
}

fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let count = values.len();
    if count == 0 {
        return 0.0;
    }
    values.sum::<f64>() / count as f64
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Keeps rolling metrics per configuration. Safe to update from concurrent
/// job callbacks.
pub struct RecordingStatisticsGatherer {
    window: usize,
    configurations: DashMap<String, Mutex<ConfigurationAccumulator>>,
}

impl RecordingStatisticsGatherer {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            configurations: DashMap::new(),
        }
    }

    fn update(&self, configuration: &str, f: impl FnOnce(&mut ConfigurationAccumulator)) {
        let entry = self
            .configurations
            .entry(configuration.to_string())
            .or_insert_with(|| Mutex::new(ConfigurationAccumulator::new(self.window)));
        let mut accumulator = entry.lock();
        f(&mut accumulator);
        accumulator.last_updated = Some(Utc::now());
    }
}

impl Default for RecordingStatisticsGatherer {
    fn default() -> Self {
        Self::new(100)
    }
}

impl StatisticsGatherer for RecordingStatisticsGatherer {
    fn graph_executed(
        &self,
        configuration: &str,
        node_count: usize,
        execution_time: Duration,
        duration: Duration,
    ) {
        self.update(configuration, |acc| {
            acc.record_execution(
                node_count,
                GraphExecution {
                    execution_time,
                    duration,
                },
            )
        });
    }

    fn graph_processed(
        &self,
        configuration: &str,
        total_jobs: usize,
        mean_job_size: f64,
        mean_job_cycle_cost: Duration,
        mean_job_io_cost: Duration,
    ) {
        self.update(configuration, |acc| {
            acc.record_processed(JobStatistics {
                total_jobs,
                mean_job_size,
                mean_job_cycle_cost,
                mean_job_io_cost,
            })
        });
    }

    fn latest_job_statistics(&self, configuration: &str) -> Option<JobStatistics> {
        let entry = self.configurations.get(configuration)?;
        let latest = entry.lock().latest();
        latest
    }

    fn snapshot(&self) -> Vec<ConfigurationStatistics> {
        let mut summaries: Vec<_> = self
            .configurations
            .iter()
            .map(|entry| {
                let summary = entry.value().lock().summary(entry.key());
                summary
            })
            .collect();
        summaries.sort_by(|a, b| a.configuration.cmp(&b.configuration));
        summaries
    }
}

/// Accepts every call and retains nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardingStatisticsGatherer;

impl StatisticsGatherer for DiscardingStatisticsGatherer {
    fn graph_executed(&self, _: &str, _: usize, _: Duration, _: Duration) {}

    fn graph_processed(&self, _: &str, _: usize, _: f64, _: Duration, _: Duration) {}

    fn latest_job_statistics(&self, _configuration: &str) -> Option<JobStatistics> {
        None
    }

    fn snapshot(&self) -> Vec<ConfigurationStatistics> {
        Vec::new()
    }
}

/// One recording gatherer per registered view process.
pub struct RecordingStatisticsGathererProvider {
    window: usize,
    gatherers: DashMap<ViewProcessId, Arc<RecordingStatisticsGatherer>>,
}

impl RecordingStatisticsGathererProvider {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            gatherers: DashMap::new(),
        }
    }

    pub fn view_process_ids(&self) -> Vec<ViewProcessId> {
        self.gatherers.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.gatherers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gatherers.is_empty()
    }
}

impl Default for RecordingStatisticsGathererProvider {
    fn default() -> Self {
        Self::new(100)
    }
}

impl StatisticsGathererProvider for RecordingStatisticsGathererProvider {
    fn register(&self, view_process_id: ViewProcessId) -> Arc<dyn StatisticsGatherer> {
        self.gatherers
            .entry(view_process_id)
            .or_insert_with(|| Arc::new(RecordingStatisticsGatherer::new(self.window)))
            .clone()
    }

    fn statistics_gatherer(
        &self,
        view_process_id: ViewProcessId,
    ) -> Option<Arc<dyn StatisticsGatherer>> {
        self.gatherers
            .get(&view_process_id)
            .map(|entry| entry.value().clone() as Arc<dyn StatisticsGatherer>)
    }

    fn release(&self, view_process_id: ViewProcessId) -> bool {
        self.gatherers.remove(&view_process_id).is_some()
    }
}

/// Hands every view process a [`DiscardingStatisticsGatherer`]. Nothing is
/// kept per id, so lookups always succeed and release is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardingStatisticsGathererProvider;

impl StatisticsGathererProvider for DiscardingStatisticsGathererProvider {
    fn register(&self, _view_process_id: ViewProcessId) -> Arc<dyn StatisticsGatherer> {
        Arc::new(DiscardingStatisticsGatherer)
    }

    fn statistics_gatherer(
        &self,
        _view_process_id: ViewProcessId,
    ) -> Option<Arc<dyn StatisticsGatherer>> {
        Some(Arc::new(DiscardingStatisticsGatherer))
    }

    fn release(&self, _view_process_id: ViewProcessId) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_means_only_cover_the_window() {
        let gatherer = RecordingStatisticsGatherer::new(2);
        for (size, cost) in [(1.0, 10), (3.0, 20), (5.0, 40)] {
            gatherer.graph_processed(
                "Default",
                1,
                size,
                Duration::from_millis(cost),
                Duration::ZERO,
            );
        }

        let summary = &gatherer.snapshot()[0];
        assert_eq!(summary.processed_graphs, 3);
        assert!((summary.rolling_mean_job_size - 4.0).abs() < 1e-9);
        assert!((summary.rolling_mean_job_cycle_cost_ms - 30.0).abs() < 1e-9);
        assert_eq!(summary.mean_execution_time_ms, 0.0);
    }

    #[test]
    fn recording_gatherer_tracks_latest_job_statistics() {
        let gatherer = RecordingStatisticsGatherer::new(10);
        assert!(gatherer.latest_job_statistics("Default").is_none());

        gatherer.graph_executed("Default", 4, Duration::from_millis(8), Duration::from_millis(10));
        gatherer.graph_processed(
            "Default",
            2,
            2.0,
            Duration::from_millis(4),
            Duration::from_millis(1),
        );
        gatherer.graph_processed(
            "Default",
            1,
            3.0,
            Duration::from_millis(6),
            Duration::ZERO,
        );

        let latest = gatherer.latest_job_statistics("Default").unwrap();
        assert_eq!(latest.total_jobs, 1);
        assert_eq!(latest.mean_job_cycle_cost, Duration::from_millis(6));

        let summary = &gatherer.snapshot()[0];
        assert_eq!(summary.executed_graphs, 1);
        assert_eq!(summary.executed_nodes, 4);
        assert_eq!(summary.processed_graphs, 2);
        assert!((summary.rolling_mean_job_size - 2.5).abs() < 1e-9);
        assert!(summary.last_updated.is_some());
    }

    #[test]
    fn discarding_gatherer_retains_nothing() {
        let gatherer = DiscardingStatisticsGatherer;
        gatherer.graph_processed("Default", 1, 1.0, Duration::from_millis(1), Duration::ZERO);
        assert!(gatherer.latest_job_statistics("Default").is_none());
        assert!(gatherer.snapshot().is_empty());
    }

    #[test]
    fn provider_returns_one_gatherer_per_view_process() {
        let provider = RecordingStatisticsGathererProvider::default();
        let first = ViewProcessId::new();
        let second = ViewProcessId::new();

        provider
            .register(first)
            .graph_executed("Default", 1, Duration::ZERO, Duration::ZERO);
        provider.register(second);

        let gatherer = provider.statistics_gatherer(first).unwrap();
        assert_eq!(gatherer.snapshot().len(), 1);
        assert!(provider.statistics_gatherer(second).unwrap().snapshot().is_empty());
        assert_eq!(provider.register(first).snapshot().len(), 1);
        assert_eq!(provider.len(), 2);
    }

    #[test]
    fn lookups_never_create_gatherers() {
        let provider = RecordingStatisticsGathererProvider::default();
        for _ in 0..10 {
            assert!(provider.statistics_gatherer(ViewProcessId::new()).is_none());
        }
        assert!(provider.is_empty());

        let id = ViewProcessId::new();
        provider.register(id);
        assert!(provider.release(id));
        assert!(!provider.release(id));
        assert!(provider.statistics_gatherer(id).is_none());
        assert!(provider.is_empty());
    }

    #[test]
    fn discarding_provider_keeps_nothing() {
        let provider = DiscardingStatisticsGathererProvider;
        let id = ViewProcessId::new();
        provider.register(id).graph_executed("Default", 1, Duration::ZERO, Duration::ZERO);
        assert!(provider.statistics_gatherer(id).unwrap().snapshot().is_empty());
        assert!(!provider.release(id));
    }

    #[test]
    fn concurrent_updates_are_all_counted() {
        let gatherer = Arc::new(RecordingStatisticsGatherer::new(1000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gatherer = gatherer.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        gatherer.graph_executed("Default", 1, Duration::ZERO, Duration::ZERO);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(gatherer.snapshot()[0].executed_nodes, 400);
    }
}
