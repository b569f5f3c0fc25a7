use calcgraph_core::{
    CalcGraphError, ChangeEvent, ChangeListener, ComputationTarget, ComputedValueResult,
    ConfigurationError, ExecutionLog, FailureDetail, FailureStatus, LogLevel, ObjectId, Result,
    ResultListener, ResultModel, StatisticsGatherer, ValueSpecification, ViewProcessId,
};
use calcgraph_graph::{
    CalculationConfiguration, DependencyGraph, DependencyGraphBuilder, NodeFunction, NodeId,
    ViewDefinition,
};
use chrono::Utc;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::{
    partition, ConfigurationCycleSummary, CycleState, CycleSummary, EngineContext,
    ExecutionFlags, ExecutionJob, ExecutionOptions, ItemOutcome, JobBody, JobItem, JobOutcome,
    JobSizer, MarketDataSnapshot, MarketDataTick, RetryPolicy, SignalChangeListener,
    ViewProcessSignal,
};

const CYCLE_CHANNEL_CAPACITY: usize = 64;

/// Handle to a running view process.
///
/// All graph state lives in a control loop task; this handle only sends it
/// signals and exposes what the loop publishes (state, cycle summaries and the
/// result model). Signals sent while a cycle runs are picked up at the next
/// AWAITING_SIGNAL.
pub struct ViewProcess {
    id: ViewProcessId,
    view_name: String,
    sender: mpsc::UnboundedSender<ViewProcessSignal>,
    change_listener: Arc<dyn ChangeListener>,
    state: watch::Receiver<CycleState>,
    cycles: broadcast::Sender<CycleSummary>,
    results: Arc<ResultModel>,
    result_listeners: Arc<RwLock<Vec<Arc<dyn ResultListener>>>>,
    statistics: Arc<dyn StatisticsGatherer>,
    configuration_errors: Vec<ConfigurationError>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ViewProcess {
    /// Builds a graph per configuration and spawns the control loop on the
    /// current tokio runtime.
    ///
    /// Configurations whose graph cannot be built are reported through
    /// [`ViewProcess::configuration_errors`] and every cycle summary; the
    /// remaining configurations still run.
    pub fn start(
        definition: ViewDefinition,
        options: ExecutionOptions,
        context: &EngineContext,
    ) -> Result<Self> {
        definition.validate()?;

        let id = ViewProcessId::new();
        let (state_tx, state_rx) = watch::channel(CycleState::Idle);
        let (sender, receiver) = mpsc::unbounded_channel();
        let (cycles, _) = broadcast::channel(CYCLE_CHANNEL_CAPACITY);
        let results = Arc::new(ResultModel::new());
        let result_listeners = Arc::new(RwLock::new(Vec::new()));
        let statistics = context.statistics.register(id);

        let mut control = ViewProcessControl {
            id,
            options,
            context: context.clone(),
            retry: RetryPolicy::from(&context.scheduler),
            workers: Arc::new(Semaphore::new(context.scheduler.worker_threads.max(1))),
            configurations: BTreeMap::new(),
            broken: BTreeMap::new(),
            snapshot: MarketDataSnapshot::new(),
            results: results.clone(),
            result_listeners: result_listeners.clone(),
            cycles: cycles.clone(),
            state: state_tx,
            statistics: statistics.clone(),
            cycle: 0,
            delta_cycles: 0,
            next_job_id: 0,
        };

        control.set_state(CycleState::BuildingGraph);
        let configuration_errors: Vec<ConfigurationError> = definition
            .configurations
            .into_iter()
            .filter_map(|configuration| control.install(configuration).err())
            .collect();

        let handle = tokio::spawn(control.run(receiver));
        info!(
            "Started view process {} for view {} ({} configuration errors)",
            id,
            definition.name,
            configuration_errors.len()
        );

        let change_listener: Arc<dyn ChangeListener> =
            Arc::new(SignalChangeListener::new(id.to_string(), sender.clone()));
        Ok(Self {
            id,
            view_name: definition.name,
            sender,
            change_listener,
            state: state_rx,
            cycles,
            results,
            result_listeners,
            statistics,
            configuration_errors,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn id(&self) -> ViewProcessId {
        self.id
    }

    pub fn view_name(&self) -> &str {
        &self.view_name
    }

    /// Graph construction failures from start-up.
    pub fn configuration_errors(&self) -> &[ConfigurationError] {
        &self.configuration_errors
    }

    pub fn tick(&self, ticks: Vec<MarketDataTick>) -> Result<()> {
        self.send(ViewProcessSignal::MarketData(ticks))
    }

    pub fn entity_changed(&self, event: ChangeEvent) -> Result<()> {
        self.send(ViewProcessSignal::EntityChanged(event))
    }

    pub fn trigger_cycle(&self) -> Result<()> {
        self.send(ViewProcessSignal::TriggerCycle)
    }

    /// Listener to register with a change manager. The same instance is
    /// returned on every call, so it can also be used to unregister.
    pub fn change_listener(&self) -> Arc<dyn ChangeListener> {
        self.change_listener.clone()
    }

    /// Adds or replaces a configuration. The graph is rebuilt before the
    /// reply; on failure the previous graph, if any, keeps running.
    pub async fn update_configuration(&self, configuration: CalculationConfiguration) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(ViewProcessSignal::UpdateConfiguration {
            configuration,
            reply,
        })?;
        let outcome = response
            .await
            .map_err(|_| CalcGraphError::Terminated(self.id.to_string()))?;
        outcome.map_err(CalcGraphError::from)
    }

    pub async fn remove_configuration(&self, name: &str) -> Result<bool> {
        let (reply, response) = oneshot::channel();
        self.send(ViewProcessSignal::RemoveConfiguration {
            name: name.to_string(),
            reply,
        })?;
        response
            .await
            .map_err(|_| CalcGraphError::Terminated(self.id.to_string()))
    }

    /// Drops `target`'s requirements from `configuration` along with its
    /// published results.
    pub fn remove_target(&self, configuration: &str, target: ComputationTarget) -> Result<()> {
        self.send(ViewProcessSignal::RemoveTarget {
            configuration: configuration.to_string(),
            target,
        })
    }

    pub fn results(&self) -> Arc<ResultModel> {
        self.results.clone()
    }

    pub fn add_result_listener(&self, listener: Arc<dyn ResultListener>) {
        self.result_listeners.write().push(listener);
    }

    pub fn statistics(&self) -> Arc<dyn StatisticsGatherer> {
        self.statistics.clone()
    }

    pub fn state(&self) -> CycleState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<CycleState> {
        self.state.clone()
    }

    /// Summaries of cycles completed after this call.
    pub fn subscribe_cycles(&self) -> broadcast::Receiver<CycleSummary> {
        self.cycles.subscribe()
    }

    pub fn is_terminated(&self) -> bool {
        self.state().is_terminal()
    }

    /// Asks the loop to stop once any running cycle completes, and waits for it.
    pub async fn stop(&self) -> Result<()> {
        // A loop that already terminated has dropped its receiver.
        let _ = self.sender.send(ViewProcessSignal::Stop);
        self.join().await
    }

    /// Waits for the control loop to terminate on its own.
    pub async fn join(&self) -> Result<()> {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle.await.map_err(|err| {
                CalcGraphError::InvalidOperation(format!(
                    "control loop of view process {} failed: {err}",
                    self.id
                ))
            })?;
        }
        Ok(())
    }

    fn send(&self, signal: ViewProcessSignal) -> Result<()> {
        self.sender
            .send(signal)
            .map_err(|_| CalcGraphError::Terminated(self.id.to_string()))
    }
}

struct ConfigurationState {
    configuration: CalculationConfiguration,
    graph: DependencyGraph,
    sizer: JobSizer,
}

#[derive(Default)]
struct PendingSignals {
    ticks: Vec<MarketDataTick>,
    changes: Vec<ChangeEvent>,
    triggered: bool,
}

impl PendingSignals {
    fn starts_cycle(&self, flags: ExecutionFlags) -> bool {
        self.triggered
            || (flags.trigger_on_market_data && !self.ticks.is_empty())
            || (flags.trigger_on_entity_changes && !self.changes.is_empty())
    }
}

/// State owned by the control loop task.
struct ViewProcessControl {
    id: ViewProcessId,
    options: ExecutionOptions,
    context: EngineContext,
    retry: RetryPolicy,
    workers: Arc<Semaphore>,
    configurations: BTreeMap<String, ConfigurationState>,
    /// Configurations that have never built successfully.
    broken: BTreeMap<String, ConfigurationError>,
    snapshot: MarketDataSnapshot,
    results: Arc<ResultModel>,
    result_listeners: Arc<RwLock<Vec<Arc<dyn ResultListener>>>>,
    cycles: broadcast::Sender<CycleSummary>,
    state: watch::Sender<CycleState>,
    statistics: Arc<dyn StatisticsGatherer>,
    cycle: u64,
    delta_cycles: u64,
    next_job_id: u64,
}

impl ViewProcessControl {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<ViewProcessSignal>) {
        let mut pending = PendingSignals::default();

        loop {
            if self.options.max_cycles.is_some_and(|max| self.cycle >= max) {
                info!("View process {} completed {} cycles", self.id, self.cycle);
                break;
            }

            self.set_state(CycleState::AwaitingSignal);
            let Some(signal) = receiver.recv().await else {
                debug!("All senders of view process {} dropped", self.id);
                break;
            };

            let mut stop = self.absorb(signal, &mut pending);
            while !stop {
                match receiver.try_recv() {
                    Ok(signal) => stop = self.absorb(signal, &mut pending),
                    Err(_) => break,
                }
            }
            if stop {
                break;
            }

            if pending.starts_cycle(self.options.flags) {
                let signals = std::mem::take(&mut pending);
                self.run_cycle(signals).await;
            }
        }

        receiver.close();
        self.set_state(CycleState::Terminated);
        info!("View process {} terminated", self.id);
    }

    fn set_state(&self, state: CycleState) {
        self.state.send_replace(state);
    }

    /// Queues a signal; returns true on stop.
    fn absorb(&mut self, signal: ViewProcessSignal, pending: &mut PendingSignals) -> bool {
        match signal {
            ViewProcessSignal::MarketData(ticks) => pending.ticks.extend(ticks),
            ViewProcessSignal::EntityChanged(event) => self.accept_change(event, pending),
            ViewProcessSignal::TriggerCycle => pending.triggered = true,
            ViewProcessSignal::UpdateConfiguration {
                configuration,
                reply,
            } => {
                self.set_state(CycleState::BuildingGraph);
                let outcome = self.install(configuration);
                if outcome.is_ok() {
                    pending.triggered = true;
                }
                let _ = reply.send(outcome);
            }
            ViewProcessSignal::RemoveConfiguration { name, reply } => {
                let _ = reply.send(self.remove_configuration(&name));
            }
            ViewProcessSignal::RemoveTarget {
                configuration,
                target,
            } => self.remove_target(&configuration, &target),
            ViewProcessSignal::Stop => return true,
        }
        false
    }

    fn accept_change(&self, event: ChangeEvent, pending: &mut PendingSignals) {
        if event.is_inverted() {
            warn!(
                "Ignoring {} of {} with inverted version window",
                event.change_type, event.object_id
            );
            return;
        }
        if !event.affects(self.options.resolver_version_correction, Utc::now()) {
            debug!(
                "{} of {} is not visible at {}",
                event.change_type, event.object_id, self.options.resolver_version_correction
            );
            return;
        }
        pending.changes.push(event);
    }

    /// Builds and installs a configuration's graph, replacing any previous one.
    fn install(
        &mut self,
        configuration: CalculationConfiguration,
    ) -> std::result::Result<(), ConfigurationError> {
        let name = configuration.name.clone();
        let built = DependencyGraphBuilder::new(
            &configuration,
            &self.context.functions,
            self.context.market_data.as_ref(),
        )
        .build();

        match built {
            Ok(graph) => {
                let sizer = self
                    .configurations
                    .remove(&name)
                    .map(|previous| previous.sizer)
                    .unwrap_or_else(|| JobSizer::new(&self.context.scheduler));
                self.broken.remove(&name);
                self.results.register_configuration(&name);
                self.configurations.insert(
                    name,
                    ConfigurationState {
                        configuration,
                        graph,
                        sizer,
                    },
                );
                Ok(())
            }
            Err(err) => {
                error!("Failed to build graph for configuration {}: {}", name, err);
                if !self.configurations.contains_key(&name) {
                    self.broken.insert(name, err.clone());
                }
                Err(err)
            }
        }
    }

    fn remove_configuration(&mut self, name: &str) -> bool {
        let removed = self.configurations.remove(name).is_some();
        let was_broken = self.broken.remove(name).is_some();
        self.results.remove_configuration(name);
        if removed || was_broken {
            info!("Removed configuration {} from view process {}", name, self.id);
        }
        removed || was_broken
    }

    fn remove_target(&mut self, configuration: &str, target: &ComputationTarget) {
        let Some(state) = self.configurations.get(configuration) else {
            warn!("Cannot remove {} from unknown configuration {}", target, configuration);
            return;
        };

        let mut updated = state.configuration.clone();
        updated.requirements.retain(|r| &r.target != target);
        if updated.requirements.len() != state.configuration.requirements.len() {
            self.set_state(CycleState::BuildingGraph);
            if let Err(err) = self.install(updated) {
                warn!("Keeping previous graph for {}: {}", configuration, err);
            }
        }
        self.results.remove_target(configuration, target);
    }

    async fn run_cycle(&mut self, signals: PendingSignals) {
        self.cycle += 1;
        let cycle = self.cycle;
        let started_at = Utc::now();
        let started = Instant::now();

        self.set_state(CycleState::MarkingStale);
        let full_recompute = self.mark_stale(&signals);
        debug!(
            "View process {} cycle {}: {} ticks, {} changes, full recompute {}",
            self.id,
            cycle,
            signals.ticks.len(),
            signals.changes.len(),
            full_recompute
        );

        let mut outcomes = Vec::with_capacity(self.configurations.len());
        let mut env = CycleEnv {
            cycle,
            retry: self.retry,
            workers: &self.workers,
            snapshot: &self.snapshot,
            statistics: self.statistics.as_ref(),
            state: &self.state,
            next_job_id: &mut self.next_job_id,
        };
        for state in self.configurations.values_mut() {
            outcomes.push(execute_configuration(state, &mut env).await);
        }

        self.set_state(CycleState::Aggregating);
        let mut configurations: Vec<ConfigurationCycleSummary> =
            outcomes.into_iter().map(|o| self.aggregate(o)).collect();
        configurations.extend(self.broken.iter().map(|(name, err)| ConfigurationCycleSummary {
            configuration: name.clone(),
            executed: Vec::new(),
            failed: Vec::new(),
            jobs: 0,
            job_size: 0,
            error: Some(err.to_string()),
        }));

        let summary = CycleSummary {
            view_process_id: self.id,
            cycle,
            full_recompute,
            started_at,
            duration: started.elapsed(),
            configurations,
        };
        info!(
            "View process {} finished cycle {} ({} nodes executed) in {:?}",
            self.id,
            cycle,
            summary.executed_count(),
            summary.duration
        );
        // No subscribers is fine.
        let _ = self.cycles.send(summary);
    }

    /// Applies ticks and entity changes to every graph. Returns whether this
    /// cycle is a full recompute.
    fn mark_stale(&mut self, signals: &PendingSignals) -> bool {
        for tick in &signals.ticks {
            self.snapshot.apply(tick.clone());
        }

        let full = self.cycle == 1
            || self
                .options
                .max_successive_delta_cycles
                .is_some_and(|max| self.delta_cycles >= max);
        if full {
            self.delta_cycles = 0;
        } else {
            self.delta_cycles += 1;
        }

        let entities: HashSet<&ObjectId> = signals.changes.iter().map(|c| &c.object_id).collect();
        for state in self.configurations.values_mut() {
            let graph = &mut state.graph;
            if full {
                graph.mark_all_stale();
                continue;
            }
            if !entities.is_empty() {
                graph.mark_stale_by_entities(|id| entities.contains(id));
            }
            if !signals.ticks.is_empty() {
                graph.mark_stale_where(|node| {
                    node.is_market_data() && signals.ticks.iter().any(|t| t.matches(node.output()))
                });
            }
        }
        full
    }

    fn aggregate(&self, outcome: ConfigurationOutcome) -> ConfigurationCycleSummary {
        let name = outcome.configuration;
        let delta = self.results.merge(&name, outcome.results);
        if !delta.is_empty() {
            self.notify(&name, &delta);
        }

        if !outcome.jobs.is_empty() {
            let total = outcome.jobs.len();
            let mean_size =
                outcome.jobs.iter().map(|j| j.size).sum::<usize>() as f64 / total as f64;
            let cycle_cost: Duration = outcome.jobs.iter().map(|j| j.cycle_cost).sum();
            let io_cost: Duration = outcome.jobs.iter().map(|j| j.io_cost).sum();
            self.statistics
                .graph_executed(&name, outcome.executed.len(), cycle_cost, outcome.duration);
            self.statistics.graph_processed(
                &name,
                total,
                mean_size,
                mean_duration(cycle_cost, total),
                mean_duration(io_cost, total),
            );
        }

        ConfigurationCycleSummary {
            configuration: name,
            executed: outcome.executed,
            failed: outcome.failed,
            jobs: outcome.jobs.len(),
            job_size: outcome.job_size,
            error: None,
        }
    }

    fn notify(&self, configuration: &str, delta: &[ComputedValueResult]) {
        let listeners = self.result_listeners.read().clone();
        for listener in listeners {
            let delivered = catch_unwind(AssertUnwindSafe(|| {
                listener.results_updated(configuration, delta)
            }));
            if delivered.is_err() {
                warn!("Result listener panicked while handling {}", configuration);
            }
        }
    }
}

/// Borrowed view of the control loop used while executing one cycle.
struct CycleEnv<'a> {
    cycle: u64,
    retry: RetryPolicy,
    workers: &'a Arc<Semaphore>,
    snapshot: &'a MarketDataSnapshot,
    statistics: &'a dyn StatisticsGatherer,
    state: &'a watch::Sender<CycleState>,
    next_job_id: &'a mut u64,
}

struct JobMetrics {
    size: usize,
    cycle_cost: Duration,
    io_cost: Duration,
}

struct ConfigurationOutcome {
    configuration: String,
    results: Vec<ComputedValueResult>,
    executed: Vec<ValueSpecification>,
    failed: Vec<ValueSpecification>,
    jobs: Vec<JobMetrics>,
    job_size: usize,
    duration: Duration,
}

impl ConfigurationOutcome {
    fn new(configuration: String, job_size: usize) -> Self {
        Self {
            configuration,
            results: Vec::new(),
            executed: Vec::new(),
            failed: Vec::new(),
            jobs: Vec::new(),
            job_size,
            duration: Duration::ZERO,
        }
    }

    fn record(&mut self, graph: &DependencyGraph, id: NodeId) {
        if let Some(result) = graph.result(id) {
            if result.is_failure() {
                self.failed.push(result.specification.clone());
            }
            self.results.push(result);
        }
    }

    fn apply(&mut self, graph: &mut DependencyGraph, item: ItemOutcome, cycle: u64) {
        self.executed.push(item.specification.clone());
        let applied = match item.result {
            Ok(value) => graph
                .complete(item.node, value, item.log, cycle)
                .map(|()| Vec::new()),
            Err(detail) => graph.fail(item.node, detail, item.log, cycle),
        };
        match applied {
            Ok(cascaded) => {
                self.record(graph, item.node);
                for id in cascaded {
                    self.record(graph, id);
                }
            }
            Err(err) => warn!("Discarding outcome for {}: {}", item.specification, err),
        }
    }

    /// Fails a node whose job never reported back.
    fn abandon(&mut self, graph: &mut DependencyGraph, id: NodeId, message: &str, cycle: u64) {
        let mut log = ExecutionLog::new();
        log.log(LogLevel::Error, message);
        let detail = FailureDetail::new(FailureStatus::Error, message);
        if let Some(node) = graph.node(id) {
            self.executed.push(node.output().clone());
        }
        match graph.fail(id, detail, log, cycle) {
            Ok(cascaded) => {
                self.record(graph, id);
                for dependent in cascaded {
                    self.record(graph, dependent);
                }
            }
            Err(err) => warn!("Cannot fail node {}: {}", id, err),
        }
    }
}

async fn execute_configuration(
    state: &mut ConfigurationState,
    env: &mut CycleEnv<'_>,
) -> ConfigurationOutcome {
    let started = Instant::now();
    let name = state.configuration.name.clone();
    let job_size = state
        .sizer
        .next_size(env.statistics.latest_job_statistics(&name).as_ref());
    let graph = &mut state.graph;
    let mut outcome = ConfigurationOutcome::new(name.clone(), job_size);

    for id in graph.fail_blocked(env.cycle) {
        outcome.record(graph, id);
    }

    let mut jobs = JoinSet::new();
    let mut in_flight: HashMap<u64, Vec<NodeId>> = HashMap::new();
    loop {
        let ready = graph.ready_nodes();
        if !ready.is_empty() {
            env.state.send_replace(CycleState::Scheduling);
            let items: Vec<JobItem> = ready
                .into_iter()
                .filter_map(|id| prepare_item(graph, id, env.snapshot))
                .collect();
            for chunk in partition(items, job_size) {
                *env.next_job_id += 1;
                let job = ExecutionJob {
                    id: *env.next_job_id,
                    configuration: name.clone(),
                    items: chunk,
                };
                in_flight.insert(job.id, job.items.iter().map(|item| item.node).collect());
                jobs.spawn(run_job(job, env.retry, env.workers.clone()));
            }
            env.state.send_replace(CycleState::Executing);
        }

        let Some(joined) = jobs.join_next().await else {
            break;
        };
        match joined {
            Ok((job_id, Ok(job))) => {
                in_flight.remove(&job_id);
                outcome.jobs.push(JobMetrics {
                    size: job.items.len(),
                    cycle_cost: job.cycle_cost,
                    io_cost: job.io_cost,
                });
                for item in job.items {
                    outcome.apply(graph, item, env.cycle);
                }
            }
            Ok((job_id, Err(message))) => {
                error!("Job {} for {} panicked: {}", job_id, name, message);
                for id in in_flight.remove(&job_id).unwrap_or_default() {
                    outcome.abandon(graph, id, &message, env.cycle);
                }
            }
            Err(err) => error!("Job task for {} failed: {}", name, err),
        }
    }

    for (_, nodes) in in_flight.drain() {
        for id in nodes {
            outcome.abandon(graph, id, "job did not complete", env.cycle);
        }
    }

    outcome.duration = started.elapsed();
    outcome
}

fn prepare_item(
    graph: &mut DependencyGraph,
    id: NodeId,
    snapshot: &MarketDataSnapshot,
) -> Option<JobItem> {
    let node = graph.node(id)?;
    let specification = node.output().clone();
    let body = match node.function() {
        NodeFunction::MarketData => {
            JobBody::MarketData(snapshot.value_for(&specification).cloned())
        }
        NodeFunction::Calculation(function) => JobBody::Calculation {
            function: function.clone(),
            inputs: graph.input_values(id),
        },
    };
    if let Err(err) = graph.begin_execution(id) {
        warn!("Skipping {}: {}", specification, err);
        return None;
    }
    Some(JobItem {
        node: id,
        specification,
        body,
    })
}

async fn run_job(
    job: ExecutionJob,
    retry: RetryPolicy,
    workers: Arc<Semaphore>,
) -> (u64, std::result::Result<JobOutcome, String>) {
    let id = job.id;
    let Ok(_permit) = workers.acquire_owned().await else {
        return (id, Err("worker pool closed".to_string()));
    };
    match AssertUnwindSafe(job.run(retry)).catch_unwind().await {
        Ok(outcome) => (id, Ok(outcome)),
        Err(panic) => (id, Err(panic_message(panic.as_ref()))),
    }
}

fn mean_duration(total: Duration, count: usize) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    total.div_f64(count as f64)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("job panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("job panicked: {message}")
    } else {
        "job panicked".to_string()
    }
}
