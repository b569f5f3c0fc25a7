#![allow(dead_code)]

use async_trait::async_trait;
use calcgraph_core::{
    ComputationTarget, ObjectId, SchedulerConfig, Value, ValueProperties, ValueRequirement,
    ValueSpecification,
};
use calcgraph_engine::*;
use calcgraph_graph::{
    CalculationConfiguration, CalculationFunction, FormulaFunction, FunctionError,
    FunctionInputs, FunctionRepository, FunctionRequirements, InMemoryMarketDataAvailability,
    Operation, ViewDefinition,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};

pub const CONFIGURATION: &str = "Default";

pub fn target() -> ComputationTarget {
    ComputationTarget::primitive(ObjectId::of("Trade", "T1"))
}

pub fn ticker(name: &str) -> ObjectId {
    ObjectId::of("Ticker", name)
}

pub fn tick(value_name: &str, value: f64) -> MarketDataTick {
    MarketDataTick::new(target(), value_name, value)
}

/// Context whose market data provides `market` (each tied to a `Ticker~name`
/// entity) and whose repository holds `functions`.
pub fn context(functions: Vec<Arc<dyn CalculationFunction>>, market: &[&str]) -> EngineContext {
    let repository = FunctionRepository::new();
    for function in functions {
        repository.register(function);
    }
    let availability = InMemoryMarketDataAvailability::new();
    for name in market {
        availability.add(*name, [ticker(name)]);
    }
    EngineContext::new(Arc::new(repository), Arc::new(availability)).with_scheduler(SchedulerConfig {
        worker_threads: 4,
        retry_backoff_ms: 1,
        ..SchedulerConfig::default()
    })
}

pub fn view(values: &[&str]) -> ViewDefinition {
    let mut configuration = CalculationConfiguration::new(CONFIGURATION);
    for value in values {
        configuration = configuration.with_requirement(ValueRequirement::new(*value, target()));
    }
    ViewDefinition::new("test-view").with_configuration(configuration)
}

/// Cycles only run on explicit triggers.
pub fn manual() -> ExecutionOptions {
    ExecutionOptions::infinite().with_flags(ExecutionFlags::manual())
}

pub async fn next_cycle(cycles: &mut broadcast::Receiver<CycleSummary>) -> CycleSummary {
    tokio::time::timeout(Duration::from_secs(10), cycles.recv())
        .await
        .expect("cycle did not complete in time")
        .expect("cycle channel closed")
}

pub async fn run_cycle(
    process: &ViewProcess,
    cycles: &mut broadcast::Receiver<CycleSummary>,
) -> CycleSummary {
    process.trigger_cycle().unwrap();
    next_cycle(cycles).await
}

pub fn value(process: &ViewProcess, value_name: &str) -> Option<f64> {
    process
        .results()
        .value_named(CONFIGURATION, &target(), value_name)
        .and_then(|r| r.as_f64())
}

pub fn formula(
    name: &str,
    output: &str,
    operation: Operation,
    inputs: &[&str],
) -> Arc<dyn CalculationFunction> {
    Arc::new(FormulaFunction::new(name, output, operation, inputs.iter().copied()))
}

/// Records the order in which wrapped functions execute.
pub struct Tracked {
    inner: FormulaFunction,
    executions: Arc<Mutex<Vec<String>>>,
}

impl Tracked {
    pub fn new(
        inner: FormulaFunction,
        executions: Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn CalculationFunction> {
        Arc::new(Self { inner, executions })
    }
}

#[async_trait]
impl CalculationFunction for Tracked {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn results(&self, target: &ComputationTarget) -> Vec<ValueSpecification> {
        self.inner.results(target)
    }

    fn requirements(
        &self,
        output: &ValueSpecification,
        desired: &ValueRequirement,
    ) -> Option<FunctionRequirements> {
        self.inner.requirements(output, desired)
    }

    async fn execute(
        &self,
        target: &ComputationTarget,
        inputs: &FunctionInputs,
        output: &ValueSpecification,
    ) -> Result<Value, FunctionError> {
        self.executions.lock().push(output.value_name.clone());
        self.inner.execute(target, inputs, output).await
    }
}

/// Input-free function that blocks until a permit is available on `gate`.
pub struct Gated {
    output: String,
    gate: Arc<Semaphore>,
    entities: Vec<ObjectId>,
}

impl Gated {
    pub fn new(
        output: &str,
        gate: Arc<Semaphore>,
        entities: Vec<ObjectId>,
    ) -> Arc<dyn CalculationFunction> {
        Arc::new(Self {
            output: output.to_string(),
            gate,
            entities,
        })
    }
}

#[async_trait]
impl CalculationFunction for Gated {
    fn name(&self) -> &str {
        "gated"
    }

    fn results(&self, target: &ComputationTarget) -> Vec<ValueSpecification> {
        vec![ValueSpecification::new(
            self.output.clone(),
            target.clone(),
            ValueProperties::new(),
        )]
    }

    fn requirements(
        &self,
        _output: &ValueSpecification,
        _desired: &ValueRequirement,
    ) -> Option<FunctionRequirements> {
        Some(FunctionRequirements::new(Vec::new()).with_entities(self.entities.iter().cloned()))
    }

    async fn execute(
        &self,
        _target: &ComputationTarget,
        _inputs: &FunctionInputs,
        _output: &ValueSpecification,
    ) -> Result<Value, FunctionError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|err| FunctionError::Failed(err.to_string()))?;
        Ok(Value::Double(1.0))
    }
}

/// Input-free function that never finishes within any sensible timeout.
pub struct Slow;

#[async_trait]
impl CalculationFunction for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    fn results(&self, target: &ComputationTarget) -> Vec<ValueSpecification> {
        vec![ValueSpecification::new("Slow", target.clone(), ValueProperties::new())]
    }

    fn requirements(
        &self,
        _output: &ValueSpecification,
        _desired: &ValueRequirement,
    ) -> Option<FunctionRequirements> {
        Some(FunctionRequirements::new(Vec::new()))
    }

    async fn execute(
        &self,
        _target: &ComputationTarget,
        _inputs: &FunctionInputs,
        _output: &ValueSpecification,
    ) -> Result<Value, FunctionError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Value::Double(0.0))
    }
}

/// Sleeps for `delay` before delegating, then records the finished output.
pub struct Delayed {
    inner: FormulaFunction,
    delay: Duration,
    completions: Arc<Mutex<Vec<String>>>,
}

impl Delayed {
    pub fn new(
        inner: FormulaFunction,
        delay: Duration,
        completions: Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn CalculationFunction> {
        Arc::new(Self {
            inner,
            delay,
            completions,
        })
    }
}

#[async_trait]
impl CalculationFunction for Delayed {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn results(&self, target: &ComputationTarget) -> Vec<ValueSpecification> {
        self.inner.results(target)
    }

    fn requirements(
        &self,
        output: &ValueSpecification,
        desired: &ValueRequirement,
    ) -> Option<FunctionRequirements> {
        self.inner.requirements(output, desired)
    }

    async fn execute(
        &self,
        target: &ComputationTarget,
        inputs: &FunctionInputs,
        output: &ValueSpecification,
    ) -> Result<Value, FunctionError> {
        tokio::time::sleep(self.delay).await;
        let value = self.inner.execute(target, inputs, output).await;
        self.completions.lock().push(output.value_name.clone());
        value
    }
}
