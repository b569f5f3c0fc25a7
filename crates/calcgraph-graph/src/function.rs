use async_trait::async_trait;
use calcgraph_core::{
    ComputationTarget, NamedRegistry, ObjectId, Value, ValueRequirement, ValueSpecification,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by a calculation function body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FunctionError {
    #[error("calculation failed: {0}")]
    Failed(String),

    #[error("missing input: {0}")]
    MissingInput(String),

    /// Worth retrying: I/O hiccups, timeouts, contended resources.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl FunctionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FunctionError::Transient(_))
    }
}

/// What a function needs to produce one output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionRequirements {
    pub inputs: Vec<ValueRequirement>,
    /// Reference-data entities the output was resolved against.
    pub entities: BTreeSet<ObjectId>,
}

impl FunctionRequirements {
    pub fn new(inputs: Vec<ValueRequirement>) -> Self {
        Self {
            inputs,
            entities: BTreeSet::new(),
        }
    }

    pub fn with_entities(mut self, entities: impl IntoIterator<Item = ObjectId>) -> Self {
        self.entities.extend(entities);
        self
    }
}

/// Resolved input values handed to a function invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionInputs {
    values: BTreeMap<ValueSpecification, Value>,
}

impl FunctionInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, specification: ValueSpecification, value: Value) {
        self.values.insert(specification, value);
    }

    pub fn get(&self, specification: &ValueSpecification) -> Option<&Value> {
        self.values.get(specification)
    }

    pub fn for_requirement(&self, requirement: &ValueRequirement) -> Option<&Value> {
        self.values
            .iter()
            .find(|(spec, _)| spec.satisfies(requirement))
            .map(|(_, value)| value)
    }

    /// First input named `value_name` on `target`.
    pub fn named(&self, value_name: &str, target: &ComputationTarget) -> Option<&Value> {
        self.values
            .iter()
            .find(|(spec, _)| spec.value_name == value_name && &spec.target == target)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ValueSpecification, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A pure calculation used as a node body. Must be safe to call concurrently
/// for distinct nodes.
#[async_trait]
pub trait CalculationFunction: Send + Sync {
    fn name(&self) -> &str;

    fn can_apply_to(&self, _target: &ComputationTarget) -> bool {
        true
    }

    /// Specifications this function can produce on `target`.
    fn results(&self, target: &ComputationTarget) -> Vec<ValueSpecification>;

    /// Inputs needed to produce `output` for `desired`, or `None` if this
    /// function cannot satisfy it.
    fn requirements(
        &self,
        output: &ValueSpecification,
        desired: &ValueRequirement,
    ) -> Option<FunctionRequirements>;

    async fn execute(
        &self,
        target: &ComputationTarget,
        inputs: &FunctionInputs,
        output: &ValueSpecification,
    ) -> Result<Value, FunctionError>;
}

/// Calculation functions available to graph construction, keyed by name.
#[derive(Default)]
pub struct FunctionRepository {
    functions: NamedRegistry<dyn CalculationFunction>,
}

impl FunctionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, function: Arc<dyn CalculationFunction>) -> Option<Arc<dyn CalculationFunction>> {
        let name = function.name().to_string();
        self.functions.register(name, function)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CalculationFunction>> {
        self.functions.get(name)
    }

    /// All functions in name order; resolution tries them in this order.
    pub fn functions(&self) -> Vec<Arc<dyn CalculationFunction>> {
        self.functions.instances()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
