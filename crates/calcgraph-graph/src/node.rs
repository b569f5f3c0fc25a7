use calcgraph_core::{ExecutionLog, FailureDetail, ObjectId, Value, ValueSpecification};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::CalculationFunction;

/// Index of a node within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a node obtains its value.
#[derive(Clone)]
pub enum NodeFunction {
    /// Leaf fed by market-data ticks.
    MarketData,
    Calculation(Arc<dyn CalculationFunction>),
}

impl NodeFunction {
    pub fn name(&self) -> &str {
        match self {
            NodeFunction::MarketData => "market-data",
            NodeFunction::Calculation(function) => function.name(),
        }
    }
}

impl fmt::Debug for NodeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeFunction::MarketData => f.write_str("MarketData"),
            NodeFunction::Calculation(function) => {
                f.debug_tuple("Calculation").field(&function.name()).finish()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Never executed.
    Pending,
    /// Placed in a job, not yet started.
    Ready,
    Executing,
    Computed,
    Failed,
    /// Last value no longer guaranteed valid.
    Stale,
}

impl NodeStatus {
    pub fn needs_execution(self) -> bool {
        matches!(self, NodeStatus::Pending | NodeStatus::Stale)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, NodeStatus::Ready | NodeStatus::Executing)
    }
}

/// One calculation step. Inputs are held as specifications and resolved to
/// nodes through the owning graph.
#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub(crate) id: NodeId,
    pub(crate) function: NodeFunction,
    pub(crate) output: ValueSpecification,
    pub(crate) inputs: Vec<ValueSpecification>,
    pub(crate) entities: BTreeSet<ObjectId>,
    pub(crate) status: NodeStatus,
    pub(crate) value: Option<Value>,
    pub(crate) failure: Option<FailureDetail>,
    pub(crate) log: Option<ExecutionLog>,
    pub(crate) last_cycle: Option<u64>,
}

impl DependencyNode {
    pub(crate) fn new(
        id: NodeId,
        function: NodeFunction,
        output: ValueSpecification,
        inputs: Vec<ValueSpecification>,
        entities: BTreeSet<ObjectId>,
    ) -> Self {
        Self {
            id,
            function,
            output,
            inputs,
            entities,
            status: NodeStatus::Pending,
            value: None,
            failure: None,
            log: None,
            last_cycle: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn function(&self) -> &NodeFunction {
        &self.function
    }

    pub fn is_market_data(&self) -> bool {
        matches!(self.function, NodeFunction::MarketData)
    }

    pub fn output(&self) -> &ValueSpecification {
        &self.output
    }

    pub fn inputs(&self) -> &[ValueSpecification] {
        &self.inputs
    }

    /// Entities this node's resolution depended on.
    pub fn entities(&self) -> &BTreeSet<ObjectId> {
        &self.entities
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn failure(&self) -> Option<&FailureDetail> {
        self.failure.as_ref()
    }

    pub fn execution_log(&self) -> Option<&ExecutionLog> {
        self.log.as_ref()
    }

    /// Cycle of the last execution (or failure) of this node.
    pub fn last_cycle(&self) -> Option<u64> {
        self.last_cycle
    }
}
