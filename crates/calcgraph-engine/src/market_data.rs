use calcgraph_core::{ComputationTarget, Timestamp, Value, ValueSpecification};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A new observation of one market-data value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataTick {
    pub target: ComputationTarget,
    pub value_name: String,
    pub value: Value,
    pub timestamp: Timestamp,
}

impl MarketDataTick {
    pub fn new(target: ComputationTarget, value_name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            target,
            value_name: value_name.into(),
            value: value.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn matches(&self, specification: &ValueSpecification) -> bool {
        self.value_name == specification.value_name && self.target == specification.target
    }
}

/// Latest tick per (target, value name), owned by a view process's control loop.
#[derive(Debug, Clone, Default)]
pub struct MarketDataSnapshot {
    values: HashMap<(ComputationTarget, String), MarketDataTick>,
}

impl MarketDataSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `tick` unless a later observation is already held. Returns
    /// whether the snapshot changed.
    pub fn apply(&mut self, tick: MarketDataTick) -> bool {
        let key = (tick.target.clone(), tick.value_name.clone());
        match self.values.get(&key) {
            Some(current) if current.timestamp > tick.timestamp => false,
            _ => {
                self.values.insert(key, tick);
                true
            }
        }
    }

    pub fn value_for(&self, specification: &ValueSpecification) -> Option<&Value> {
        self.values
            .get(&(specification.target.clone(), specification.value_name.clone()))
            .map(|tick| &tick.value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
