use calcgraph_core::{ObjectId, ValueRequirement, ValueSpecification};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

/// A requirement that will be satisfied by live market data instead of a
/// calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketDataSource {
    pub specification: ValueSpecification,
    /// Reference-data entities describing where the data comes from.
    pub entities: BTreeSet<ObjectId>,
}

pub trait MarketDataAvailabilityProvider: Send + Sync {
    fn resolve(&self, requirement: &ValueRequirement) -> Option<MarketDataSource>;
}

/// Market data keyed by value name, available on every target.
#[derive(Default)]
pub struct InMemoryMarketDataAvailability {
    lines: RwLock<HashMap<String, BTreeSet<ObjectId>>>,
}

impl InMemoryMarketDataAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, value_name: impl Into<String>, entities: impl IntoIterator<Item = ObjectId>) {
        self.lines
            .write()
            .entry(value_name.into())
            .or_default()
            .extend(entities);
    }

    pub fn remove(&self, value_name: &str) -> bool {
        self.lines.write().remove(value_name).is_some()
    }

    pub fn is_available(&self, value_name: &str) -> bool {
        self.lines.read().contains_key(value_name)
    }
}

impl MarketDataAvailabilityProvider for InMemoryMarketDataAvailability {
    fn resolve(&self, requirement: &ValueRequirement) -> Option<MarketDataSource> {
        let lines = self.lines.read();
        let entities = lines.get(&requirement.value_name)?;
        Some(MarketDataSource {
            specification: ValueSpecification::new(
                requirement.value_name.clone(),
                requirement.target.clone(),
                requirement.constraints.clone(),
            ),
            entities: entities.clone(),
        })
    }
}
