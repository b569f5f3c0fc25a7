use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{ComputationTarget, ComputedValueResult, ValueSpecification};

type TargetResults = BTreeMap<ValueSpecification, ComputedValueResult>;
type ConfigurationResults = BTreeMap<ComputationTarget, TargetResults>;

/// Receives the results merged for one configuration after a cycle.
pub trait ResultListener: Send + Sync {
    fn results_updated(&self, configuration: &str, delta: &[ComputedValueResult]);
}

/// Computed values keyed by configuration, target and specification.
///
/// A configuration is *known* once registered or merged into, even if it has
/// no values; queries on unknown configurations return `None`. Merges are
/// last-write-wins per specification and never drop entries that were not part
/// of the merge.
#[derive(Default)]
pub struct ResultModel {
    configurations: RwLock<BTreeMap<String, ConfigurationResults>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationSnapshot {
    pub name: String,
    pub values: Vec<ComputedValueResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultModelSnapshot {
    pub configurations: Vec<ConfigurationSnapshot>,
}

impl ResultModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_configuration(&self, name: &str) {
        self.configurations
            .write()
            .entry(name.to_string())
            .or_default();
    }

    pub fn remove_configuration(&self, name: &str) -> bool {
        self.configurations.write().remove(name).is_some()
    }

    /// Configurations holding at least one recorded value.
    pub fn calculation_configuration_names(&self) -> BTreeSet<String> {
        self.configurations
            .read()
            .iter()
            .filter(|(_, targets)| targets.values().any(|values| !values.is_empty()))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Every known configuration, including those without values.
    pub fn known_configuration_names(&self) -> BTreeSet<String> {
        self.configurations.read().keys().cloned().collect()
    }

    pub fn all_values(&self, configuration: &str) -> Option<Vec<ComputedValueResult>> {
        self.configurations.read().get(configuration).map(|targets| {
            targets
                .values()
                .flat_map(|values| values.values().cloned())
                .collect()
        })
    }

    pub fn all_targets(&self, configuration: &str) -> Option<Vec<ComputationTarget>> {
        self.configurations
            .read()
            .get(configuration)
            .map(|targets| targets.keys().cloned().collect())
    }

    pub fn target_values(
        &self,
        configuration: &str,
        target: &ComputationTarget,
    ) -> Option<Vec<ComputedValueResult>> {
        self.configurations
            .read()
            .get(configuration)?
            .get(target)
            .map(|values| values.values().cloned().collect())
    }

    pub fn value(
        &self,
        configuration: &str,
        specification: &ValueSpecification,
    ) -> Option<ComputedValueResult> {
        self.configurations
            .read()
            .get(configuration)?
            .get(&specification.target)?
            .get(specification)
            .cloned()
    }

    /// First value named `value_name` on `target`, whatever its properties.
    pub fn value_named(
        &self,
        configuration: &str,
        target: &ComputationTarget,
        value_name: &str,
    ) -> Option<ComputedValueResult> {
        self.configurations
            .read()
            .get(configuration)?
            .get(target)?
            .values()
            .find(|r| r.specification.value_name == value_name)
            .cloned()
    }

    /// Merges `results` into `configuration` and returns them as the delta.
    pub fn merge(
        &self,
        configuration: &str,
        results: Vec<ComputedValueResult>,
    ) -> Vec<ComputedValueResult> {
        let mut configurations = self.configurations.write();
        let targets = configurations.entry(configuration.to_string()).or_default();
        for result in &results {
            targets
                .entry(result.specification.target.clone())
                .or_default()
                .insert(result.specification.clone(), result.clone());
        }
        results
    }

    pub fn remove_target(&self, configuration: &str, target: &ComputationTarget) -> bool {
        self.configurations
            .write()
            .get_mut(configuration)
            .is_some_and(|targets| targets.remove(target).is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.calculation_configuration_names().is_empty()
    }

    pub fn snapshot(&self) -> ResultModelSnapshot {
        let configurations = self
            .configurations
            .read()
            .iter()
            .map(|(name, targets)| ConfigurationSnapshot {
                name: name.clone(),
                values: targets
                    .values()
                    .flat_map(|values| values.values().cloned())
                    .collect(),
            })
            .collect();
        ResultModelSnapshot { configurations }
    }
}
