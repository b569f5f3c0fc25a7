use calcgraph_core::{Timestamp, ValueSpecification, ViewProcessId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What one calculation configuration did during a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationCycleSummary {
    pub configuration: String,
    /// Nodes whose function ran (or whose tick was read) this cycle.
    pub executed: Vec<ValueSpecification>,
    /// Nodes that ended the cycle failed, including missing-input cascades.
    pub failed: Vec<ValueSpecification>,
    pub jobs: usize,
    pub job_size: usize,
    /// Set when the configuration has no graph, e.g. it failed to build.
    pub error: Option<String>,
}

impl ConfigurationCycleSummary {
    pub fn was_executed(&self, value_name: &str) -> bool {
        self.executed.iter().any(|s| s.value_name == value_name)
    }

    pub fn has_failed(&self, value_name: &str) -> bool {
        self.failed.iter().any(|s| s.value_name == value_name)
    }
}

/// Published on a view process's cycle channel once AGGREGATING completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub view_process_id: ViewProcessId,
    pub cycle: u64,
    pub full_recompute: bool,
    pub started_at: Timestamp,
    pub duration: Duration,
    pub configurations: Vec<ConfigurationCycleSummary>,
}

impl CycleSummary {
    pub fn configuration(&self, name: &str) -> Option<&ConfigurationCycleSummary> {
        self.configurations.iter().find(|c| c.configuration == name)
    }

    pub fn executed_count(&self) -> usize {
        self.configurations.iter().map(|c| c.executed.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calcgraph_core::{ComputationTarget, ObjectId, ValueProperties};
    use chrono::Utc;

    fn spec(name: &str) -> ValueSpecification {
        ValueSpecification::new(
            name,
            ComputationTarget::primitive(ObjectId::of("Trade", "T")),
            ValueProperties::new(),
        )
    }

    #[test]
    fn summary_lookups_and_json_shape() {
        let summary = CycleSummary {
            view_process_id: ViewProcessId::new(),
            cycle: 3,
            full_recompute: false,
            started_at: Utc::now(),
            duration: Duration::from_millis(4),
            configurations: vec![ConfigurationCycleSummary {
                configuration: "Default".to_string(),
                executed: vec![spec("X"), spec("V")],
                failed: vec![spec("V")],
                jobs: 1,
                job_size: 16,
                error: None,
            }],
        };

        let default = summary.configuration("Default").unwrap();
        assert!(default.was_executed("X"));
        assert!(default.has_failed("V"));
        assert!(!default.has_failed("X"));
        assert!(summary.configuration("Risk").is_none());
        assert_eq!(summary.executed_count(), 2);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["cycle"], 3);
        assert_eq!(json["configurations"][0]["jobs"], 1);
        assert!(json["configurations"][0]["error"].is_null());
    }
}
