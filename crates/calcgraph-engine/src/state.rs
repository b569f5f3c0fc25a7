use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of a view process's control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    BuildingGraph,
    AwaitingSignal,
    MarkingStale,
    Scheduling,
    Executing,
    Aggregating,
    Terminated,
}

impl CycleState {
    pub fn is_terminal(self) -> bool {
        self == CycleState::Terminated
    }

    /// Between MARKING_STALE and AGGREGATING inclusive.
    pub fn is_cycle_running(self) -> bool {
        matches!(
            self,
            CycleState::MarkingStale
                | CycleState::Scheduling
                | CycleState::Executing
                | CycleState::Aggregating
        )
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "IDLE",
            CycleState::BuildingGraph => "BUILDING_GRAPH",
            CycleState::AwaitingSignal => "AWAITING_SIGNAL",
            CycleState::MarkingStale => "MARKING_STALE",
            CycleState::Scheduling => "SCHEDULING",
            CycleState::Executing => "EXECUTING",
            CycleState::Aggregating => "AGGREGATING",
            CycleState::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}
