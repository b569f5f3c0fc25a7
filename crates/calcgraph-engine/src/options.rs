use calcgraph_core::VersionCorrection;
use serde::{Deserialize, Serialize};

/// Which signals start a cycle on their own. An explicit trigger always does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFlags {
    pub trigger_on_market_data: bool,
    pub trigger_on_entity_changes: bool,
}

impl ExecutionFlags {
    pub fn manual() -> Self {
        Self {
            trigger_on_market_data: false,
            trigger_on_entity_changes: false,
        }
    }
}

impl Default for ExecutionFlags {
    fn default() -> Self {
        Self {
            trigger_on_market_data: true,
            trigger_on_entity_changes: true,
        }
    }
}

/// How a view process schedules its cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    #[serde(default)]
    pub flags: ExecutionFlags,

    /// Terminate after this many cycles; `None` runs until stopped.
    #[serde(default)]
    pub max_cycles: Option<u64>,

    /// Delta cycles allowed between full recomputes; `None` never forces one.
    #[serde(default)]
    pub max_successive_delta_cycles: Option<u64>,

    /// Version-correction entity changes are resolved against.
    #[serde(default)]
    pub resolver_version_correction: VersionCorrection,
}

impl ExecutionOptions {
    pub fn infinite() -> Self {
        Self {
            flags: ExecutionFlags::default(),
            max_cycles: None,
            max_successive_delta_cycles: None,
            resolver_version_correction: VersionCorrection::LATEST,
        }
    }

    pub fn batch(max_cycles: u64) -> Self {
        Self {
            max_cycles: Some(max_cycles),
            ..Self::infinite()
        }
    }

    pub fn with_flags(mut self, flags: ExecutionFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_max_successive_delta_cycles(mut self, max: u64) -> Self {
        self.max_successive_delta_cycles = Some(max);
        self
    }

    pub fn with_resolver_version_correction(mut self, resolver: VersionCorrection) -> Self {
        self.resolver_version_correction = resolver;
        self
    }
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self::infinite()
    }
}
