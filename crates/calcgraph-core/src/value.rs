use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputationTargetType {
    PortfolioNode,
    Position,
    Trade,
    Security,
    Primitive,
}

impl fmt::Display for ComputationTargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComputationTargetType::PortfolioNode => "PORTFOLIO_NODE",
            ComputationTargetType::Position => "POSITION",
            ComputationTargetType::Trade => "TRADE",
            ComputationTargetType::Security => "SECURITY",
            ComputationTargetType::Primitive => "PRIMITIVE",
        };
        f.write_str(name)
    }
}

/// Something a value is computed against. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComputationTarget {
    #[serde(rename = "type")]
    pub target_type: ComputationTargetType,
    pub id: ObjectId,
}

impl ComputationTarget {
    pub fn new(target_type: ComputationTargetType, id: ObjectId) -> Self {
        Self { target_type, id }
    }

    pub fn primitive(id: ObjectId) -> Self {
        Self::new(ComputationTargetType::Primitive, id)
    }
}

impl fmt::Display for ComputationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target_type, self.id)
    }
}

/// Sorted name/value properties. As constraints on a requirement every entry
/// must be matched exactly by the specification's properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueProperties(BTreeMap<String, String>);

impl ValueProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn satisfies(&self, constraints: &ValueProperties) -> bool {
        constraints
            .0
            .iter()
            .all(|(name, value)| self.0.get(name) == Some(value))
    }

    /// Union where `other` wins on conflicting names.
    pub fn merged(&self, other: &ValueProperties) -> ValueProperties {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        ValueProperties(merged)
    }
}

impl fmt::Display for ValueProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{{{}}}", parts.join(","))
    }
}

/// A request for a named value on a target, under constraints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueRequirement {
    pub value_name: String,
    pub target: ComputationTarget,
    #[serde(default)]
    pub constraints: ValueProperties,
}

impl ValueRequirement {
    pub fn new(value_name: impl Into<String>, target: ComputationTarget) -> Self {
        Self {
            value_name: value_name.into(),
            target,
            constraints: ValueProperties::new(),
        }
    }

    pub fn with_constraints(mut self, constraints: ValueProperties) -> Self {
        self.constraints = constraints;
        self
    }
}

impl fmt::Display for ValueRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}{}", self.value_name, self.target, self.constraints)
    }
}

/// The concrete, resolved form of a requirement: exactly what a node produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueSpecification {
    pub value_name: String,
    pub target: ComputationTarget,
    #[serde(default)]
    pub properties: ValueProperties,
}

impl ValueSpecification {
    pub fn new(
        value_name: impl Into<String>,
        target: ComputationTarget,
        properties: ValueProperties,
    ) -> Self {
        Self {
            value_name: value_name.into(),
            target,
            properties,
        }
    }

    pub fn satisfies(&self, requirement: &ValueRequirement) -> bool {
        self.value_name == requirement.value_name
            && self.target == requirement.target
            && self.properties.satisfies(&requirement.constraints)
    }
}

impl fmt::Display for ValueSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}{}", self.value_name, self.target, self.properties)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Double(f64),
    Vector(Vec<f64>),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Vector(_) | Value::Text(_) => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Double(v) => write!(f, "{v}"),
            Value::Vector(values) => write!(f, "{values:?}"),
            Value::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedValue {
    pub specification: ValueSpecification,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStatus {
    /// The calculation function raised an error.
    Error,
    /// An input failed or was unavailable, so the node was never executed.
    MissingInput,
    /// Execution kept timing out until the retry budget ran out.
    Timeout,
}

impl fmt::Display for FailureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureStatus::Error => "ERROR",
            FailureStatus::MissingInput => "MISSING_INPUT",
            FailureStatus::Timeout => "TIMEOUT",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub status: FailureStatus,
    pub message: String,
}

impl FailureDetail {
    pub fn new(status: FailureStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ResultValue {
    Computed(Value),
    Failed(FailureDetail),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// What happened while executing one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub entries: Vec<LogEntry>,
    pub attempts: u32,
    pub duration: Duration,
    pub failure: Option<FailureDetail>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.entries.push(LogEntry {
            level,
            message: message.into(),
        });
    }

    pub fn has_warnings(&self) -> bool {
        self.entries.iter().any(|e| e.level >= LogLevel::Warn)
    }

    pub fn has_failure(&self) -> bool {
        self.failure.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputLog {
    pub specification: ValueSpecification,
    pub log: ExecutionLog,
}

/// A node's own log plus the logs of any inputs that failed or warned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedExecutionLog {
    pub log: ExecutionLog,
    pub inputs: Vec<InputLog>,
}

impl AggregatedExecutionLog {
    pub fn of(log: ExecutionLog) -> Self {
        Self {
            log,
            inputs: Vec::new(),
        }
    }

    pub fn add_input(&mut self, specification: ValueSpecification, log: ExecutionLog) {
        if (log.has_failure() || log.has_warnings())
            && !self.inputs.iter().any(|i| i.specification == specification)
        {
            self.inputs.push(InputLog { specification, log });
        }
    }

    /// Inputs whose own failure was not caused by a missing input.
    pub fn root_causes(&self) -> impl Iterator<Item = &ValueSpecification> {
        self.inputs
            .iter()
            .filter(|i| {
                i.log
                    .failure
                    .as_ref()
                    .is_some_and(|f| f.status != FailureStatus::MissingInput)
            })
            .map(|i| &i.specification)
    }
}

/// One entry of the result model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedValueResult {
    pub specification: ValueSpecification,
    pub value: ResultValue,
    pub execution_log: AggregatedExecutionLog,
    /// Cycle in which the value was produced.
    pub cycle: u64,
}

impl ComputedValueResult {
    pub fn computed(
        specification: ValueSpecification,
        value: Value,
        execution_log: AggregatedExecutionLog,
        cycle: u64,
    ) -> Self {
        Self {
            specification,
            value: ResultValue::Computed(value),
            execution_log,
            cycle,
        }
    }

    pub fn failed(
        specification: ValueSpecification,
        failure: FailureDetail,
        execution_log: AggregatedExecutionLog,
        cycle: u64,
    ) -> Self {
        Self {
            specification,
            value: ResultValue::Failed(failure),
            execution_log,
            cycle,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.value, ResultValue::Failed(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.value {
            ResultValue::Computed(value) => Some(value),
            ResultValue::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureDetail> {
        match &self.value {
            ResultValue::Computed(_) => None,
            ResultValue::Failed(detail) => Some(detail),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value().and_then(Value::as_f64)
    }
}
