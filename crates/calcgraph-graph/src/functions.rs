use async_trait::async_trait;
use calcgraph_core::{
    ComputationTarget, ObjectId, Value, ValueProperties, ValueRequirement, ValueSpecification,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{CalculationFunction, FunctionError, FunctionInputs, FunctionRequirements};

/// Property naming the function that produced a value.
pub const FUNCTION_PROPERTY: &str = "Function";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Sum,
    Difference,
    Product,
    Quotient,
    Mean,
    Min,
    Max,
}

impl Operation {
    pub fn apply(self, values: &[f64]) -> Result<f64, FunctionError> {
        let (first, rest) = values
            .split_first()
            .ok_or_else(|| FunctionError::Failed(format!("{self:?} of no inputs")))?;
        let result = match self {
            Operation::Sum => values.iter().sum(),
            Operation::Difference => first - rest.iter().sum::<f64>(),
            Operation::Product => values.iter().product(),
            Operation::Quotient => {
                let divisor: f64 = rest.iter().product();
                if divisor == 0.0 {
                    return Err(FunctionError::Failed("division by zero".to_string()));
                }
                first / divisor
            }
            Operation::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Operation::Min => values.iter().copied().fold(*first, f64::min),
            Operation::Max => values.iter().copied().fold(*first, f64::max),
        };
        Ok(result)
    }
}

/// `output = operation(inputs...)`, all on the same target.
#[derive(Debug, Clone)]
pub struct FormulaFunction {
    name: String,
    output: String,
    operation: Operation,
    inputs: Vec<String>,
    entities: BTreeSet<ObjectId>,
}

impl FormulaFunction {
    pub fn new(
        name: impl Into<String>,
        output: impl Into<String>,
        operation: Operation,
        inputs: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            output: output.into(),
            operation,
            inputs: inputs.into_iter().map(Into::into).collect(),
            entities: BTreeSet::new(),
        }
    }

    /// Reference data the formula resolves against (e.g. a convention).
    pub fn with_entities(mut self, entities: impl IntoIterator<Item = ObjectId>) -> Self {
        self.entities.extend(entities);
        self
    }
}

#[async_trait]
impl CalculationFunction for FormulaFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn results(&self, target: &ComputationTarget) -> Vec<ValueSpecification> {
        vec![ValueSpecification::new(
            self.output.clone(),
            target.clone(),
            ValueProperties::new().with(FUNCTION_PROPERTY, self.name.clone()),
        )]
    }

    fn requirements(
        &self,
        output: &ValueSpecification,
        _desired: &ValueRequirement,
    ) -> Option<FunctionRequirements> {
        let inputs = self
            .inputs
            .iter()
            .map(|name| ValueRequirement::new(name.clone(), output.target.clone()))
            .collect();
        Some(FunctionRequirements::new(inputs).with_entities(self.entities.iter().cloned()))
    }

    async fn execute(
        &self,
        target: &ComputationTarget,
        inputs: &FunctionInputs,
        _output: &ValueSpecification,
    ) -> Result<Value, FunctionError> {
        let mut values = Vec::with_capacity(self.inputs.len());
        for name in &self.inputs {
            let value = inputs
                .named(name, target)
                .ok_or_else(|| FunctionError::MissingInput(format!("{name}@{target}")))?;
            let number = value
                .as_f64()
                .ok_or_else(|| FunctionError::Failed(format!("{name} is not numeric")))?;
            values.push(number);
        }
        self.operation.apply(&values).map(Value::Double)
    }
}
