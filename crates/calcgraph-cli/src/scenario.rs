use anyhow::{Context, Result};
use calcgraph_core::{ComputationTarget, ObjectId, ValueRequirement};
use calcgraph_engine::MarketDataTick;
use calcgraph_graph::{
    CalculationConfiguration, FormulaFunction, FunctionRepository,
    InMemoryMarketDataAvailability, Operation, ViewDefinition,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// A view, the functions and market data it runs against, and the signals
/// to feed it cycle by cycle.
#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default, rename = "market_data")]
    pub market_data: Vec<MarketDataSpec>,
    #[serde(default, rename = "function")]
    pub functions: Vec<FunctionSpec>,
    #[serde(default, rename = "configuration")]
    pub configurations: Vec<ConfigurationSpec>,
    #[serde(default, rename = "cycle")]
    pub cycles: Vec<CycleSpec>,
}

#[derive(Debug, Deserialize)]
pub struct MarketDataSpec {
    pub value: String,
    #[serde(default)]
    pub entities: Vec<ObjectId>,
}

#[derive(Debug, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub output: String,
    pub operation: Operation,
    pub inputs: Vec<String>,
    #[serde(default)]
    pub entities: Vec<ObjectId>,
}

#[derive(Debug, Deserialize)]
pub struct ConfigurationSpec {
    pub name: String,
    #[serde(default, rename = "requirement")]
    pub requirements: Vec<RequirementSpec>,
}

#[derive(Debug, Deserialize)]
pub struct RequirementSpec {
    pub value: String,
    pub target: ComputationTarget,
}

#[derive(Debug, Default, Deserialize)]
pub struct CycleSpec {
    #[serde(default, rename = "tick")]
    pub ticks: Vec<TickSpec>,
    /// Entities reported as updated before the cycle runs.
    #[serde(default, rename = "change")]
    pub changes: Vec<ObjectId>,
}

#[derive(Debug, Deserialize)]
pub struct TickSpec {
    pub target: ComputationTarget,
    pub value: String,
    pub amount: f64,
}

impl TickSpec {
    pub fn to_tick(&self) -> MarketDataTick {
        MarketDataTick::new(self.target.clone(), self.value.clone(), self.amount)
    }
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid scenario {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn function_repository(&self) -> FunctionRepository {
        let repository = FunctionRepository::new();
        for spec in &self.functions {
            let function = FormulaFunction::new(
                spec.name.clone(),
                spec.output.clone(),
                spec.operation,
                spec.inputs.iter().cloned(),
            )
            .with_entities(spec.entities.iter().cloned());
            repository.register(Arc::new(function));
        }
        repository
    }

    pub fn market_data_availability(&self) -> InMemoryMarketDataAvailability {
        let availability = InMemoryMarketDataAvailability::new();
        for spec in &self.market_data {
            availability.add(spec.value.clone(), spec.entities.iter().cloned());
        }
        availability
    }

    pub fn view_definition(&self) -> ViewDefinition {
        self.configurations
            .iter()
            .fold(ViewDefinition::new(self.name.clone()), |view, spec| {
                let configuration = spec.requirements.iter().fold(
                    CalculationConfiguration::new(spec.name.clone()),
                    |configuration, requirement| {
                        configuration.with_requirement(ValueRequirement::new(
                            requirement.value.clone(),
                            requirement.target.clone(),
                        ))
                    },
                );
                view.with_configuration(configuration)
            })
    }
}
