use calcgraph_core::{ConfigurationError, ValueRequirement};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A named set of output requirements; one dependency graph is built per
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationConfiguration {
    pub name: String,
    #[serde(default)]
    pub requirements: Vec<ValueRequirement>,
}

impl CalculationConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requirements: Vec::new(),
        }
    }

    pub fn with_requirement(mut self, requirement: ValueRequirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::Invalid {
                configuration: self.name.clone(),
                reason: "configuration name is empty".to_string(),
            });
        }
        Ok(())
    }
}

/// What a view process computes: its calculation configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub name: String,
    #[serde(default)]
    pub configurations: Vec<CalculationConfiguration>,
}

impl ViewDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            configurations: Vec::new(),
        }
    }

    pub fn with_configuration(mut self, configuration: CalculationConfiguration) -> Self {
        self.configurations.push(configuration);
        self
    }

    pub fn configuration(&self, name: &str) -> Option<&CalculationConfiguration> {
        self.configurations.iter().find(|c| c.name == name)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let mut seen = HashSet::new();
        for configuration in &self.configurations {
            configuration.validate()?;
            if !seen.insert(configuration.name.as_str()) {
                return Err(ConfigurationError::DuplicateConfiguration(
                    configuration.name.clone(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_configuration_names_are_rejected() {
        let view = ViewDefinition::new("view")
            .with_configuration(CalculationConfiguration::new("Default"))
            .with_configuration(CalculationConfiguration::new("Default"));
        assert_eq!(
            view.validate(),
            Err(ConfigurationError::DuplicateConfiguration("Default".to_string()))
        );
    }

    #[test]
    fn blank_names_are_invalid() {
        assert!(CalculationConfiguration::new("  ").validate().is_err());
        assert!(ViewDefinition::new("view")
            .with_configuration(CalculationConfiguration::new("Default"))
            .validate()
            .is_ok());
    }
}
