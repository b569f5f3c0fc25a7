use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalcGraphError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Invalid version window: {0}")]
    InvalidVersionWindow(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Listener error: {0}")]
    Listener(String),

    #[error("View process terminated: {0}")]
    Terminated(String),
}

/// Fatal problems with a calculation configuration. These are reported to
/// whoever asked for the configuration and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("unresolved requirement {requirement} in configuration {configuration}")]
    UnresolvedRequirement {
        configuration: String,
        requirement: String,
    },

    #[error("cyclic dependency in configuration {configuration}: {}", .path.join(" -> "))]
    CyclicDependency {
        configuration: String,
        path: Vec<String>,
    },

    #[error("duplicate calculation configuration: {0}")]
    DuplicateConfiguration(String),

    #[error("unknown calculation configuration: {0}")]
    UnknownConfiguration(String),

    #[error("invalid calculation configuration {configuration}: {reason}")]
    Invalid {
        configuration: String,
        reason: String,
    },
}

impl ConfigurationError {
    pub fn configuration(&self) -> &str {
        match self {
            ConfigurationError::UnresolvedRequirement { configuration, .. }
            | ConfigurationError::CyclicDependency { configuration, .. }
            | ConfigurationError::Invalid { configuration, .. } => configuration,
            ConfigurationError::DuplicateConfiguration(name)
            | ConfigurationError::UnknownConfiguration(name) => name,
        }
    }
}

pub type Result<T> = std::result::Result<T, CalcGraphError>;
