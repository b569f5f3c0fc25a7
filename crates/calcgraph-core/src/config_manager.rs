use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration for the calculation engine
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Scheduling, batching and retry settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Execution statistics settings
    #[serde(default)]
    pub statistics: StatisticsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of jobs executing at once per view process
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Job size used until statistics are available
    #[serde(default = "default_job_size")]
    pub default_job_size: usize,

    #[serde(default = "default_min_job_size")]
    pub min_job_size: usize,

    #[serde(default = "default_max_job_size")]
    pub max_job_size: usize,

    /// Cost a single job should take to execute
    #[serde(default = "default_target_job_cost_ms")]
    pub target_job_cost_ms: u64,

    /// Fraction of the error corrected per cycle by the job sizer, in (0, 1]
    #[serde(default = "default_controller_gain")]
    pub controller_gain: f64,

    /// Retries of transient failures before a node is marked failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff between retries, doubled on each attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Per-attempt limit on a single calculation
    #[serde(default = "default_node_timeout_ms")]
    pub node_timeout_ms: u64,
}

impl SchedulerConfig {
    pub fn target_job_cost(&self) -> Duration {
        Duration::from_millis(self.target_job_cost_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            default_job_size: default_job_size(),
            min_job_size: default_min_job_size(),
            max_job_size: default_max_job_size(),
            target_job_cost_ms: default_target_job_cost_ms(),
            controller_gain: default_controller_gain(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            node_timeout_ms: default_node_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsConfig {
    /// Record statistics; when disabled a discarding gatherer is installed
    #[serde(default = "default_statistics_enabled")]
    pub enabled: bool,

    /// Samples kept by rolling means
    #[serde(default = "default_statistics_window")]
    pub window: usize,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            enabled: default_statistics_enabled(),
            window: default_statistics_window(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "json", "compact"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_worker_threads() -> usize {
    num_cpus::get()
}
fn default_job_size() -> usize {
    16
}
fn default_min_job_size() -> usize {
    1
}
fn default_max_job_size() -> usize {
    256
}
fn default_target_job_cost_ms() -> u64 {
    5
}
fn default_controller_gain() -> f64 {
    0.5
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    10
}
fn default_node_timeout_ms() -> u64 {
    30_000
}
fn default_statistics_enabled() -> bool {
    true
}
fn default_statistics_window() -> usize {
    100
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

/// Loads [`EngineConfig`] from file and environment.
pub struct ConfigManager {
    config: EngineConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (`CALCGRAPH_*`, `.env` file)
    /// 2. Config file (`./.calcgraph.toml`, then `~/.calcgraph/config.toml`)
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        info!("Loading CalcGraph configuration");

        Self::load_dotenv();

        let (config, config_path) = Self::load_config_file()?;
        let config = Self::apply_env_overrides(config);
        Self::validate_config(&config)?;

        match config_path {
            Some(ref path) => info!("Config file: {}", path.display()),
            None => info!("Config file: NONE (using defaults)"),
        }
        info!(
            "Scheduler: {} workers, job size {}..{} (default {})",
            config.scheduler.worker_threads,
            config.scheduler.min_job_size,
            config.scheduler.max_job_size,
            config.scheduler.default_job_size
        );

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Load an explicit file; environment overrides still apply.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let config = Self::apply_env_overrides(Self::read_toml_file(path)?);
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: Some(path.to_path_buf()),
        })
    }

    fn load_dotenv() {
        if Path::new(".env").exists() {
            if let Err(e) = dotenv::from_filename(".env") {
                warn!("Failed to load .env file: {}", e);
            }
        }
    }

    fn load_config_file() -> Result<(EngineConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(".calcgraph.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".calcgraph").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((EngineConfig::default(), None))
    }

    fn read_toml_file(path: &Path) -> Result<EngineConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn apply_env_overrides(mut config: EngineConfig) -> EngineConfig {
        fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.parse().ok())
        }

        if let Some(workers) = parsed("CALCGRAPH_WORKER_THREADS") {
            config.scheduler.worker_threads = workers;
        }
        if let Some(size) = parsed("CALCGRAPH_DEFAULT_JOB_SIZE") {
            config.scheduler.default_job_size = size;
        }
        if let Some(cost) = parsed("CALCGRAPH_TARGET_JOB_COST_MS") {
            config.scheduler.target_job_cost_ms = cost;
        }
        if let Some(retries) = parsed("CALCGRAPH_MAX_RETRIES") {
            config.scheduler.max_retries = retries;
        }
        if let Some(timeout) = parsed("CALCGRAPH_NODE_TIMEOUT_MS") {
            config.scheduler.node_timeout_ms = timeout;
        }
        if let Ok(enabled) = std::env::var("CALCGRAPH_STATISTICS_ENABLED") {
            config.statistics.enabled = enabled.to_lowercase() == "true" || enabled == "1";
        }
        if let Ok(level) = std::env::var("CALCGRAPH_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("CALCGRAPH_LOG_FORMAT") {
            config.logging.format = format;
        }

        config
    }

    pub fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
        let scheduler = &config.scheduler;
        if scheduler.worker_threads == 0 {
            return Err(ConfigError::ValidationError(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if scheduler.min_job_size == 0 || scheduler.min_job_size > scheduler.max_job_size {
            return Err(ConfigError::ValidationError(format!(
                "Invalid job size bounds: min {} max {}",
                scheduler.min_job_size, scheduler.max_job_size
            )));
        }
        if !(scheduler.min_job_size..=scheduler.max_job_size).contains(&scheduler.default_job_size) {
            return Err(ConfigError::ValidationError(format!(
                "default_job_size {} outside {}..={}",
                scheduler.default_job_size, scheduler.min_job_size, scheduler.max_job_size
            )));
        }
        if !(scheduler.controller_gain > 0.0 && scheduler.controller_gain <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "controller_gain must be in (0, 1], got {}",
                scheduler.controller_gain
            )));
        }
        if scheduler.node_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "node_timeout_ms must be positive".to_string(),
            ));
        }

        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    other
                )))
            }
        }
        match config.logging.format.as_str() {
            "pretty" | "json" | "compact" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, json, compact",
                    other
                )))
            }
        }

        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Write the default configuration to `path`, creating parent directories.
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = EngineConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}
