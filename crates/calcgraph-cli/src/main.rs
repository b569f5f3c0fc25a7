mod scenario;

use anyhow::{Context, Result};
use calcgraph_core::{
    BasicChangeManager, ChangeEvent, ChangeManager, ChangeType, ConfigManager, EngineConfig,
    LoggingConfig, ResultModel, ResultValue, Value,
};
use calcgraph_engine::{
    CycleSummary, EngineContext, ExecutionFlags, ExecutionOptions, ViewProcessor,
};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use scenario::Scenario;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "calcgraph")]
#[command(about = "CalcGraph CLI - incremental calculation engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (json, pretty)
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Configuration file; defaults to ./.calcgraph.toml then ~/.calcgraph/config.toml
    #[arg(long, global = true, env = "CALCGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file, one cycle per [[cycle]] entry
    Run {
        /// Scenario TOML file
        scenario: PathBuf,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write the default configuration
    Init {
        #[arg(long, default_value = ".calcgraph.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    Show,
}

// Output structures
#[derive(Serialize)]
struct RunResult {
    scenario: String,
    view_process: String,
    configuration_errors: Vec<String>,
    cycles: Vec<CycleReport>,
    statistics: serde_json::Value,
}

#[derive(Serialize)]
struct CycleReport {
    cycle: u64,
    full_recompute: bool,
    duration_ms: f64,
    configurations: Vec<ConfigurationReport>,
}

#[derive(Serialize)]
struct ConfigurationReport {
    name: String,
    jobs: usize,
    executed: Vec<String>,
    failed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    values: BTreeMap<String, serde_json::Value>,
}

impl CycleReport {
    fn new(summary: CycleSummary, results: &ResultModel) -> Self {
        let configurations = summary
            .configurations
            .into_iter()
            .map(|configuration| {
                let values = results
                    .all_values(&configuration.configuration)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|result| {
                        let key = format!(
                            "{}@{}",
                            result.specification.value_name, result.specification.target
                        );
                        (key, render_value(&result.value))
                    })
                    .collect();
                ConfigurationReport {
                    name: configuration.configuration,
                    jobs: configuration.jobs,
                    executed: configuration
                        .executed
                        .iter()
                        .map(|s| s.value_name.clone())
                        .collect(),
                    failed: configuration
                        .failed
                        .iter()
                        .map(|s| s.value_name.clone())
                        .collect(),
                    error: configuration.error,
                    values,
                }
            })
            .collect();

        Self {
            cycle: summary.cycle,
            full_recompute: summary.full_recompute,
            duration_ms: summary.duration.as_secs_f64() * 1000.0,
            configurations,
        }
    }
}

fn render_value(value: &ResultValue) -> serde_json::Value {
    match value {
        ResultValue::Computed(Value::Double(number)) => serde_json::json!(number),
        ResultValue::Computed(Value::Vector(numbers)) => serde_json::json!(numbers),
        ResultValue::Computed(Value::Text(text)) => serde_json::json!(text),
        ResultValue::Failed(detail) => serde_json::json!(detail.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // `config init` must work even when the existing file is broken.
    let manager = match &cli.command {
        Commands::Config(ConfigCommands::Init { .. }) => None,
        _ => Some(load_config(cli.config.as_deref())?),
    };
    let logging = manager
        .as_ref()
        .map(|m| m.config().logging.clone())
        .unwrap_or_default();
    init_tracing(&logging, cli.verbose);

    match execute_command(&cli, manager.as_ref()).await {
        Ok(output) => {
            print_output(&cli.output, &output)?;
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ConfigManager> {
    match path {
        Some(path) => ConfigManager::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => ConfigManager::load().context("Failed to load configuration"),
    }
}

/// Logs go to stderr so `--output json` stays machine readable.
fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format.as_str() {
        "json" => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        "compact" => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init(),
        _ => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn execute_command(
    cli: &Cli,
    manager: Option<&ConfigManager>,
) -> Result<serde_json::Value> {
    match (&cli.command, manager) {
        (Commands::Run { scenario }, Some(manager)) => {
            execute_run_command(scenario, manager.config()).await
        }
        (Commands::Config(ConfigCommands::Init { path, force }), _) => {
            execute_config_init(path, *force)
        }
        (Commands::Config(ConfigCommands::Show), Some(manager)) => {
            Ok(serde_json::json!({
                "config_path": manager
                    .config_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "defaults".to_string()),
                "config": serde_json::to_value(manager.config())?,
            }))
        }
        (_, None) => anyhow::bail!("configuration was not loaded"),
    }
}

fn execute_config_init(path: &Path, force: bool) -> Result<serde_json::Value> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    ConfigManager::create_default_config(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(serde_json::json!({
        "path": path.display().to_string(),
        "status": "created",
    }))
}

async fn execute_run_command(path: &Path, config: &EngineConfig) -> Result<serde_json::Value> {
    let scenario = Scenario::load(path)?;
    let context = EngineContext::from_config(
        config,
        Arc::new(scenario.function_repository()),
        Arc::new(scenario.market_data_availability()),
    );
    let processor = ViewProcessor::new(context);
    let options = ExecutionOptions::infinite().with_flags(ExecutionFlags::manual());
    let process = processor
        .create_view_process(scenario.view_definition(), options)
        .context("Failed to start view process")?;

    let change_manager = BasicChangeManager::new();
    change_manager.add_change_listener(process.change_listener());
    let mut cycles = process.subscribe_cycles();
    let mut reports = Vec::with_capacity(scenario.cycles.len());

    for step in &scenario.cycles {
        process.tick(step.ticks.iter().map(|t| t.to_tick()).collect())?;
        for object_id in &step.changes {
            change_manager
                .entity_changed(ChangeEvent::unbounded(ChangeType::Updated, object_id.clone()))
                .with_context(|| format!("Failed to publish change to {object_id}"))?;
        }
        process.trigger_cycle()?;

        let summary = cycles
            .recv()
            .await
            .context("View process stopped before completing a cycle")?;
        info!("Cycle {} complete", summary.cycle);
        reports.push(CycleReport::new(summary, &process.results()));
    }

    let statistics = serde_json::to_value(process.statistics().snapshot())?;
    let result = RunResult {
        scenario: scenario.name.clone(),
        view_process: process.id().to_string(),
        configuration_errors: process
            .configuration_errors()
            .iter()
            .map(ToString::to_string)
            .collect(),
        cycles: reports,
        statistics,
    };
    processor.shutdown().await;

    Ok(serde_json::to_value(result)?)
}

fn print_output(format: &OutputFormat, value: &serde_json::Value) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Pretty => {
            print_pretty(value, 0);
        }
    }
    Ok(())
}

fn print_pretty(value: &serde_json::Value, depth: usize) {
    let indent = "  ".repeat(depth);
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                let key_colored = key.cyan().bold();
                match val {
                    serde_json::Value::Object(_) => {
                        println!("{indent}{key_colored}:");
                        print_pretty(val, depth + 1);
                    }
                    serde_json::Value::Array(items) if items.iter().any(is_compound) => {
                        println!("{indent}{key_colored}:");
                        print_pretty(val, depth + 1);
                    }
                    _ => println!("{indent}{key_colored}: {}", scalar(val)),
                }
            }
        }
        serde_json::Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                println!("{indent}{}{}:", "Item ".cyan(), (i + 1).to_string().yellow());
                print_pretty(item, depth + 1);
            }
        }
        other => println!("{indent}{}", scalar(other)),
    }
}

fn is_compound(value: &serde_json::Value) -> bool {
    matches!(
        value,
        serde_json::Value::Object(_) | serde_json::Value::Array(_)
    )
}

fn scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.green().to_string(),
        serde_json::Value::Number(n) => n.to_string().yellow().to_string(),
        serde_json::Value::Bool(true) => "true".green().to_string(),
        serde_json::Value::Bool(false) => "false".red().to_string(),
        serde_json::Value::Null => "-".dimmed().to_string(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(scalar)
            .collect::<Vec<_>>()
            .join(", "),
        serde_json::Value::Object(_) => value.to_string(),
    }
}
