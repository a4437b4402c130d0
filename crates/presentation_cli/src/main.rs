//! chaosctl
//!
//! Command-line front end for loading experiment catalogs and running
//! chaos experiments against the simulated probes.

#![allow(clippy::print_stdout)]

mod params;
mod wiring;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use domain::{ExperimentConfig, ExperimentStatus, FaultType};
use infrastructure::{AppConfig, ExperimentCatalog, init_telemetry};
use serde::Serialize;
use tracing::{info, warn};

/// Chaos experiment runner
#[derive(Parser)]
#[command(name = "chaosctl")]
#[command(author, version, about = "Chaos experiment orchestrator", long_about = None)]
struct Cli {
    /// Verbosity level, overrides the configured log filter
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Settings file (default: ./chaos.toml if present)
    #[arg(short, long, env = "CHAOS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List experiments in the catalog
    List {
        /// Catalog file (default: catalog_path from settings)
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Validate a catalog file without running anything
    Validate {
        /// Catalog file
        file: PathBuf,
    },

    /// List built-in fault types
    Faults,

    /// Run one experiment to completion and print its result
    ///
    /// Ctrl-C requests cancellation; the run still cleans up and reports.
    /// Example: chaosctl run db-outage --param timeout_ms=500
    Run {
        /// Experiment name
        name: String,

        /// Catalog file (default: catalog_path from settings)
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Parameter override, repeatable
        #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = params::parse_param)]
        params: Vec<(String, serde_json::Value)>,
    },
}

/// One line of `list` output
#[derive(Debug, Serialize)]
struct DefinitionSummary<'a> {
    name: &'a str,
    fault_type: &'a FaultType,
    hypothesis: &'a str,
    total_secs: u64,
}

impl<'a> From<&'a ExperimentConfig> for DefinitionSummary<'a> {
    fn from(config: &'a ExperimentConfig) -> Self {
        let total = config.steady_state_duration
            + config.injection_duration
            + config.observation_duration;
        Self {
            name: &config.name,
            fault_type: &config.fault_type,
            hypothesis: &config.hypothesis,
            total_secs: total.as_secs(),
        }
    }
}

/// Determine log filter level from verbosity count
const fn log_filter_from_verbosity(verbose: u8) -> Option<&'static str> {
    match verbose {
        0 => None,
        1 => Some("info"),
        2 => Some("debug"),
        _ => Some("trace"),
    }
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_file(path),
        None => AppConfig::load(),
    };
    config.context("failed to load settings")
}

fn catalog_path(explicit: Option<PathBuf>, settings: &AppConfig) -> anyhow::Result<PathBuf> {
    explicit
        .or_else(|| settings.catalog_path.clone())
        .context("no catalog given: pass --catalog or set catalog_path")
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_experiment(
    settings: &AppConfig,
    catalog: &Path,
    name: &str,
    params: Vec<(String, serde_json::Value)>,
) -> anyhow::Result<ExitCode> {
    let experiments = ExperimentCatalog::load(catalog)?.into_experiments();
    let runtime = wiring::build(settings)?;
    runtime.orchestrator.load(experiments)?;

    let run_id = runtime.orchestrator.start(name, &params::overrides(params))?;
    info!(run_id = %run_id, "Experiment started");

    let result = tokio::select! {
        result = runtime.orchestrator.wait(&run_id) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!(run_id = %run_id, "Interrupted, cancelling run");
            runtime.orchestrator.stop(&run_id);
            runtime.orchestrator.wait(&run_id).await
        },
    };
    runtime.shutdown().await;

    let result = result.context("run disappeared before completing")?;
    print_json(&result)?;
    Ok(match result.status {
        ExperimentStatus::Completed => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let settings = load_settings(cli.config.as_deref())?;
    let mut telemetry = settings.telemetry.clone();
    if let Some(filter) = log_filter_from_verbosity(cli.verbose) {
        telemetry.log_filter = filter.to_string();
    }
    init_telemetry(&telemetry)?;

    match cli.command {
        Commands::List { catalog } => {
            let path = catalog_path(catalog, &settings)?;
            let catalog = ExperimentCatalog::load(&path)?;
            let summaries: Vec<DefinitionSummary<'_>> =
                catalog.experiments().iter().map(DefinitionSummary::from).collect();
            print_json(&summaries)?;
        },

        Commands::Validate { file } => {
            let catalog = ExperimentCatalog::load(&file)?;
            println!("{}: {} experiment(s) valid", file.display(), catalog.len());
        },

        Commands::Faults => {
            let names: Vec<String> = FaultType::COMPOSABLE
                .iter()
                .chain(std::iter::once(&FaultType::Random))
                .map(|fault| fault.name().to_string())
                .collect();
            print_json(&names)?;
        },

        Commands::Run {
            name,
            catalog,
            params,
        } => {
            let path = catalog_path(catalog, &settings)?;
            return run_experiment(&settings, &path, &name, params).await;
        },
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(args)
    }

    #[test]
    fn parses_run_with_params() {
        let cli = parse(&[
            "chaosctl", "run", "db-outage", "--catalog", "experiments.toml", "-p", "timeout_ms=500",
            "--param", "message=down",
        ])
        .unwrap();
        let Commands::Run {
            name,
            catalog,
            params,
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(name, "db-outage");
        assert_eq!(catalog, Some(PathBuf::from("experiments.toml")));
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].1, serde_json::json!(500));
    }

    #[test]
    fn rejects_malformed_param() {
        assert!(parse(&["chaosctl", "run", "x", "--param", "nope"]).is_err());
    }

    #[test]
    fn validate_requires_file() {
        assert!(parse(&["chaosctl", "validate"]).is_err());
        assert!(parse(&["chaosctl", "validate", "experiments.toml"]).is_ok());
    }

    #[test]
    fn verbosity_overrides_filter() {
        assert_eq!(log_filter_from_verbosity(0), None);
        assert_eq!(log_filter_from_verbosity(1), Some("info"));
        assert_eq!(log_filter_from_verbosity(2), Some("debug"));
        assert_eq!(log_filter_from_verbosity(7), Some("trace"));
    }

    #[test]
    fn catalog_falls_back_to_settings() {
        let settings = AppConfig {
            catalog_path: Some(PathBuf::from("from-settings.toml")),
            ..AppConfig::default()
        };
        assert_eq!(
            catalog_path(None, &settings).unwrap(),
            PathBuf::from("from-settings.toml")
        );
        assert_eq!(
            catalog_path(Some(PathBuf::from("cli.toml")), &settings).unwrap(),
            PathBuf::from("cli.toml")
        );
        assert!(catalog_path(None, &AppConfig::default()).is_err());
    }

    #[test]
    fn summary_totals_phase_durations() {
        let config = ExperimentConfig::new("x", FaultType::Timeout, "h").with_durations(
            Duration::from_secs(10),
            Duration::from_secs(20),
            Duration::from_secs(5),
        );
        assert_eq!(DefinitionSummary::from(&config).total_secs, 35);
    }

    #[tokio::test(start_paused = true)]
    async fn runs_catalog_experiment_to_completion() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"
[[experiments]]
name = "cache-miss"
fault_type = "cache_error"
hypothesis = "Reads fall through to the database"
steady_state_secs = 2
injection_secs = 3
observation_secs = 2

[experiments.safety]
rollback_threshold = 0.5
"#,
        )
        .unwrap();

        let settings = AppConfig {
            simulation: infrastructure::SimulationConfig::default().without_jitter(),
            ..AppConfig::default()
        };
        let code = run_experiment(&settings, file.path(), "cache-miss", Vec::new())
            .await
            .unwrap();
        assert_eq!(code, ExitCode::SUCCESS);
    }
}
