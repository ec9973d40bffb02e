//! churn-pipeline: run the configured label and feature steps of one
//! experiment against its parquet store.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use churn_features::{logging, ExperimentConfig, Pipeline, Step};
use clap::Parser;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "churn-pipeline")]
#[command(about = "Churn label generation and temporal feature compilation")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "CHURN_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Experiment section to run
    #[arg(short, long, env = "CHURN_EXPERIMENT")]
    experiment: String,

    /// Stop after this step: load_raws, labels, features, delete_raws
    #[arg(long)]
    until: Option<Step>,
}

fn run(cli: Cli) -> Result<()> {
    let config = ExperimentConfig::load(&cli.config, &cli.experiment)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let log_file = logging::init(Some(&config.logs_dir()?))?;
    if let Some(path) = log_file {
        info!(path = %path.display(), "logging to file");
    }
    info!(experiment = %cli.experiment, study = ?config.study_name, "starting");

    let mut pipeline = Pipeline::from_config(config)?;
    let report = pipeline.run(cli.until)?;
    info!(
        run_id = %report.run_id,
        steps = report.completed.len(),
        stages = report.outcomes.len(),
        "done"
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
