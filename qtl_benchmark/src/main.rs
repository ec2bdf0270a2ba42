use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::PipelineConfig;
use crate::helper_functions::project_root;
use crate::models::DatasetKind;
use crate::pipeline::{run_all, run_evaluate, run_plots, run_predict, run_prepare, RunOptions};

mod allele_resolver;
mod api_handler;
mod config;
mod data_handling;
mod error;
mod evaluation;
mod helper_functions;
mod identifiers;
mod modality;
mod models;
mod pipeline;
mod plots;
mod reconciler;
mod record_builder;
mod scoring;

#[derive(Debug, Parser)]
#[command(
    name = "qtl_benchmark",
    about = "Benchmark AlphaGenome variant scores against measured QTL effects"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build canonical variant records from the raw QTL releases
    Prepare(StageArgs),
    /// Score prepared variants with AlphaGenome (needs ALPHA_GENOME_KEY)
    Predict(StageArgs),
    /// Correlate predictions with QTL effect sizes
    Evaluate(StageArgs),
    /// Render the benchmark figures
    Plot(StageArgs),
    /// Run prepare, predict, evaluate and plot in order
    All(StageArgs),
}

#[derive(Debug, Args)]
struct StageArgs {
    /// Datasets to process
    #[arg(long, value_enum, num_args = 1.., default_values_t = [DatasetKind::CaQtls])]
    datasets: Vec<DatasetKind>,

    /// Only process the first N rows of each dataset
    #[arg(long)]
    limit: Option<usize>,

    /// Recompute outputs that already exist
    #[arg(long)]
    force: bool,
}

impl StageArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            limit: self.limit,
            force: self.force,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load(&project_root())?;
    info!("Project root: {}", config.project_root.display());

    let (stage, args) = match &cli.command {
        Command::Prepare(args) => (run_prepare as StageFn, args),
        Command::Predict(args) => (run_predict as StageFn, args),
        Command::Evaluate(args) => (run_evaluate as StageFn, args),
        Command::Plot(args) => (run_plots as StageFn, args),
        Command::All(args) => (run_all as StageFn, args),
    };

    if let Some(limit) = args.limit {
        info!("Row limit: {}", limit);
    }
    match stage(&config, &args.datasets, &args.options()) {
        Ok(()) => {
            info!("Done");
            Ok(())
        }
        Err(e) => {
            error!("{:#}", e);
            Err(e)
        }
    }
}

type StageFn = fn(&PipelineConfig, &[DatasetKind], &RunOptions) -> Result<()>;
