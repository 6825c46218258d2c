//! Command-line interface for `mlpipe`, built on clap.
//!
//! [`Cli`] holds the subcommands ([`Command`]) and the global flags
//! (--config, --max-retries, --workers, --verbose, --json-logs).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use mlpipe::config::PipelineConfig;
use mlpipe::lineage::{MacroField, MacroSettings};
use mlpipe::workflow::{DEFAULT_ROWS, WorkflowRequest};

/// mlpipe: run ML pipeline workflows and inspect artifact lineage.
#[derive(Debug, Parser)]
#[command(name = "mlpipe", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "pipeline.toml")]
    pub config: PathBuf,

    /// Maximum retries of a transient failure.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Number of queue workers.
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Emit logs as newline-delimited JSON.
    #[arg(long, global = true, default_value_t = false)]
    pub json_logs: bool,
}

impl Cli {
    /// Flags take precedence over the file and the environment.
    pub fn apply_overrides(&self, config: &mut PipelineConfig) {
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the storage directories and the lineage schema.
    Init,

    /// Generate a synthetic dataset.
    Generate(GenerateArgs),

    /// Train a model on an existing dataset.
    Train {
        /// Dataset name, e.g. dataset_1a2b3c4d.
        dataset: String,
    },

    /// Score a model against a dataset.
    Evaluate { model: String, dataset: String },

    /// Derive a pruned model from a model and a dataset.
    Prune { model: String, dataset: String },

    /// Print the provenance chain of a dataset, model or pruned model.
    Lineage { name: String },
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Number of rows to generate.
    #[arg(long, default_value_t = DEFAULT_ROWS)]
    pub rows: u64,

    /// Override the fetched debt ratio.
    #[arg(long)]
    pub debt_ratio: Option<f64>,

    /// Override the fetched delinquency rate.
    #[arg(long)]
    pub delinquency: Option<f64>,

    /// Override the fetched interest rate.
    #[arg(long)]
    pub interest_rate: Option<f64>,
}

impl GenerateArgs {
    fn macro_overrides(&self) -> MacroSettings {
        [
            (MacroField::DebtRatio, self.debt_ratio),
            (MacroField::Delinquency, self.delinquency),
            (MacroField::InterestRate, self.interest_rate),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.map(|v| (field, v)))
        .collect()
    }
}

impl Command {
    /// The workflow this command submits, if it submits one.
    pub fn workflow_request(&self) -> Option<WorkflowRequest> {
        match self {
            Command::Generate(args) => Some(WorkflowRequest::Generate {
                rows: args.rows,
                macro_overrides: args.macro_overrides(),
            }),
            Command::Train { dataset } => Some(WorkflowRequest::Train {
                dataset_name: dataset.clone(),
            }),
            Command::Evaluate { model, dataset } => Some(WorkflowRequest::Evaluate {
                model_name: model.clone(),
                dataset_name: dataset.clone(),
            }),
            Command::Prune { model, dataset } => Some(WorkflowRequest::Prune {
                model_name: model.clone(),
                dataset_name: dataset.clone(),
            }),
            Command::Init | Command::Lineage { .. } => None,
        }
    }
}
