mod cli;
mod ui;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;

use cli::{Cli, Command};
use mlpipe::app::Pipeline;
use mlpipe::config::PipelineConfig;
use mlpipe::error::LineageError;
use mlpipe::lineage::{LineageRepository, SqliteLineage};
use mlpipe::telemetry::init_tracing;
use mlpipe::workflow::WorkflowRequest;
use ui::TaskProgress;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json_logs, level);

    let mut config = PipelineConfig::load_from(&cli.config)?;
    cli.apply_overrides(&mut config);

    match &cli.command {
        Command::Init => init(&config),
        Command::Lineage { name } => show_lineage(&config, name),
        workflow => match workflow.workflow_request() {
            Some(request) => run_workflow(&config, request).await,
            None => Ok(ExitCode::SUCCESS),
        },
    }
}

fn init(config: &PipelineConfig) -> Result<ExitCode> {
    let pipeline = Pipeline::start(config).context("failed to initialise pipeline")?;
    let counts = pipeline.lineage.counts()?;
    println!(
        "Initialised storage at {} and lineage at {}",
        config.storage_dir.display(),
        config.database_path.display()
    );
    ui::print_json("Lineage", &counts, true);
    Ok(ExitCode::SUCCESS)
}

fn show_lineage(config: &PipelineConfig, name: &str) -> Result<ExitCode> {
    let lineage = SqliteLineage::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    match lineage.provenance(name) {
        Ok(provenance) => {
            ui::print_json("Provenance", &provenance, true);
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ LineageError::NotFound { .. }) => {
            ui::print_rejection(&e.to_string());
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

/// Submit one workflow and follow it to a terminal status.
async fn run_workflow(config: &PipelineConfig, request: WorkflowRequest) -> Result<ExitCode> {
    let pipeline = Pipeline::start(config).context("failed to start pipeline")?;
    let workflow = request.kind();

    let submission = match pipeline.submitter.submit(request) {
        Ok(submission) => submission,
        Err(e) => {
            ui::print_rejection(&e.to_string());
            return Ok(ExitCode::FAILURE);
        }
    };

    let progress = TaskProgress::start(workflow, &submission.task_id);
    progress.submitted(&submission.task_id);

    let response = pipeline
        .reporter
        .wait_for_terminal(&submission.task_id, config.poll_interval(), |status| {
            progress.update(status);
            async {}
        })
        .await;
    progress.finish(&response);

    let ok = response.status == "SUCCESS";
    ui::print_json("Status", &response, ok);
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
