//! cellmap: partition microscopy experiments into jobs, run them, and
//! collect their outputs.
//!
//! Each job family works in its own directory below the experiment root.
//! `init` writes the batch of job descriptions; `run --job N` executes a
//! single job from that batch, as a cluster scheduler would; `submit`
//! does everything on this machine; `collect` merges the outputs of a
//! finished batch.
//!
//! # Usage
//!
//! ```text
//! cellmap [OPTIONS] <EXPERIMENT_DIR> <FAMILY> <COMMAND>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use cellmap_jobs::family::{open, partition, run};
use cellmap_jobs::{Batch, BatchReport, Experiment, FAMILIES, JobError, JobStatus, LocalBackend};
use clap::{Parser, Subcommand};

use crate::logging::LogFormat;

/// Distributed analysis of multi-cycle microscopy experiments.
#[derive(Parser)]
#[command(name = "cellmap", version)]
struct Cli {
    /// Experiment root directory.
    experiment_dir: PathBuf,

    /// Job family.
    #[arg(value_parser = clap::builder::PossibleValuesParser::new(FAMILIES))]
    family: String,

    #[command(subcommand)]
    command: Command,

    /// Log filter directives, e.g. `info` or `cellmap_jobs=debug`.
    /// Overridden by `RUST_LOG`.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log line format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the metadata format of `experiment.yaml`.
    #[arg(long, global = true)]
    metadata_format: Option<String>,

    /// Override the outline simplification tolerance, in pixels.
    #[arg(long, global = true)]
    outline_tolerance: Option<f64>,
}

#[derive(Subcommand)]
enum Command {
    /// Partition the experiment and write the batch.
    Init,
    /// Run one job of the written batch.
    Run {
        /// Job id.
        #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
        job: u32,
    },
    /// Partition, run every job locally, and collect.
    Submit {
        /// Worker threads; defaults to one per core.
        #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
        threads: Option<usize>,
    },
    /// Merge the outputs of a finished batch.
    Collect,
    /// Print the job descriptions as JSON.
    Info,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(msg) = logging::init(&cli.log_level, cli.log_format) {
        eprintln!("{msg}");
        return ExitCode::FAILURE;
    }

    match execute(&cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

fn open_experiment(cli: &Cli) -> Result<Experiment, JobError> {
    let mut experiment = Experiment::open(&cli.experiment_dir)?;
    let config = experiment.config_mut();
    if let Some(format) = &cli.metadata_format {
        config.metadata_format.clone_from(format);
    }
    if let Some(tolerance) = cli.outline_tolerance {
        config.outline_tolerance = tolerance;
    }
    Ok(experiment)
}

fn execute(cli: &Cli) -> Result<ExitCode, JobError> {
    let experiment = open_experiment(cli)?;
    let family = open(&cli.family, &experiment)?;
    let family = family.as_ref();

    match &cli.command {
        Command::Init => {
            let batch = cellmap_jobs::init(family, &experiment)?;
            println!("{}: {} jobs", batch.family, batch.jobs.len());
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { job } => {
            let batch = Batch::load(&experiment, family.name())?;
            let outcome = run(family, &experiment, batch.job(*job)?);
            Ok(exit_code(outcome.status == JobStatus::Complete))
        }
        Command::Submit { threads } => {
            let report = LocalBackend::new(*threads).submit(family, &experiment)?;
            print_report(&report);
            Ok(exit_code(report.is_success()))
        }
        Command::Collect => {
            let batch = Batch::load(&experiment, family.name())?;
            let report = BatchReport::load(&experiment, &batch)?;
            family.collect_job_output(&batch, &report)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Info => {
            let batch = if Batch::path(&experiment, family.name()).is_file() {
                Batch::load(&experiment, family.name())?
            } else {
                partition(family)?
            };
            let json = serde_json::to_string_pretty(&batch).map_err(|source| JobError::Json {
                path: Batch::path(&experiment, family.name()),
                source,
            })?;
            println!("{json}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_report(report: &BatchReport) {
    println!(
        "{}: {} complete, {} failed",
        report.family,
        report.completed().len(),
        report.failed().len()
    );
    for outcome in report.outcomes.iter().filter(|o| o.status == JobStatus::Failed) {
        println!(
            "  job {}: {}",
            outcome.id,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
}

const fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
