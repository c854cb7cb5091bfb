//! Autonomous chart analyst CLI.
//!
//! Loads a CSV dataset, runs the generate/execute/evaluate loop for a chart
//! request, and prints the run report as JSON on stdout.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use analyst::agents::evaluator::ChartEvaluator;
use analyst::agents::generator::CodeGenerator;
use analyst::core::request::RunRequest;
use analyst::exit_codes;
use analyst::io::charts::clear_charts;
use analyst::io::config::{AnalystConfig, DEFAULT_CONFIG_FILE, load_config, write_config};
use analyst::io::dataset::load_csv;
use analyst::io::inference::{CodexInference, InferenceFailure};
use analyst::io::sandbox::PythonSandbox;
use analyst::logging;
use analyst::run::{RunConfig, run_analysis};

#[derive(Parser)]
#[command(
    name = "analyst",
    version,
    about = "Turn a chart request and a CSV dataset into a reviewed chart"
)]
struct Cli {
    /// Config file (defaults apply when it does not exist).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate, render, and review a chart until it passes or the budget runs out.
    Run {
        /// CSV dataset with a header row.
        #[arg(long)]
        data: PathBuf,
        /// What the chart should show.
        #[arg(long)]
        query: String,
        /// Total generate-execute cycles allowed (defaults to `default_max_retry`).
        #[arg(long)]
        max_retry: Option<u32>,
        /// Override the configured charts directory.
        #[arg(long)]
        charts_dir: Option<PathBuf>,
        /// Remove previous charts from the directory first.
        #[arg(long)]
        clear: bool,
    },
    /// Remove chart files and scratch data from the charts directory.
    Clear {
        #[arg(long)]
        charts_dir: Option<PathBuf>,
    },
    /// Write a default config file if missing.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.chain().any(|cause| cause.is::<InferenceFailure>()) {
        exit_codes::INFERENCE_FAILED
    } else {
        exit_codes::INVALID
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            data,
            query,
            max_retry,
            charts_dir,
            clear,
        } => cmd_run(&cli.config, &data, query, max_retry, charts_dir, clear),
        Command::Clear { charts_dir } => cmd_clear(&cli.config, charts_dir),
        Command::Init { force } => cmd_init(&cli.config, force),
    }
}

fn cmd_run(
    config_path: &Path,
    data: &Path,
    query: String,
    max_retry: Option<u32>,
    charts_dir: Option<PathBuf>,
    clear: bool,
) -> Result<()> {
    let cfg = load_config(config_path)?;
    let charts_dir = charts_dir.unwrap_or_else(|| cfg.charts_dir.clone());
    let dataset = load_csv(data)?;
    let request = RunRequest::new(
        query,
        dataset.rows,
        dataset.schema,
        max_retry.unwrap_or(cfg.default_max_retry),
        cfg.max_retry_limit,
    )
    .context("invalid run request")?;
    if clear {
        clear_charts(&charts_dir)?;
    }

    let backend = CodexInference::from_config(&cfg.inference);
    let generator = CodeGenerator::new(&backend, cfg.inference.output_limit_bytes)?;
    let evaluator = ChartEvaluator::new(
        &backend,
        cfg.evaluator.clone(),
        cfg.inference.output_limit_bytes,
    )?;
    let sandbox = PythonSandbox::from_config(&cfg.sandbox);
    let run_config = RunConfig::from_config(&cfg, charts_dir);

    let report = run_analysis(
        &request,
        &generator,
        &sandbox,
        &evaluator,
        &run_config,
        |candidate| {
            if let Some(rubric) = &candidate.rubric {
                match rubric.error() {
                    Some(err) => eprintln!("v{}: failed: {err}", candidate.index),
                    None => eprintln!("v{}: {}/7 criteria passed", candidate.index, rubric.passing()),
                }
            }
        },
    )?;

    let mut out = serde_json::to_string_pretty(&report).context("serialize run report")?;
    out.push('\n');
    print!("{out}");
    Ok(())
}

fn cmd_clear(config_path: &Path, charts_dir: Option<PathBuf>) -> Result<()> {
    let cfg = load_config(config_path)?;
    let dir = charts_dir.unwrap_or(cfg.charts_dir);
    let removed = clear_charts(&dir)?;
    println!("removed {removed} file(s) from {}", dir.display());
    Ok(())
}

fn cmd_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        debug!(path = %config_path.display(), "config exists, leaving it alone");
        println!("{} already exists", config_path.display());
        return Ok(());
    }
    let cfg = AnalystConfig::default();
    write_config(config_path, &cfg)?;
    fs::create_dir_all(&cfg.charts_dir)
        .with_context(|| format!("create {}", cfg.charts_dir.display()))?;
    println!("wrote {}", config_path.display());
    Ok(())
}
