//! Investigation tests for a full run backed by Codex CLI and a local Python.
//!
//! They are ignored by default because they require:
//! - Codex CLI installed and configured with API credentials
//! - `python3` with pandas and matplotlib
//! - Network access
//! - Non-deterministic model behavior
//!
//! Run with:
//!
//! ```bash
//! cargo test -p analyst --test investigation_llm -- --ignored
//!
//! # With logging (use --nocapture to see output for passing tests):
//! TEST_LOG=1 RUST_LOG=debug cargo test -p analyst --test investigation_llm -- --ignored --nocapture
//! ```

use std::path::Path;
use std::sync::Once;
use std::time::Duration;

use analyst::agents::evaluator::ChartEvaluator;
use analyst::agents::generator::CodeGenerator;
use analyst::core::request::RunRequest;
use analyst::io::config::AnalystConfig;
use analyst::io::dataset::parse_csv;
use analyst::io::inference::CodexInference;
use analyst::io::sandbox::PythonSandbox;
use analyst::run::{RunConfig, run_analysis};
use tempfile::tempdir;
use tracing::info;

static INIT_LOGGING: Once = Once::new();

fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        if std::env::var("TEST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string()))
                .init();
        }
    });
}

const SALES_CSV: &str = "\
month,region,revenue
2024-01,north,120.5
2024-01,south,98.0
2024-02,north,131.2
2024-02,south,104.7
2024-03,north,140.9
2024-03,south,110.3
";

#[test]
#[ignore]
fn end_to_end_run_produces_aligned_report() {
    init_test_logging();
    let temp = tempdir().expect("tempdir");
    let cfg = AnalystConfig::default();
    let dataset = parse_csv(SALES_CSV.as_bytes()).expect("parse csv");
    let request = RunRequest::new(
        "Line chart of monthly revenue with one line per region",
        dataset.rows,
        dataset.schema,
        3,
        cfg.max_retry_limit,
    )
    .expect("request");

    let backend = CodexInference::from_config(&cfg.inference);
    let generator = CodeGenerator::new(&backend, cfg.inference.output_limit_bytes).expect("generator");
    let evaluator = ChartEvaluator::new(&backend, cfg.evaluator.clone(), cfg.inference.output_limit_bytes)
        .expect("evaluator");
    let sandbox = PythonSandbox::from_config(&cfg.sandbox);
    let run_config = RunConfig {
        run_timeout: Duration::from_secs(600),
        ..RunConfig::from_config(&cfg, temp.path().join("charts"))
    };

    let report = run_analysis(&request, &generator, &sandbox, &evaluator, &run_config, |candidate| {
        info!(index = candidate.index, rubric = ?candidate.rubric, "candidate");
    })
    .expect("run");

    println!("{}", serde_json::to_string_pretty(&report).expect("report json"));
    assert_eq!(report.charts.len(), report.rubric_feedback.len());
    assert!(!report.charts.is_empty() && report.charts.len() <= 3);
    let last = report.final_chart().expect("final chart");
    let last_rubric = report.rubric_feedback.last().expect("final rubric");
    if last_rubric.error.is_none() {
        assert!(Path::new(last).is_file(), "missing chart {last}");
    }
}
