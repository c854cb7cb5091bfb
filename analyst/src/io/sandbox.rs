//! Execution engine: run one candidate's chart code in a fresh Python process.
//!
//! Each candidate gets its own interpreter, so nothing leaks between candidates
//! or into the controller. The harness rebuilds `df` from the request rows,
//! forces the non-interactive `Agg` backend, records every warning raised while
//! the code runs, and writes a JSON report that [`PythonSandbox`] classifies
//! into an [`ExecutionOutcome`].

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::core::request::Row;
use crate::core::types::ExecutionOutcome;
use crate::io::charts::ScratchPaths;
use crate::io::config::SandboxConfig;
use crate::io::process::run_with_deadline;

const HARNESS: &str = include_str!("sandbox/harness.py");
const HARNESS_FILE: &str = "harness.py";

/// One execution of candidate code.
#[derive(Debug, Clone)]
pub struct SandboxRequest<'a> {
    pub code: &'a str,
    pub rows: &'a [Row],
    /// Where the code is expected to save its chart.
    pub output_path: &'a Path,
    pub scratch: &'a ScratchPaths,
    pub timeout: Duration,
}

/// Runs candidate code.
///
/// Failures of the code itself (exceptions, timeouts, no saved chart) are
/// reported as [`ExecutionOutcome::Error`]. `Err` is reserved for the sandbox
/// being unusable, e.g. the interpreter cannot be spawned.
pub trait Sandbox {
    fn run(&self, request: &SandboxRequest<'_>) -> Result<ExecutionOutcome>;
}

impl<T: Sandbox + ?Sized> Sandbox for &T {
    fn run(&self, request: &SandboxRequest<'_>) -> Result<ExecutionOutcome> {
        (**self).run(request)
    }
}

#[derive(Debug, Deserialize)]
struct HarnessReport {
    status: HarnessStatus,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum HarnessStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone)]
pub struct PythonSandbox {
    python: PathBuf,
    output_limit_bytes: usize,
}

impl PythonSandbox {
    pub fn from_config(cfg: &SandboxConfig) -> Self {
        Self {
            python: PathBuf::from(&cfg.python),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }

    fn prepare(&self, request: &SandboxRequest<'_>) -> Result<PathBuf> {
        let scratch = request.scratch;
        scratch.create()?;
        let harness = scratch.dir.join(HARNESS_FILE);
        fs::write(&harness, HARNESS).with_context(|| format!("write {}", harness.display()))?;
        fs::write(&scratch.code, request.code)
            .with_context(|| format!("write {}", scratch.code.display()))?;
        let rows = serde_json::to_vec(request.rows).context("serialize dataset rows")?;
        fs::write(&scratch.dataset, rows)
            .with_context(|| format!("write {}", scratch.dataset.display()))?;
        // A chart left over from an earlier run must not pass as this candidate's.
        for stale in [scratch.sandbox_report.as_path(), request.output_path] {
            if stale.exists() {
                fs::remove_file(stale).with_context(|| format!("remove {}", stale.display()))?;
            }
        }
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create chart dir {}", parent.display()))?;
        }
        Ok(harness)
    }
}

impl Sandbox for PythonSandbox {
    #[instrument(skip_all, fields(output_path = %request.output_path.display(), timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &SandboxRequest<'_>) -> Result<ExecutionOutcome> {
        let harness = self.prepare(request)?;
        let scratch = request.scratch;

        let mut cmd = Command::new(&self.python);
        cmd.arg(&harness)
            .arg(&scratch.dataset)
            .arg(&scratch.code)
            .arg(&scratch.sandbox_report)
            .current_dir(&scratch.dir)
            .env("MPLBACKEND", "Agg");
        let output = run_with_deadline(cmd, None, request.timeout, self.output_limit_bytes)
            .with_context(|| format!("start python sandbox {}", self.python.display()))?;
        fs::write(&scratch.sandbox_log, output.render_log("sandbox"))
            .with_context(|| format!("write {}", scratch.sandbox_log.display()))?;

        if output.timed_out {
            warn!("chart code timed out");
            return Ok(ExecutionOutcome::Error {
                message: format!(
                    "chart code timed out after {}s",
                    request.timeout.as_secs()
                ),
            });
        }

        let report = match read_report(&scratch.sandbox_report) {
            Ok(report) => report,
            Err(err) => {
                // The harness never got to write a report: the interpreter itself
                // failed (missing pandas, hard exit from the code, ...).
                warn!(err = %format!("{err:#}"), exit_code = ?output.status.code(), "sandbox produced no report");
                return Ok(ExecutionOutcome::Error {
                    message: crash_message(output.status.code(), &output.stderr_lossy()),
                });
            }
        };

        let outcome = classify(report, request.output_path);
        info!(outcome = outcome.label(), "candidate executed");
        Ok(outcome)
    }
}

fn read_report(path: &Path) -> Result<HarnessReport> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

fn classify(report: HarnessReport, output_path: &Path) -> ExecutionOutcome {
    if report.status == HarnessStatus::Error {
        let message = report
            .error
            .filter(|msg| !msg.trim().is_empty())
            .unwrap_or_else(|| "chart code raised an exception".to_string());
        return ExecutionOutcome::Error { message };
    }
    if !output_path.is_file() {
        return ExecutionOutcome::Error {
            message: format!("chart was not saved to {}", output_path.display()),
        };
    }
    if report.warnings.is_empty() {
        ExecutionOutcome::Clean
    } else {
        debug!(count = report.warnings.len(), "chart code raised warnings");
        ExecutionOutcome::Warning {
            messages: report.warnings,
        }
    }
}

fn crash_message(code: Option<i32>, stderr: &str) -> String {
    let last = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty());
    match (code, last) {
        (_, Some(line)) => line.to_string(),
        (Some(code), None) => format!("python exited with status {code}"),
        (None, None) => "python was terminated by a signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn python_ready() -> bool {
        Command::new("python3")
            .args(["-c", "import pandas, matplotlib"])
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn rows() -> Vec<Row> {
        [("a", 3), ("b", 5)]
            .iter()
            .map(|(category, count)| {
                json!({"category": category, "count": count})
                    .as_object()
                    .cloned()
                    .unwrap_or_default()
            })
            .collect()
    }

    fn run_code(code: &str, timeout: Duration) -> (ExecutionOutcome, tempfile::TempDir) {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = temp.path().join("chart_v0.png");
        let scratch = ScratchPaths::new(temp.path(), 0);
        let rows = rows();
        let sandbox = PythonSandbox::from_config(&SandboxConfig::default());
        let outcome = sandbox
            .run(&SandboxRequest {
                code: &code.replace("OUT", &out.display().to_string()),
                rows: &rows,
                output_path: &out,
                scratch: &scratch,
                timeout,
            })
            .expect("sandbox run");
        (outcome, temp)
    }

    #[test]
    fn clean_code_saves_chart() {
        if !python_ready() {
            eprintln!("skipping: python3 with pandas and matplotlib not available");
            return;
        }
        let code = "import matplotlib.pyplot as plt\n\
                    fig, ax = plt.subplots()\n\
                    ax.bar(df['category'], df['count'])\n\
                    ax.set_title('Counts')\n\
                    plt.savefig('OUT', dpi=50)\n\
                    plt.close()\n";
        let (outcome, temp) = run_code(code, Duration::from_secs(60));
        assert_eq!(outcome, ExecutionOutcome::Clean);
        assert!(temp.path().join("chart_v0.png").is_file());
    }

    #[test]
    fn exceptions_become_errors() {
        if !python_ready() {
            eprintln!("skipping: python3 with pandas and matplotlib not available");
            return;
        }
        let (outcome, _temp) = run_code("x = 1 / 0\n", Duration::from_secs(60));
        assert_eq!(
            outcome,
            ExecutionOutcome::Error {
                message: "division by zero".to_string()
            }
        );
    }

    #[test]
    fn warnings_are_captured_after_success() {
        if !python_ready() {
            eprintln!("skipping: python3 with pandas and matplotlib not available");
            return;
        }
        let code = "import warnings\n\
                    import matplotlib.pyplot as plt\n\
                    warnings.warn('careful with that axis')\n\
                    plt.plot(df['count'])\n\
                    plt.savefig('OUT', dpi=50)\n";
        let (outcome, _temp) = run_code(code, Duration::from_secs(60));
        assert_eq!(
            outcome,
            ExecutionOutcome::Warning {
                messages: vec!["careful with that axis".to_string()]
            }
        );
    }

    #[test]
    fn every_warning_is_captured_in_order() {
        if !python_ready() {
            eprintln!("skipping: python3 with pandas and matplotlib not available");
            return;
        }
        let code = "import warnings\n\
                    import matplotlib.pyplot as plt\n\
                    warnings.warn('first axis warning')\n\
                    warnings.warn('second axis warning', UserWarning)\n\
                    plt.plot(df['count'])\n\
                    plt.savefig('OUT', dpi=50)\n";
        let (outcome, _temp) = run_code(code, Duration::from_secs(60));
        assert_eq!(
            outcome,
            ExecutionOutcome::Warning {
                messages: vec![
                    "first axis warning".to_string(),
                    "second axis warning".to_string(),
                ]
            }
        );
        assert_eq!(
            outcome.warning_feedback().as_deref(),
            Some("Warning detected: first axis warning; second axis warning")
        );
    }

    #[test]
    fn dataset_json_keeps_column_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let scratch = ScratchPaths::new(temp.path(), 0);
        let rows: Vec<Row> = vec![
            json!({"zeta": 1, "alpha": 2, "mid": "x"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        ];
        let sandbox = PythonSandbox::from_config(&SandboxConfig::default());
        sandbox
            .prepare(&SandboxRequest {
                code: "pass",
                rows: &rows,
                output_path: &temp.path().join("chart_v0.png"),
                scratch: &scratch,
                timeout: Duration::from_secs(5),
            })
            .expect("prepare");
        let written = fs::read_to_string(&scratch.dataset).expect("dataset");
        assert_eq!(written, r#"[{"zeta":1,"alpha":2,"mid":"x"}]"#);
    }

    #[test]
    fn unsaved_chart_is_an_error() {
        if !python_ready() {
            eprintln!("skipping: python3 with pandas and matplotlib not available");
            return;
        }
        let (outcome, _temp) = run_code("total = df['count'].sum()\n", Duration::from_secs(60));
        assert!(outcome.is_error());
    }

    #[test]
    fn runaway_code_times_out() {
        if !python_ready() {
            eprintln!("skipping: python3 with pandas and matplotlib not available");
            return;
        }
        let (outcome, _temp) = run_code("import time\ntime.sleep(30)\n", Duration::from_secs(3));
        match outcome {
            ExecutionOutcome::Error { message } => assert!(message.contains("timed out")),
            other => panic!("expected timeout error, got {other:?}"),
        }
    }

    #[test]
    fn missing_interpreter_is_a_run_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let scratch = ScratchPaths::new(temp.path(), 0);
        let sandbox = PythonSandbox::from_config(&SandboxConfig {
            python: "definitely-not-a-python-binary".to_string(),
            ..SandboxConfig::default()
        });
        let result = sandbox.run(&SandboxRequest {
            code: "pass",
            rows: &[],
            output_path: &temp.path().join("chart_v0.png"),
            scratch: &scratch,
            timeout: Duration::from_secs(5),
        });
        assert!(result.is_err());
    }

    #[test]
    fn crash_message_prefers_last_stderr_line() {
        assert_eq!(
            crash_message(Some(1), "Traceback\nModuleNotFoundError: No module named 'pandas'\n\n"),
            "ModuleNotFoundError: No module named 'pandas'"
        );
        assert_eq!(crash_message(Some(3), ""), "python exited with status 3");
        assert_eq!(crash_message(None, " "), "python was terminated by a signal");
    }

    #[test]
    fn classify_requires_saved_chart() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = temp.path().join("chart.png");
        let ok = || HarnessReport {
            status: HarnessStatus::Ok,
            error: None,
            warnings: Vec::new(),
        };
        assert!(classify(ok(), &out).is_error());
        fs::write(&out, b"png").expect("write");
        assert_eq!(classify(ok(), &out), ExecutionOutcome::Clean);
        let failed = HarnessReport {
            status: HarnessStatus::Error,
            error: Some(String::new()),
            warnings: Vec::new(),
        };
        assert_eq!(
            classify(failed, &out),
            ExecutionOutcome::Error {
                message: "chart code raised an exception".to_string()
            }
        );
    }
}
