//! Investigation tests for Codex CLI `--output-schema` and `--output-last-message` flags.
//!
//! These check that Codex honours the evaluation schema the analyst relies on
//! (seven booleans plus non-empty feedback). They require the Codex CLI to be
//! installed and configured with valid API credentials.
//!
//! # Running
//!
//! ```bash
//! cargo test -p analyst --test investigation_llm codex_ -- --ignored
//! ```

use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use analyst::core::rubric::Criteria;
use analyst::io::inference::validate_against_schema;
use tempfile::tempdir;
use wait_timeout::ChildExt;

/// Default timeout for Codex CLI calls (60 seconds to accommodate LLM latency).
const CODEX_TIMEOUT: Duration = Duration::from_secs(60);

/// Path to the schema file relative to the analyst crate root.
const SCHEMA_PATH: &str = "schemas/evaluation.schema.json";

#[test]
#[ignore]
fn codex_cli_available() {
    let output = Command::new("codex")
        .arg("--version")
        .output()
        .expect("codex not in PATH");

    assert!(
        output.status.success(),
        "codex --version failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    println!("Codex CLI version: {}", String::from_utf8_lossy(&output.stdout).trim());
}

/// Asks for a judgment of a described chart and validates the written output.
#[test]
#[ignore]
fn codex_evaluation_output_matches_schema() {
    let tmp = tempdir().expect("create tempdir");
    let schema_dest = tmp.path().join("nested/evaluation.schema.json");
    copy_schema(&schema_dest);
    let output_path = tmp.path().join("nested/output.json");

    let mut child = Command::new("codex")
        .arg("exec")
        .arg("--skip-git-repo-check")
        .arg("--output-schema")
        .arg(&schema_dest)
        .arg("--output-last-message")
        .arg(&output_path)
        .arg("--")
        .arg(
            "Judge this chart: a bar chart titled 'Sales by Region' with labelled axes, \
             one series, no legend, for the query 'compare sales across regions'.",
        )
        .spawn()
        .expect("spawn codex");

    let status = child
        .wait_timeout(CODEX_TIMEOUT)
        .expect("wait")
        .expect("codex timed out");
    assert!(status.success(), "codex exec failed");
    assert!(output_path.exists(), "output file not created");

    let content = fs::read_to_string(&output_path).expect("read output");
    let json: serde_json::Value = serde_json::from_str(&content).expect("parse JSON");
    let schema: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&schema_dest).expect("read schema"))
            .expect("parse schema");
    validate_against_schema(&json, &schema).expect("output should satisfy schema");

    for name in Criteria::NAMES {
        assert!(json[name].is_boolean(), "{name} should be boolean");
    }
    assert!(
        json["feedback"].as_str().is_some_and(|s| !s.trim().is_empty()),
        "feedback should be non-empty"
    );
}

/// Copies the schema file from the analyst crate to the destination path.
fn copy_schema(dest: &Path) {
    let schema_src = Path::new(env!("CARGO_MANIFEST_DIR")).join(SCHEMA_PATH);
    assert!(
        schema_src.exists(),
        "schema not found at: {}",
        schema_src.display()
    );
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).expect("create parent dirs");
    }
    fs::copy(&schema_src, dest).expect("copy schema");
}
