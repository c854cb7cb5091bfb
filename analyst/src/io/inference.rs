//! Inference backend abstraction for structured generation.
//!
//! The [`Inference`] trait decouples the generator and evaluator from the actual
//! model backend (currently `codex exec`). Tests use scripted backends that
//! write predetermined JSON without spawning processes.
//!
//! Every response crosses a trust boundary in [`infer_json`]: it must exist,
//! parse as JSON, and validate against the stage's JSON Schema before it is
//! deserialized into a typed value.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonschema::Draft;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::config::InferenceConfig;
use crate::io::process::run_with_deadline;

/// Which caller an inference request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceStage {
    Generate,
    Evaluate,
}

impl InferenceStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Evaluate => "evaluate",
        }
    }
}

/// The inference capability was unreachable or answered with an invalid structure.
///
/// Not recoverable inside a run: callers downcast to this to report a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("inference failed during {}: {reason}", .stage.as_str())]
pub struct InferenceFailure {
    pub stage: InferenceStage,
    pub reason: String,
}

impl InferenceFailure {
    pub fn new(stage: InferenceStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

/// Parameters for one inference invocation.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub stage: InferenceStage,
    /// Working directory for the backend process.
    pub workdir: PathBuf,
    /// Prompt text fed on stdin.
    pub prompt: String,
    /// JSON Schema constraining the response.
    pub output_schema_path: PathBuf,
    /// Where the backend must write its final JSON message.
    pub output_path: PathBuf,
    /// Where backend stdout/stderr are logged.
    pub log_path: PathBuf,
    /// Images attached to the request.
    pub images: Vec<PathBuf>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Abstraction over structured-generation backends.
pub trait Inference {
    /// Run the model for `request`. Must write the response to `request.output_path`.
    fn exec(&self, request: &InferenceRequest) -> Result<()>;
}

impl<T: Inference + ?Sized> Inference for &T {
    fn exec(&self, request: &InferenceRequest) -> Result<()> {
        (**self).exec(request)
    }
}

/// Backend that spawns `codex exec` (or a compatible CLI) per request.
#[derive(Debug, Clone)]
pub struct CodexInference {
    command: Vec<String>,
    args: Vec<String>,
}

impl CodexInference {
    pub fn from_config(cfg: &InferenceConfig) -> Self {
        Self {
            command: cfg.command.clone(),
            args: cfg.args.clone(),
        }
    }

    fn build_command(&self, request: &InferenceRequest) -> Result<Command> {
        let (program, leading) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("inference command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(leading).args(&self.args);
        for image in &request.images {
            cmd.arg("--image").arg(image);
        }
        cmd.arg("--output-schema")
            .arg(&request.output_schema_path)
            .arg("--output-last-message")
            .arg(&request.output_path)
            .arg("-")
            .current_dir(&request.workdir);
        Ok(cmd)
    }
}

impl Inference for CodexInference {
    #[instrument(skip_all, fields(stage = request.stage.as_str(), timeout_secs = request.timeout.as_secs(), images = request.images.len()))]
    fn exec(&self, request: &InferenceRequest) -> Result<()> {
        info!(workdir = %request.workdir.display(), "starting inference");
        if !request.output_schema_path.exists() {
            return Err(anyhow!(
                "missing output schema {}",
                request.output_schema_path.display()
            ));
        }
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }

        let cmd = self.build_command(request)?;
        let output = run_with_deadline(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
        )
        .context("run inference command")?;

        write_log(&request.log_path, &output.render_log("inference"))?;

        if output.timed_out {
            warn!(
                timeout_secs = request.timeout.as_secs(),
                "inference timed out"
            );
            return Err(anyhow!("inference timed out after {:?}", request.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "inference failed");
            return Err(anyhow!(
                "inference command failed with status {:?}",
                output.status.code()
            ));
        }

        debug!("inference completed");
        Ok(())
    }
}

/// Run `backend`, then load and validate its response as `T`.
///
/// Any failure along the way becomes an [`InferenceFailure`] for `request.stage`.
#[instrument(skip_all, fields(stage = request.stage.as_str(), output_path = %request.output_path.display()))]
pub fn infer_json<I: Inference, T: DeserializeOwned>(
    backend: &I,
    request: &InferenceRequest,
    schema: &Value,
) -> Result<T, InferenceFailure> {
    let fail = |reason: String| InferenceFailure::new(request.stage, reason);

    // A stale response from an earlier call must never be mistaken for this one.
    if request.output_path.exists() {
        fs::remove_file(&request.output_path)
            .map_err(|err| fail(format!("remove stale output: {err}")))?;
    }
    backend.exec(request).map_err(|err| fail(format!("{err:#}")))?;

    let raw = read_output(&request.output_path).map_err(|err| fail(format!("{err:#}")))?;
    validate_against_schema(&raw, schema).map_err(|err| fail(format!("{err:#}")))?;
    serde_json::from_value(raw).map_err(|err| fail(format!("decode response: {err}")))
}

fn read_output(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Err(anyhow!("missing inference output {}", path.display()));
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Validate JSON instance against a JSON Schema (Draft 2020-12).
pub fn validate_against_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "response violates schema:\n- {}",
            messages.join("\n- ")
        ));
    }
    Ok(())
}

/// Write a schema file next to the request so the backend can read it.
pub fn write_schema(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create schema dir {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write schema {}", path.display()))
}

fn write_log(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write log {}", path.display()))
}
