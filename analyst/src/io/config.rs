//! Analyst configuration stored in `analyst.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "analyst.toml";

/// Analyst configuration (TOML).
///
/// Missing fields default to the values a local single-user setup needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnalystConfig {
    /// Directory that receives `chart_v{index}.png` files.
    pub charts_dir: PathBuf,

    /// Retry budget used when a request does not specify one.
    pub default_max_retry: u32,

    /// Largest retry budget a request may ask for.
    pub max_retry_limit: u32,

    /// Wall-clock budget for a whole run in seconds (all inference and sandbox calls).
    pub run_timeout_secs: u64,

    pub inference: InferenceConfig,
    pub sandbox: SandboxConfig,
    pub evaluator: EvaluatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InferenceConfig {
    /// Program and leading arguments of the structured-generation CLI.
    pub command: Vec<String>,
    /// Extra arguments appended before the schema/output flags (e.g. model selection).
    pub args: Vec<String>,
    /// Truncate inference stdout/stderr logs beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            command: vec!["codex".to_string(), "exec".to_string()],
            args: vec!["--skip-git-repo-check".to_string()],
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Python interpreter with pandas and matplotlib installed.
    pub python: String,
    /// Per-execution timeout in seconds (capped by the remaining run budget).
    pub timeout_secs: u64,
    /// Truncate sandbox stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            timeout_secs: 120,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Attach the rendered chart to the evaluation request.
    pub attach_image: bool,
    /// Longest edge, in pixels, of the image sent for review.
    pub image_max_edge: u32,
    /// JPEG quality (1-100) of the image sent for review.
    pub jpeg_quality: u8,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            attach_image: true,
            image_max_edge: 512,
            jpeg_quality: 85,
        }
    }
}

impl Default for AnalystConfig {
    fn default() -> Self {
        Self {
            charts_dir: PathBuf::from("charts"),
            default_max_retry: 3,
            max_retry_limit: 7,
            run_timeout_secs: 15 * 60,
            inference: InferenceConfig::default(),
            sandbox: SandboxConfig::default(),
            evaluator: EvaluatorConfig::default(),
        }
    }
}

impl AnalystConfig {
    pub fn validate(&self) -> Result<()> {
        if self.charts_dir.as_os_str().is_empty() {
            return Err(anyhow!("charts_dir must be non-empty"));
        }
        if self.max_retry_limit == 0 {
            return Err(anyhow!("max_retry_limit must be > 0"));
        }
        if self.default_max_retry == 0 || self.default_max_retry > self.max_retry_limit {
            return Err(anyhow!(
                "default_max_retry must be between 1 and max_retry_limit ({})",
                self.max_retry_limit
            ));
        }
        if self.run_timeout_secs == 0 {
            return Err(anyhow!("run_timeout_secs must be > 0"));
        }
        if self.inference.command.is_empty() || self.inference.command[0].trim().is_empty() {
            return Err(anyhow!("inference.command must be a non-empty array"));
        }
        if self.inference.output_limit_bytes == 0 {
            return Err(anyhow!("inference.output_limit_bytes must be > 0"));
        }
        if self.sandbox.python.trim().is_empty() {
            return Err(anyhow!("sandbox.python must be non-empty"));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(anyhow!("sandbox.timeout_secs must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        if self.evaluator.image_max_edge == 0 {
            return Err(anyhow!("evaluator.image_max_edge must be > 0"));
        }
        if !(1..=100).contains(&self.evaluator.jpeg_quality) {
            return Err(anyhow!("evaluator.jpeg_quality must be between 1 and 100"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AnalystConfig::default()`.
pub fn load_config(path: &Path) -> Result<AnalystConfig> {
    if !path.exists() {
        let cfg = AnalystConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AnalystConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AnalystConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
