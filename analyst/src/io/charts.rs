//! Charts directory layout and reset.
//!
//! ```text
//! <charts_dir>/
//!   chart_v0.png, chart_v1.png, ...   rendered candidates
//!   .scratch/v0/, .scratch/v1/, ...   per-candidate working files
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

const SCRATCH_DIR: &str = ".scratch";

/// Working-file locations for one candidate.
#[derive(Debug, Clone)]
pub struct ScratchPaths {
    pub dir: PathBuf,
    pub generator_prompt: PathBuf,
    pub generator_schema: PathBuf,
    pub generator_output: PathBuf,
    pub generator_log: PathBuf,
    pub code: PathBuf,
    pub dataset: PathBuf,
    pub sandbox_report: PathBuf,
    pub sandbox_log: PathBuf,
    pub review_image: PathBuf,
    pub evaluator_prompt: PathBuf,
    pub evaluator_schema: PathBuf,
    pub evaluator_output: PathBuf,
    pub evaluator_log: PathBuf,
}

impl ScratchPaths {
    pub fn new(charts_dir: &Path, index: usize) -> Self {
        let dir = charts_dir.join(SCRATCH_DIR).join(format!("v{index}"));
        Self {
            generator_prompt: dir.join("generator.prompt.md"),
            generator_schema: dir.join("generator.schema.json"),
            generator_output: dir.join("generator.output.json"),
            generator_log: dir.join("generator.log"),
            code: dir.join("chart.py"),
            dataset: dir.join("dataset.json"),
            sandbox_report: dir.join("sandbox.report.json"),
            sandbox_log: dir.join("sandbox.log"),
            review_image: dir.join("review.jpg"),
            evaluator_prompt: dir.join("evaluator.prompt.md"),
            evaluator_schema: dir.join("evaluator.schema.json"),
            evaluator_output: dir.join("evaluator.output.json"),
            evaluator_log: dir.join("evaluator.log"),
            dir,
        }
    }

    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create scratch dir {}", self.dir.display()))
    }
}

/// Remove every file in `charts_dir` plus the scratch area.
///
/// Subdirectories other than the scratch area (e.g. run-scoped directories of
/// other runs) are left alone. A missing directory is not an error.
pub fn clear_charts(charts_dir: &Path) -> Result<usize> {
    if !charts_dir.exists() {
        return Ok(0);
    }
    let mut removed = 0usize;
    let entries =
        fs::read_dir(charts_dir).with_context(|| format!("read {}", charts_dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", charts_dir.display()))?;
        let path = entry.path();
        if path.is_file() {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
            debug!(path = %path.display(), "removed chart file");
            removed += 1;
        } else if entry.file_name() == SCRATCH_DIR {
            fs::remove_dir_all(&path).with_context(|| format!("remove {}", path.display()))?;
        }
    }
    info!(dir = %charts_dir.display(), removed, "cleared previous charts");
    Ok(removed)
}
