//! Shared application state for the analyst server.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use analyst::io::charts::clear_charts;
use analyst::io::config::AnalystConfig;
use anyhow::{Context, Result};
use chrono::Local;
use tracing::debug;

/// Prefix of run-scoped chart directories.
pub const RUN_DIR_PREFIX: &str = "run-";

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AnalystConfig>,
    /// Root directory; each run writes into its own subdirectory.
    pub charts_dir: PathBuf,
    run_counter: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(config: AnalystConfig, charts_dir: PathBuf) -> Self {
        Self {
            config: Arc::new(config),
            charts_dir,
            run_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Allocate a fresh run id such as `run-20250101-120000-3`.
    pub fn next_run_id(&self) -> String {
        let counter = self.run_counter.fetch_add(1, Ordering::Relaxed);
        run_id(&Local::now().format("%Y%m%d-%H%M%S").to_string(), counter)
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.charts_dir.join(run_id)
    }

    /// Remove every stored chart: loose files in the root and all run directories.
    pub fn clear_all(&self) -> Result<usize> {
        let mut removed = clear_charts(&self.charts_dir)?;
        if !self.charts_dir.exists() {
            return Ok(removed);
        }
        let entries = fs::read_dir(&self.charts_dir)
            .with_context(|| format!("read {}", self.charts_dir.display()))?;
        for entry in entries {
            let entry = entry.context("read charts entry")?;
            let path = entry.path();
            let is_run_dir = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(RUN_DIR_PREFIX));
            if path.is_dir() && is_run_dir {
                removed += clear_charts(&path)?;
                fs::remove_dir_all(&path).with_context(|| format!("remove {}", path.display()))?;
                debug!(dir = %path.display(), "removed run directory");
            }
        }
        Ok(removed)
    }
}

fn run_id(timestamp: &str, counter: u64) -> String {
    format!("{RUN_DIR_PREFIX}{timestamp}-{counter}")
}
