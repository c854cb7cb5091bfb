//! Loop controller: drives one run through generate, execute, evaluate, decide.
//!
//! The controller owns the run state and performs the work of each stage; the
//! pure [`transition`] function decides where to go next. Every cycle appends
//! exactly one candidate and scores it exactly once, so the reported chart
//! paths and rubrics always line up by index.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::agents::evaluator::{EvaluationInput, Evaluator};
use crate::agents::generator::{GenerationError, GenerationInput, Generator};
use crate::core::budget::{DeadlineExceeded, RetryBudget, remaining_budget};
use crate::core::candidate::{CandidateArtifact, CandidateStore, chart_path};
use crate::core::machine::{LoopState, transition};
use crate::core::request::RunRequest;
use crate::core::rubric::{RubricRecord, RubricResult};
use crate::core::types::Termination;
use crate::io::charts::ScratchPaths;
use crate::io::config::AnalystConfig;
use crate::io::review_image::check_chart;
use crate::io::sandbox::{Sandbox, SandboxRequest};

/// Error recorded for a candidate cut off by the run deadline.
pub const DEADLINE_FAILURE: &str = "run deadline reached before the candidate was scored";

/// Per-run settings derived from [`AnalystConfig`].
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directory receiving `chart_v{index}.png`; created if missing.
    pub charts_dir: PathBuf,
    /// Upper bound for one sandbox execution.
    pub sandbox_timeout: Duration,
    /// Wall-clock budget for the whole run.
    pub run_timeout: Duration,
}

impl RunConfig {
    pub fn from_config(cfg: &AnalystConfig, charts_dir: PathBuf) -> Self {
        Self {
            charts_dir,
            sandbox_timeout: Duration::from_secs(cfg.sandbox.timeout_secs),
            run_timeout: Duration::from_secs(cfg.run_timeout_secs),
        }
    }
}

/// Final result of a run, index-aligned: `rubric_feedback[i]` scores `charts[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub query: String,
    pub charts: Vec<String>,
    pub rubric_feedback: Vec<RubricRecord>,
    pub termination: Termination,
}

impl RunReport {
    /// Path of the delivered (last) chart.
    pub fn final_chart(&self) -> Option<&str> {
        self.charts.last().map(String::as_str)
    }
}

/// Mutable state owned by the controller for the duration of one run.
struct RunState<'a> {
    request: &'a RunRequest,
    charts_dir: PathBuf,
    deadline: Instant,
    store: CandidateStore,
    budget: RetryBudget,
    state: LoopState,
    /// Rubric for a candidate whose generation was malformed; recorded at EXECUTE.
    pending_failure: Option<RubricResult>,
    /// Warning feedback from the current cycle's execution.
    warning: Option<String>,
}

impl<'a> RunState<'a> {
    fn new(request: &'a RunRequest, charts_dir: PathBuf, deadline: Instant) -> Self {
        Self {
            request,
            charts_dir,
            deadline,
            store: CandidateStore::new(),
            budget: RetryBudget::new(request.max_retry()),
            state: LoopState::initial(),
            pending_failure: None,
            warning: None,
        }
    }

    fn latest_rubric(&self) -> Option<&RubricResult> {
        self.store.latest().and_then(|candidate| candidate.rubric.as_ref())
    }

    fn generate<G: Generator>(&mut self, generator: &G) -> Result<()> {
        let index = self.store.next_index();
        let image_path = chart_path(&self.charts_dir, index);
        let scratch = ScratchPaths::new(&self.charts_dir, index);
        let feedback = self.store.feedback_history();
        self.warning = None;

        let generated = generator.generate(&GenerationInput {
            query: self.request.query(),
            schema: self.request.schema(),
            feedback: &feedback,
            out_path: &image_path,
            scratch: &scratch,
            timeout: remaining_budget(self.deadline)?,
        });
        let code = match generated {
            Ok(code) => {
                self.pending_failure = None;
                code
            }
            Err(GenerationError::Malformed(err)) => {
                warn!(index, err = %err, "generator returned no usable code");
                self.pending_failure = Some(RubricResult::execution_failure(format!(
                    "malformed generation: {err}"
                )));
                String::new()
            }
            Err(GenerationError::Inference(failure)) => return Err(failure.into()),
            Err(GenerationError::Other(err)) => return Err(err.context("generate chart code")),
        };
        self.store
            .append(CandidateArtifact::new(index, code, image_path))?;
        Ok(())
    }

    fn execute<S: Sandbox>(&mut self, sandbox: &S, sandbox_timeout: Duration) -> Result<()> {
        let remaining = self.budget.consume();
        debug!(remaining, "consumed retry budget");

        if let Some(rubric) = self.pending_failure.take() {
            self.store.score_latest(rubric)?;
            return Ok(());
        }

        let candidate = self
            .store
            .latest()
            .ok_or_else(|| anyhow!("no candidate to execute"))?;
        let index = candidate.index;
        let scratch = ScratchPaths::new(&self.charts_dir, index);
        let timeout = sandbox_timeout.min(remaining_budget(self.deadline)?);
        let outcome = sandbox
            .run(&SandboxRequest {
                code: &candidate.code,
                rows: self.request.rows(),
                output_path: &candidate.image_path,
                scratch: &scratch,
                timeout,
            })
            .with_context(|| format!("execute candidate {index}"))?;

        let failure = outcome.failure_rubric().or_else(|| {
            check_chart(&candidate.image_path).err().map(|err| {
                RubricResult::execution_failure(format!("chart is not a readable image: {err:#}"))
            })
        });
        match failure {
            Some(rubric) => {
                warn!(index, error = rubric.error().unwrap_or_default(), "candidate failed to run");
                self.store.score_latest(rubric)?;
            }
            None => self.warning = outcome.warning_feedback(),
        }
        Ok(())
    }

    fn evaluate<E: Evaluator>(&mut self, evaluator: &E) -> Result<()> {
        // A failure rubric recorded during EXECUTE is carried forward unchanged.
        if let Some(rubric) = self.latest_rubric() {
            info!(error = rubric.error().unwrap_or_default(), "candidate scored as failed");
            return Ok(());
        }
        let candidate = self
            .store
            .latest()
            .ok_or_else(|| anyhow!("no candidate to evaluate"))?;
        let scratch = ScratchPaths::new(&self.charts_dir, candidate.index);
        let rubric = evaluator.evaluate(&EvaluationInput {
            query: self.request.query(),
            schema: self.request.schema(),
            code: &candidate.code,
            image_path: &candidate.image_path,
            warning: self.warning.as_deref(),
            scratch: &scratch,
            timeout: remaining_budget(self.deadline)?,
        })?;
        info!(index = candidate.index, passing = rubric.passing(), "candidate scored");
        self.store.score_latest(rubric)?;
        Ok(())
    }

    /// Close the run once its wall-clock budget is spent.
    ///
    /// Returns `false` when no candidate was scored yet, leaving nothing to report.
    /// An in-flight candidate is recorded as failed so the report stays aligned.
    fn stop_at_deadline(&mut self) -> Result<bool> {
        if self.store.all().iter().all(|candidate| candidate.rubric.is_none()) {
            return Ok(false);
        }
        if self.latest_rubric().is_none() {
            self.store
                .score_latest(RubricResult::execution_failure(DEADLINE_FAILURE))?;
        }
        self.pending_failure = None;
        Ok(true)
    }

    fn into_report(self, termination: Termination) -> Result<RunReport> {
        let mut charts = Vec::with_capacity(self.store.len());
        let mut rubric_feedback = Vec::with_capacity(self.store.len());
        for candidate in self.store.into_inner() {
            let rubric = candidate
                .rubric
                .ok_or_else(|| anyhow!("candidate {} was never scored", candidate.index))?;
            charts.push(candidate.image_path.display().to_string());
            rubric_feedback.push(rubric.to_record());
        }
        Ok(RunReport {
            query: self.request.query().to_string(),
            charts,
            rubric_feedback,
            termination,
        })
    }
}

/// Run the generate/execute/evaluate loop for `request` until a candidate is
/// accepted or the retry budget is spent.
///
/// Budget exhaustion is a normal outcome, and so is reaching the run deadline
/// once a candidate has been scored. Errors are reserved for inference failures
/// (an [`InferenceFailure`](crate::io::inference::InferenceFailure) in the
/// chain), an unusable sandbox, a deadline hit before any candidate was scored,
/// and I/O problems.
/// `on_candidate` is called once per scored candidate.
#[instrument(skip_all, fields(max_retry = request.max_retry(), charts_dir = %config.charts_dir.display()))]
pub fn run_analysis<G, S, E, F>(
    request: &RunRequest,
    generator: &G,
    sandbox: &S,
    evaluator: &E,
    config: &RunConfig,
    mut on_candidate: F,
) -> Result<RunReport>
where
    G: Generator,
    S: Sandbox,
    E: Evaluator,
    F: FnMut(&CandidateArtifact),
{
    let deadline = Instant::now() + config.run_timeout;
    let charts_dir = prepare_charts_dir(&config.charts_dir)?;
    let mut run = RunState::new(request, charts_dir, deadline);
    info!(query = request.query(), "starting run");

    let termination = loop {
        let step = match run.state {
            LoopState::Generate => run.generate(generator),
            LoopState::Execute => run.execute(sandbox, config.sandbox_timeout),
            LoopState::Evaluate => run.evaluate(evaluator),
            LoopState::Decide => Ok(()),
            LoopState::Terminated(reason) => break reason,
        };
        if let Err(err) = step {
            if err.is::<DeadlineExceeded>() && run.stop_at_deadline()? {
                warn!(candidates = run.store.len(), "run deadline reached, reporting scored candidates");
                if run.state != LoopState::Generate
                    && let Some(candidate) = run.store.latest()
                {
                    on_candidate(candidate);
                }
                break Termination::DeadlineReached;
            }
            return Err(err);
        }
        if run.state == LoopState::Evaluate
            && let Some(candidate) = run.store.latest()
        {
            on_candidate(candidate);
        }
        let next = transition(run.state, run.budget.remaining(), run.latest_rubric())?;
        debug!(from = %run.state, to = %next, remaining = run.budget.remaining(), "state transition");
        run.state = next;
    };

    info!(
        candidates = run.store.len(),
        spent = run.budget.spent(),
        termination = ?termination,
        "run finished"
    );
    run.into_report(termination)
}

fn prepare_charts_dir(dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create charts dir {}", dir.display()))?;
    // Generated code runs in another working directory, so it needs absolute paths.
    dir.canonicalize()
        .with_context(|| format!("resolve charts dir {}", dir.display()))
}
