//! Scripted stand-ins for the inference backend and the loop stages.
//!
//! Each fake replays a fixed queue of answers and records what it was asked, so
//! tests can drive a whole run without spawning `codex` or Python.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::agents::evaluator::{EvaluationInput, Evaluator};
use crate::agents::generator::{GenerationError, GenerationInput, Generator};
use crate::core::request::{Row, RunRequest, Schema};
use crate::core::rubric::{CRITERIA_COUNT, Criteria, RubricResult};
use crate::core::types::ExecutionOutcome;
use crate::io::inference::{Inference, InferenceRequest};
use crate::io::sandbox::{Sandbox, SandboxRequest};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Criteria with the first `passing` entries (in rubric order) set.
pub fn criteria(passing: usize) -> Criteria {
    let mut values = [false; CRITERIA_COUNT];
    for value in values.iter_mut().take(passing) {
        *value = true;
    }
    Criteria::from_array(values)
}

/// Evaluation rubric with `passing` criteria met.
pub fn rubric(passing: usize, feedback: &str) -> RubricResult {
    RubricResult::Evaluation {
        criteria: criteria(passing),
        feedback: feedback.to_string(),
    }
}

/// Evaluator response JSON with `passing` criteria met.
pub fn evaluation_json(passing: usize, feedback: &str) -> Value {
    let mut value = serde_json::to_value(criteria(passing)).unwrap_or_else(|_| json!({}));
    if let Value::Object(map) = &mut value {
        map.insert("feedback".to_string(), Value::String(feedback.to_string()));
    }
    value
}

/// Generator response JSON wrapping `code` in the execution tags.
pub fn chart_code_json(code: &str) -> Value {
    json!({ "code": format!("<execute_python>\n{code}\n</execute_python>") })
}

pub fn sample_rows() -> Vec<Row> {
    [("a", 3), ("b", 5), ("c", 2)]
        .iter()
        .filter_map(|(category, count)| {
            json!({"category": category, "count": count})
                .as_object()
                .cloned()
        })
        .collect()
}

pub fn sample_schema() -> Schema {
    [("category", "object"), ("count", "int64")]
        .into_iter()
        .collect()
}

pub fn sample_request(max_retry: u32) -> RunRequest {
    RunRequest::new(
        "Bar chart of count per category",
        sample_rows(),
        sample_schema(),
        max_retry,
        7,
    )
    .unwrap_or_else(|err| panic!("sample request: {err}"))
}

/// Write a small real PNG, standing in for a rendered chart.
pub fn write_placeholder_chart(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    image::RgbImage::from_pixel(8, 6, image::Rgb([255, 255, 255])).save(path)?;
    Ok(())
}

/// Inference backend that writes queued JSON responses in order.
#[derive(Debug, Default)]
pub struct ScriptedInference {
    responses: Mutex<VecDeque<Value>>,
    prompts: Mutex<Vec<String>>,
    images: Mutex<Vec<Vec<PathBuf>>>,
}

impl ScriptedInference {
    pub fn new(responses: Vec<Value>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    /// Attached images per call.
    pub fn images(&self) -> Vec<Vec<PathBuf>> {
        lock(&self.images).clone()
    }
}

impl Inference for ScriptedInference {
    fn exec(&self, request: &InferenceRequest) -> Result<()> {
        lock(&self.prompts).push(request.prompt.clone());
        lock(&self.images).push(request.images.clone());
        let response = lock(&self.responses)
            .pop_front()
            .ok_or_else(|| anyhow!("scripted inference has no response left"))?;
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&request.output_path, serde_json::to_string_pretty(&response)?)?;
        Ok(())
    }
}

/// Generator that replays queued results and records the feedback it was given.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    results: Mutex<VecDeque<Result<String, GenerationError>>>,
    feedback: Mutex<Vec<Vec<String>>>,
    out_paths: Mutex<Vec<PathBuf>>,
}

impl ScriptedGenerator {
    pub fn new(results: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    /// Generator that returns `code` `times` times.
    pub fn repeating(code: &str, times: usize) -> Self {
        Self::new((0..times).map(|_| Ok(code.to_string())).collect())
    }

    pub fn feedback_seen(&self) -> Vec<Vec<String>> {
        lock(&self.feedback).clone()
    }

    pub fn out_paths(&self) -> Vec<PathBuf> {
        lock(&self.out_paths).clone()
    }

    pub fn calls(&self) -> usize {
        lock(&self.feedback).len()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, input: &GenerationInput<'_>) -> Result<String, GenerationError> {
        lock(&self.feedback).push(input.feedback.to_vec());
        lock(&self.out_paths).push(input.out_path.to_path_buf());
        lock(&self.results)
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("scripted generator has no result left").into()))
    }
}

/// Sandbox that replays queued outcomes, writing a chart for every success.
#[derive(Debug, Default)]
pub struct ScriptedSandbox {
    outcomes: Mutex<VecDeque<ExecutionOutcome>>,
    codes: Mutex<Vec<String>>,
}

impl ScriptedSandbox {
    pub fn new(outcomes: Vec<ExecutionOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Self::default()
        }
    }

    /// Sandbox whose every run succeeds cleanly.
    pub fn clean(times: usize) -> Self {
        Self::new(vec![ExecutionOutcome::Clean; times])
    }

    pub fn codes_run(&self) -> Vec<String> {
        lock(&self.codes).clone()
    }
}

impl Sandbox for ScriptedSandbox {
    fn run(&self, request: &SandboxRequest<'_>) -> Result<ExecutionOutcome> {
        lock(&self.codes).push(request.code.to_string());
        let outcome = lock(&self.outcomes)
            .pop_front()
            .ok_or_else(|| anyhow!("scripted sandbox has no outcome left"))?;
        if !outcome.is_error() {
            write_placeholder_chart(request.output_path)?;
        }
        Ok(outcome)
    }
}

/// Evaluator that replays queued rubrics and records the warnings it saw.
#[derive(Debug, Default)]
pub struct ScriptedEvaluator {
    results: Mutex<VecDeque<Result<RubricResult>>>,
    warnings: Mutex<Vec<Option<String>>>,
}

impl ScriptedEvaluator {
    pub fn new(results: Vec<Result<RubricResult>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    pub fn scoring(rubrics: Vec<RubricResult>) -> Self {
        Self::new(rubrics.into_iter().map(Ok).collect())
    }

    pub fn warnings_seen(&self) -> Vec<Option<String>> {
        lock(&self.warnings).clone()
    }

    pub fn calls(&self) -> usize {
        lock(&self.warnings).len()
    }
}

impl Evaluator for ScriptedEvaluator {
    fn evaluate(&self, input: &EvaluationInput<'_>) -> Result<RubricResult> {
        lock(&self.warnings).push(input.warning.map(str::to_string));
        let rubric = lock(&self.results)
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("scripted evaluator has no result left")))?;
        Ok(match input.warning {
            Some(warning) => RubricResult::Evaluation {
                criteria: rubric.criteria().copied().unwrap_or_default(),
                feedback: format!("{warning} {}", rubric.feedback()),
            },
            None => rubric,
        })
    }
}
