//! Code generator: query, schema, and feedback in; chart code out.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::core::extract::{MalformedGeneration, extract_chart_code};
use crate::core::request::Schema;
use crate::io::charts::ScratchPaths;
use crate::io::inference::{
    Inference, InferenceFailure, InferenceRequest, InferenceStage, infer_json, write_schema,
};
use crate::io::prompt::{GeneratorPrompt, PromptEngine};

const CHART_CODE_SCHEMA: &str = include_str!("../../schemas/chart_code.schema.json");

static CHART_CODE_SCHEMA_JSON: LazyLock<Value> = LazyLock::new(|| {
    serde_json::from_str(CHART_CODE_SCHEMA).expect("chart code schema is valid json")
});

/// Everything one generation call needs.
#[derive(Debug, Clone, Copy)]
pub struct GenerationInput<'a> {
    pub query: &'a str,
    pub schema: &'a Schema,
    /// Feedback from every prior rubric, oldest first. Empty on the first call.
    pub feedback: &'a [String],
    /// Where the generated code must save its chart.
    pub out_path: &'a Path,
    pub scratch: &'a ScratchPaths,
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    /// The response arrived but held no usable code; the run records it and retries.
    #[error("malformed generation: {0}")]
    Malformed(#[from] MalformedGeneration),
    #[error(transparent)]
    Inference(#[from] InferenceFailure),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub trait Generator {
    fn generate(&self, input: &GenerationInput<'_>) -> Result<String, GenerationError>;
}

impl<T: Generator + ?Sized> Generator for &T {
    fn generate(&self, input: &GenerationInput<'_>) -> Result<String, GenerationError> {
        (**self).generate(input)
    }
}

#[derive(Debug, Deserialize)]
struct ChartCode {
    code: String,
}

/// Generator backed by a structured-inference backend.
pub struct CodeGenerator<I> {
    backend: I,
    prompts: PromptEngine,
    output_limit_bytes: usize,
}

impl<I: Inference> CodeGenerator<I> {
    pub fn new(backend: I, output_limit_bytes: usize) -> anyhow::Result<Self> {
        Ok(Self {
            backend,
            prompts: PromptEngine::new()?,
            output_limit_bytes,
        })
    }
}

impl<I: Inference> Generator for CodeGenerator<I> {
    #[instrument(skip_all, fields(out_path = %input.out_path.display(), feedback = input.feedback.len()))]
    fn generate(&self, input: &GenerationInput<'_>) -> Result<String, GenerationError> {
        let scratch = input.scratch;
        scratch.create()?;
        write_schema(&scratch.generator_schema, CHART_CODE_SCHEMA)?;

        let prompt = self.prompts.render_generator(&GeneratorPrompt {
            query: input.query,
            schema: input.schema,
            feedback: input.feedback,
            out_path: input.out_path,
        })?;
        fs::write(&scratch.generator_prompt, &prompt)
            .with_context(|| format!("write {}", scratch.generator_prompt.display()))?;

        let request = InferenceRequest {
            stage: InferenceStage::Generate,
            workdir: scratch.dir.clone(),
            prompt,
            output_schema_path: scratch.generator_schema.clone(),
            output_path: scratch.generator_output.clone(),
            log_path: scratch.generator_log.clone(),
            images: Vec::new(),
            timeout: input.timeout,
            output_limit_bytes: self.output_limit_bytes,
        };
        let response: ChartCode = infer_json(&self.backend, &request, &CHART_CODE_SCHEMA_JSON)?;
        debug!(bytes = response.code.len(), "received generator response");

        let code = extract_chart_code(&response.code)?;
        info!(lines = code.lines().count(), "generated chart code");
        Ok(code)
    }
}
