//! Evaluator: scores a rendered candidate against the fixed rubric.
//!
//! The evaluator only reports the seven judgments and feedback; whether the
//! candidate is accepted is decided by the loop controller.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::request::Schema;
use crate::core::rubric::{Criteria, RubricResult};
use crate::io::charts::ScratchPaths;
use crate::io::config::EvaluatorConfig;
use crate::io::inference::{
    Inference, InferenceFailure, InferenceRequest, InferenceStage, infer_json, write_schema,
};
use crate::io::prompt::{EvaluatorPrompt, PromptEngine};
use crate::io::review_image::write_review_image;

const EVALUATION_SCHEMA: &str = include_str!("../../schemas/evaluation.schema.json");

static EVALUATION_SCHEMA_JSON: LazyLock<Value> = LazyLock::new(|| {
    serde_json::from_str(EVALUATION_SCHEMA).expect("evaluation schema is valid json")
});

#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    pub query: &'a str,
    pub schema: &'a Schema,
    pub code: &'a str,
    pub image_path: &'a Path,
    /// `Warning detected: ...` feedback from execution, if any.
    pub warning: Option<&'a str>,
    pub scratch: &'a ScratchPaths,
    pub timeout: Duration,
}

/// Scores one successfully executed candidate.
///
/// Inference problems surface as an [`InferenceFailure`] inside the error chain.
pub trait Evaluator {
    fn evaluate(&self, input: &EvaluationInput<'_>) -> Result<RubricResult>;
}

impl<T: Evaluator + ?Sized> Evaluator for &T {
    fn evaluate(&self, input: &EvaluationInput<'_>) -> Result<RubricResult> {
        (**self).evaluate(input)
    }
}

#[derive(Debug, Deserialize)]
struct Judgment {
    #[serde(flatten)]
    criteria: Criteria,
    feedback: String,
}

/// Evaluator backed by a structured-inference backend with optional image input.
pub struct ChartEvaluator<I> {
    backend: I,
    prompts: PromptEngine,
    config: EvaluatorConfig,
    output_limit_bytes: usize,
}

impl<I: Inference> ChartEvaluator<I> {
    pub fn new(backend: I, config: EvaluatorConfig, output_limit_bytes: usize) -> Result<Self> {
        Ok(Self {
            backend,
            prompts: PromptEngine::new()?,
            config,
            output_limit_bytes,
        })
    }

    fn attach_image(&self, input: &EvaluationInput<'_>) -> Result<Vec<PathBuf>> {
        if !self.config.attach_image {
            return Ok(Vec::new());
        }
        let dest = &input.scratch.review_image;
        write_review_image(
            input.image_path,
            dest,
            self.config.image_max_edge,
            self.config.jpeg_quality,
        )?;
        Ok(vec![dest.clone()])
    }
}

impl<I: Inference> Evaluator for ChartEvaluator<I> {
    #[instrument(skip_all, fields(image = %input.image_path.display(), warning = input.warning.is_some()))]
    fn evaluate(&self, input: &EvaluationInput<'_>) -> Result<RubricResult> {
        let scratch = input.scratch;
        scratch.create()?;
        write_schema(&scratch.evaluator_schema, EVALUATION_SCHEMA)?;
        let images = self.attach_image(input)?;

        let prompt = self.prompts.render_evaluator(&EvaluatorPrompt {
            query: input.query,
            schema: input.schema,
            code: input.code,
            warning: input.warning,
            has_image: !images.is_empty(),
        })?;
        fs::write(&scratch.evaluator_prompt, &prompt)
            .with_context(|| format!("write {}", scratch.evaluator_prompt.display()))?;

        let request = InferenceRequest {
            stage: InferenceStage::Evaluate,
            workdir: scratch.dir.clone(),
            prompt,
            output_schema_path: scratch.evaluator_schema.clone(),
            output_path: scratch.evaluator_output.clone(),
            log_path: scratch.evaluator_log.clone(),
            images,
            timeout: input.timeout,
            output_limit_bytes: self.output_limit_bytes,
        };
        let judgment: Judgment = infer_json(&self.backend, &request, &EVALUATION_SCHEMA_JSON)?;

        let feedback = judgment.feedback.trim();
        if feedback.is_empty() {
            warn!("evaluator returned blank feedback");
            let failure = InferenceFailure::new(InferenceStage::Evaluate, "evaluator feedback is empty");
            return Err(failure.into());
        }
        let feedback = match input.warning.map(str::trim).filter(|w| !w.is_empty()) {
            Some(warning) => format!("{warning} {feedback}"),
            None => feedback.to_string(),
        };

        info!(
            passing = judgment.criteria.passing(),
            failing = ?judgment.criteria.failing(),
            "candidate evaluated"
        );
        Ok(RubricResult::Evaluation {
            criteria: judgment.criteria,
            feedback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedInference, evaluation_json};
    use image::{Rgb, RgbImage};

    struct Fixture {
        _temp: tempfile::TempDir,
        scratch: ScratchPaths,
        image: PathBuf,
        schema: Schema,
    }

    fn fixture() -> Fixture {
        let temp = tempfile::tempdir().expect("tempdir");
        let image = temp.path().join("chart_v0.png");
        RgbImage::from_pixel(1200, 800, Rgb([250, 250, 250]))
            .save(&image)
            .expect("save");
        Fixture {
            scratch: ScratchPaths::new(temp.path(), 0),
            image,
            schema: [("category", "object"), ("count", "int64")]
                .into_iter()
                .collect(),
            _temp: temp,
        }
    }

    fn input<'a>(fx: &'a Fixture, warning: Option<&'a str>) -> EvaluationInput<'a> {
        EvaluationInput {
            query: "bar chart of counts",
            schema: &fx.schema,
            code: "plt.bar(df['category'], df['count'])",
            image_path: &fx.image,
            warning,
            scratch: &fx.scratch,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn returns_typed_rubric_and_attaches_review_image() {
        let fx = fixture();
        let backend = ScriptedInference::new(vec![evaluation_json(6, "Add a legend.")]);
        let evaluator =
            ChartEvaluator::new(&backend, EvaluatorConfig::default(), 1000).expect("evaluator");

        let rubric = evaluator.evaluate(&input(&fx, None)).expect("evaluate");

        assert_eq!(rubric.passing(), 6);
        assert_eq!(rubric.feedback(), "Add a legend.");
        assert!(!rubric.is_accepted());
        let images = backend.images();
        assert_eq!(images, vec![vec![fx.scratch.review_image.clone()]]);
        let review = image::open(&fx.scratch.review_image).expect("review image");
        assert_eq!(review.width(), 512);
        assert!((341..=342).contains(&review.height()));
    }

    #[test]
    fn warning_is_prefixed_to_feedback() {
        let fx = fixture();
        let backend = ScriptedInference::new(vec![evaluation_json(7, "Looks good.")]);
        let evaluator =
            ChartEvaluator::new(&backend, EvaluatorConfig::default(), 1000).expect("evaluator");

        let rubric = evaluator
            .evaluate(&input(&fx, Some("Warning detected: glyph missing")))
            .expect("evaluate");

        assert_eq!(rubric.feedback(), "Warning detected: glyph missing Looks good.");
        assert!(rubric.is_accepted());
        assert!(backend.prompts()[0].contains("glyph missing"));
    }

    #[test]
    fn same_response_gives_same_rubric() {
        let fx = fixture();
        let backend = ScriptedInference::new(vec![
            evaluation_json(5, "Fix the title."),
            evaluation_json(5, "Fix the title."),
        ]);
        let evaluator =
            ChartEvaluator::new(&backend, EvaluatorConfig::default(), 1000).expect("evaluator");

        let first = evaluator.evaluate(&input(&fx, None)).expect("first");
        let second = evaluator.evaluate(&input(&fx, None)).expect("second");

        assert_eq!(first, second);
    }

    #[test]
    fn image_can_be_disabled() {
        let fx = fixture();
        let backend = ScriptedInference::new(vec![evaluation_json(7, "Fine.")]);
        let config = EvaluatorConfig {
            attach_image: false,
            ..EvaluatorConfig::default()
        };
        let evaluator = ChartEvaluator::new(&backend, config, 1000).expect("evaluator");

        evaluator.evaluate(&input(&fx, None)).expect("evaluate");

        assert_eq!(backend.images(), vec![Vec::<PathBuf>::new()]);
        assert!(!fx.scratch.review_image.exists());
        assert!(backend.prompts()[0].contains("No image is attached"));
    }

    #[test]
    fn blank_feedback_is_inference_failure() {
        let fx = fixture();
        let backend = ScriptedInference::new(vec![evaluation_json(7, "   ")]);
        let evaluator =
            ChartEvaluator::new(&backend, EvaluatorConfig::default(), 1000).expect("evaluator");

        let err = evaluator.evaluate(&input(&fx, None)).unwrap_err();

        let failure = err.downcast_ref::<InferenceFailure>().expect("inference failure");
        assert_eq!(failure.stage, InferenceStage::Evaluate);
    }

    #[test]
    fn missing_criterion_is_inference_failure() {
        let fx = fixture();
        let backend = ScriptedInference::new(vec![serde_json::json!({
            "relevance": true,
            "feedback": "partial"
        })]);
        let evaluator =
            ChartEvaluator::new(&backend, EvaluatorConfig::default(), 1000).expect("evaluator");

        let err = evaluator.evaluate(&input(&fx, None)).unwrap_err();

        assert!(err.downcast_ref::<InferenceFailure>().is_some());
    }
}
