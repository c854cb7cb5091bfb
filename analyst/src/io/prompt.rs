//! Prompt rendering for the generator and evaluator.

use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::request::Schema;
use crate::core::rubric::NO_FEEDBACK_SENTINEL;

const GENERATOR_TEMPLATE: &str = include_str!("prompts/generator.md");
const EVALUATOR_TEMPLATE: &str = include_str!("prompts/evaluator.md");

/// Inputs for one code-generation prompt.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorPrompt<'a> {
    pub query: &'a str,
    pub schema: &'a Schema,
    /// Feedback from every prior rubric, oldest first.
    pub feedback: &'a [String],
    pub out_path: &'a Path,
}

/// Inputs for one evaluation prompt.
#[derive(Debug, Clone, Copy)]
pub struct EvaluatorPrompt<'a> {
    pub query: &'a str,
    pub schema: &'a Schema,
    pub code: &'a str,
    pub warning: Option<&'a str>,
    pub has_image: bool,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("generator", GENERATOR_TEMPLATE)
            .context("load generator template")?;
        env.add_template("evaluator", EVALUATOR_TEMPLATE)
            .context("load evaluator template")?;
        Ok(Self { env })
    }

    pub fn render_generator(&self, input: &GeneratorPrompt<'_>) -> Result<String> {
        let template = self.env.get_template("generator")?;
        let rendered = template
            .render(context! {
                query => input.query.trim(),
                schema => input.schema.to_string(),
                feedback => input.feedback,
                no_feedback => NO_FEEDBACK_SENTINEL,
                out_path => input.out_path.display().to_string(),
            })
            .context("render generator prompt")?;
        Ok(rendered)
    }

    pub fn render_evaluator(&self, input: &EvaluatorPrompt<'_>) -> Result<String> {
        let template = self.env.get_template("evaluator")?;
        let rendered = template
            .render(context! {
                query => input.query.trim(),
                schema => input.schema.to_string(),
                code => input.code.trim(),
                warning => input.warning.map(str::trim).filter(|s| !s.is_empty()),
                has_image => input.has_image,
            })
            .context("render evaluator prompt")?;
        Ok(rendered)
    }
}
