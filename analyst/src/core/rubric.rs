//! Rubric model: the fixed pass/fail criteria scoring one chart candidate.
//!
//! A [`RubricResult`] has exactly one producer per shape: the execution engine
//! records [`RubricResult::ExecutionFailure`] when candidate code could not be
//! run, the evaluator records [`RubricResult::Evaluation`] otherwise. Both
//! serialize to the same flat [`RubricRecord`] used by the output contract.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of boolean criteria in the rubric.
pub const CRITERIA_COUNT: usize = 7;

/// Feedback recorded for every candidate whose code raised during execution.
pub const EXECUTION_FAILED_FEEDBACK: &str = "Chart generation failed.";

/// Prefix of the feedback recorded when candidate code emitted runtime warnings.
pub const WARNING_PREFIX: &str = "Warning detected:";

/// Feedback handed to the generator before any candidate exists.
pub const NO_FEEDBACK_SENTINEL: &str = "No feedback yet. This is the first attempt.";

/// The seven independent judgments made by the evaluator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criteria {
    pub relevance: bool,
    pub correct_data_mapping: bool,
    pub appropriate_chart_type: bool,
    pub has_clear_title: bool,
    pub has_axis_labels: bool,
    pub has_legend_if_needed: bool,
    pub has_clarity: bool,
}

impl Criteria {
    /// Criterion names in rubric order.
    pub const NAMES: [&'static str; CRITERIA_COUNT] = [
        "relevance",
        "correct_data_mapping",
        "appropriate_chart_type",
        "has_clear_title",
        "has_axis_labels",
        "has_legend_if_needed",
        "has_clarity",
    ];

    pub fn all_passing() -> Self {
        Self::from_array([true; CRITERIA_COUNT])
    }

    pub fn from_array(values: [bool; CRITERIA_COUNT]) -> Self {
        let [
            relevance,
            correct_data_mapping,
            appropriate_chart_type,
            has_clear_title,
            has_axis_labels,
            has_legend_if_needed,
            has_clarity,
        ] = values;
        Self {
            relevance,
            correct_data_mapping,
            appropriate_chart_type,
            has_clear_title,
            has_axis_labels,
            has_legend_if_needed,
            has_clarity,
        }
    }

    pub fn as_array(&self) -> [bool; CRITERIA_COUNT] {
        [
            self.relevance,
            self.correct_data_mapping,
            self.appropriate_chart_type,
            self.has_clear_title,
            self.has_axis_labels,
            self.has_legend_if_needed,
            self.has_clarity,
        ]
    }

    /// Count of criteria judged `true`.
    pub fn passing(&self) -> usize {
        self.as_array().iter().filter(|passed| **passed).count()
    }

    /// Names of criteria judged `false`, in rubric order.
    pub fn failing(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .zip(self.as_array())
            .filter(|(_, passed)| !passed)
            .map(|(name, _)| *name)
            .collect()
    }
}

/// Score for one completed candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RubricRecord", try_from = "RubricRecord")]
pub enum RubricResult {
    /// Candidate code could not be produced or raised while running.
    ExecutionFailure { error: String, feedback: String },
    /// Candidate rendered and was judged by the evaluator.
    Evaluation { criteria: Criteria, feedback: String },
}

impl RubricResult {
    /// Failure rubric for code that raised; `error` is the exception text.
    pub fn execution_failure(error: impl Into<String>) -> Self {
        Self::ExecutionFailure {
            error: non_empty_or(error.into(), "unknown execution error"),
            feedback: EXECUTION_FAILED_FEEDBACK.to_string(),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::ExecutionFailure { error, .. } => Some(error),
            Self::Evaluation { .. } => None,
        }
    }

    pub fn feedback(&self) -> &str {
        match self {
            Self::ExecutionFailure { feedback, .. } | Self::Evaluation { feedback, .. } => feedback,
        }
    }

    pub fn criteria(&self) -> Option<&Criteria> {
        match self {
            Self::ExecutionFailure { .. } => None,
            Self::Evaluation { criteria, .. } => Some(criteria),
        }
    }

    /// Passing criteria count. Execution failures never pass anything.
    pub fn passing(&self) -> usize {
        self.criteria().map(Criteria::passing).unwrap_or(0)
    }

    /// True only for an evaluation with every criterion passing.
    pub fn is_accepted(&self) -> bool {
        self.error().is_none() && self.passing() == CRITERIA_COUNT
    }

    /// Feedback line handed to the next generation, with the error attached when present.
    pub fn generator_feedback(&self) -> String {
        match self {
            Self::ExecutionFailure { error, feedback } => format!("{feedback} Error: {error}"),
            Self::Evaluation { feedback, .. } => feedback.clone(),
        }
    }

    pub fn to_record(&self) -> RubricRecord {
        RubricRecord::from(self.clone())
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// Flat key-value form of a rubric, as returned to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RubricRecord {
    #[serde(default)]
    pub relevance: bool,
    #[serde(default)]
    pub correct_data_mapping: bool,
    #[serde(default)]
    pub appropriate_chart_type: bool,
    #[serde(default)]
    pub has_clear_title: bool,
    #[serde(default)]
    pub has_axis_labels: bool,
    #[serde(default)]
    pub has_legend_if_needed: bool,
    #[serde(default)]
    pub has_clarity: bool,
    pub feedback: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<RubricResult> for RubricRecord {
    fn from(result: RubricResult) -> Self {
        match result {
            RubricResult::ExecutionFailure { error, feedback } => Self {
                feedback,
                error: Some(error),
                ..Self::default()
            },
            RubricResult::Evaluation { criteria, feedback } => Self {
                relevance: criteria.relevance,
                correct_data_mapping: criteria.correct_data_mapping,
                appropriate_chart_type: criteria.appropriate_chart_type,
                has_clear_title: criteria.has_clear_title,
                has_axis_labels: criteria.has_axis_labels,
                has_legend_if_needed: criteria.has_legend_if_needed,
                has_clarity: criteria.has_clarity,
                feedback,
                error: None,
            },
        }
    }
}

/// Reasons a plain record cannot be read back as a typed rubric.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RubricRecordError {
    #[error("evaluation rubric must carry non-empty feedback")]
    MissingFeedback,
    #[error("execution failure rubric must not mark criteria as passing: {0:?}")]
    PassingCriteriaOnFailure(Vec<&'static str>),
}

impl TryFrom<RubricRecord> for RubricResult {
    type Error = RubricRecordError;

    fn try_from(record: RubricRecord) -> Result<Self, Self::Error> {
        let criteria = Criteria {
            relevance: record.relevance,
            correct_data_mapping: record.correct_data_mapping,
            appropriate_chart_type: record.appropriate_chart_type,
            has_clear_title: record.has_clear_title,
            has_axis_labels: record.has_axis_labels,
            has_legend_if_needed: record.has_legend_if_needed,
            has_clarity: record.has_clarity,
        };
        match record.error.filter(|error| !error.trim().is_empty()) {
            Some(error) => {
                if criteria.passing() > 0 {
                    let passing = Criteria::NAMES
                        .iter()
                        .zip(criteria.as_array())
                        .filter(|(_, passed)| *passed)
                        .map(|(name, _)| *name)
                        .collect();
                    return Err(RubricRecordError::PassingCriteriaOnFailure(passing));
                }
                Ok(Self::ExecutionFailure {
                    error,
                    feedback: record.feedback,
                })
            }
            None => {
                if record.feedback.trim().is_empty() {
                    return Err(RubricRecordError::MissingFeedback);
                }
                Ok(Self::Evaluation {
                    criteria,
                    feedback: record.feedback,
                })
            }
        }
    }
}
