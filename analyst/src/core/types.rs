//! Shared deterministic types for analyst core logic.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use serde::{Deserialize, Serialize};

use crate::core::rubric::{RubricResult, WARNING_PREFIX};

/// Classification of one sandboxed execution of candidate code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Ran to completion without warnings.
    Clean,
    /// Ran to completion; every captured warning message, in emission order.
    Warning { messages: Vec<String> },
    /// Raised (or could not be run); the error text.
    Error { message: String },
}

impl ExecutionOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// `Warning detected: a; b` for warning outcomes.
    pub fn warning_feedback(&self) -> Option<String> {
        match self {
            Self::Warning { messages } => {
                Some(format!("{WARNING_PREFIX} {}", messages.join("; ")))
            }
            _ => None,
        }
    }

    /// Failure rubric for error outcomes; successes are scored by the evaluator.
    pub fn failure_rubric(&self) -> Option<RubricResult> {
        match self {
            Self::Error { message } => Some(RubricResult::execution_failure(message.clone())),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Warning { .. } => "warning",
            Self::Error { .. } => "error",
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The latest candidate passed every criterion.
    Accepted,
    /// The retry budget ran out; the latest candidate is delivered as best effort.
    BudgetExhausted,
    /// The run's wall-clock budget ran out after at least one candidate was scored.
    DeadlineReached,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rubric::EXECUTION_FAILED_FEEDBACK;

    #[test]
    fn warning_feedback_joins_all_messages() {
        let outcome = ExecutionOutcome::Warning {
            messages: vec![
                "FigureCanvasAgg is non-interactive".to_string(),
                "Glyph 9 missing".to_string(),
            ],
        };
        assert_eq!(
            outcome.warning_feedback().as_deref(),
            Some("Warning detected: FigureCanvasAgg is non-interactive; Glyph 9 missing")
        );
        assert!(outcome.failure_rubric().is_none());
    }

    #[test]
    fn error_outcome_maps_to_fixed_feedback() {
        let outcome = ExecutionOutcome::Error {
            message: "division by zero".to_string(),
        };
        let rubric = outcome.failure_rubric().expect("rubric");
        assert_eq!(rubric.error(), Some("division by zero"));
        assert_eq!(rubric.feedback(), EXECUTION_FAILED_FEEDBACK);
        assert!(outcome.warning_feedback().is_none());
    }

    #[test]
    fn termination_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Termination::BudgetExhausted).expect("json"),
            "\"budget_exhausted\""
        );
        assert_eq!(
            serde_json::to_string(&Termination::DeadlineReached).expect("json"),
            "\"deadline_reached\""
        );
    }
}
