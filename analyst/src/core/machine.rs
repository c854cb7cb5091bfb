//! Loop controller state machine.
//!
//! ```text
//! GENERATE -> EXECUTE -> EVALUATE -> DECIDE -> GENERATE (retry)
//!                                          \-> TERMINATED
//! ```
//!
//! Transitions are pure: the controller performs the stage work, then asks
//! [`transition`] where to go next.

use std::fmt;

use thiserror::Error;

use crate::core::rubric::RubricResult;
use crate::core::types::Termination;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Generate,
    Execute,
    Evaluate,
    Decide,
    Terminated(Termination),
}

impl LoopState {
    pub fn initial() -> Self {
        Self::Generate
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Execute => "execute",
            Self::Evaluate => "evaluate",
            Self::Decide => "decide",
            Self::Terminated(_) => "terminated",
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the `DECIDE` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry,
    Terminate(Termination),
}

/// Retry iff budget remains and the latest rubric has an error or any failing criterion.
pub fn decide(remaining_budget: u32, latest: &RubricResult) -> Decision {
    if latest.is_accepted() {
        return Decision::Terminate(Termination::Accepted);
    }
    if remaining_budget > 0 {
        Decision::Retry
    } else {
        Decision::Terminate(Termination::BudgetExhausted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot decide without a rubric for the latest candidate")]
    MissingRubric,
}

/// Next state after the work of `state` has been done.
///
/// `latest` is the rubric of the most recent candidate, consulted only by `DECIDE`.
/// `TERMINATED` is absorbing.
pub fn transition(
    state: LoopState,
    remaining_budget: u32,
    latest: Option<&RubricResult>,
) -> Result<LoopState, TransitionError> {
    let next = match state {
        LoopState::Generate => LoopState::Execute,
        LoopState::Execute => LoopState::Evaluate,
        LoopState::Evaluate => LoopState::Decide,
        LoopState::Decide => {
            let rubric = latest.ok_or(TransitionError::MissingRubric)?;
            match decide(remaining_budget, rubric) {
                Decision::Retry => LoopState::Generate,
                Decision::Terminate(reason) => LoopState::Terminated(reason),
            }
        }
        LoopState::Terminated(reason) => LoopState::Terminated(reason),
    };
    Ok(next)
}
