//! Append-only log of chart candidates produced during one run.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::rubric::RubricResult;

/// Deterministic image path for the candidate at `index`.
pub fn chart_path(charts_dir: &Path, index: usize) -> PathBuf {
    charts_dir.join(format!("chart_v{index}.png"))
}

/// One generate-execute-evaluate iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateArtifact {
    /// 0-based position within the run.
    pub index: usize,
    /// Extracted chart code; empty when generation was malformed.
    pub code: String,
    /// Where the execution engine was told to save the chart.
    pub image_path: PathBuf,
    /// Set once the cycle is scored; `None` only mid-cycle.
    pub rubric: Option<RubricResult>,
}

impl CandidateArtifact {
    pub fn new(index: usize, code: String, image_path: PathBuf) -> Self {
        Self {
            index,
            code,
            image_path,
            rubric: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("candidate index {got} out of sequence (expected {expected})")]
    OutOfSequence { expected: usize, got: usize },
    #[error("previous candidate {0} has no rubric yet")]
    Incomplete(usize),
    #[error("no candidate to score")]
    Empty,
    #[error("candidate {0} already scored")]
    AlreadyScored(usize),
}

/// Ordered, append-only candidate log keyed by sequence index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateStore {
    candidates: Vec<CandidateArtifact>,
}

impl CandidateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next appended candidate must carry.
    pub fn next_index(&self) -> usize {
        self.candidates.len()
    }

    pub fn append(&mut self, artifact: CandidateArtifact) -> Result<(), StoreError> {
        let expected = self.next_index();
        if artifact.index != expected {
            return Err(StoreError::OutOfSequence {
                expected,
                got: artifact.index,
            });
        }
        if let Some(prev) = self.candidates.last()
            && prev.rubric.is_none()
        {
            return Err(StoreError::Incomplete(prev.index));
        }
        self.candidates.push(artifact);
        Ok(())
    }

    /// Attach the rubric to the latest candidate. Each candidate is scored once.
    pub fn score_latest(&mut self, rubric: RubricResult) -> Result<(), StoreError> {
        let latest = self.candidates.last_mut().ok_or(StoreError::Empty)?;
        if latest.rubric.is_some() {
            return Err(StoreError::AlreadyScored(latest.index));
        }
        latest.rubric = Some(rubric);
        Ok(())
    }

    pub fn latest(&self) -> Option<&CandidateArtifact> {
        self.candidates.last()
    }

    pub fn all(&self) -> &[CandidateArtifact] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Feedback from every scored candidate, oldest first.
    pub fn feedback_history(&self) -> Vec<String> {
        self.candidates
            .iter()
            .filter_map(|candidate| candidate.rubric.as_ref())
            .map(RubricResult::generator_feedback)
            .collect()
    }

    pub fn into_inner(self) -> Vec<CandidateArtifact> {
        self.candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(index: usize) -> CandidateArtifact {
        CandidateArtifact::new(
            index,
            "print('hi')".to_string(),
            chart_path(Path::new("charts"), index),
        )
    }

    #[test]
    fn chart_paths_follow_sequence_index() {
        assert_eq!(
            chart_path(Path::new("charts"), 0),
            PathBuf::from("charts/chart_v0.png")
        );
        assert_eq!(
            chart_path(Path::new("out/run-1"), 12),
            PathBuf::from("out/run-1/chart_v12.png")
        );
    }

    #[test]
    fn append_requires_next_index() {
        let mut store = CandidateStore::new();
        assert_eq!(
            store.append(candidate(1)),
            Err(StoreError::OutOfSequence {
                expected: 0,
                got: 1
            })
        );
        store.append(candidate(0)).expect("append");
        assert_eq!(store.latest().map(|c| c.index), Some(0));
    }

    #[test]
    fn append_requires_previous_candidate_scored() {
        let mut store = CandidateStore::new();
        store.append(candidate(0)).expect("append");
        assert_eq!(store.append(candidate(1)), Err(StoreError::Incomplete(0)));

        store
            .score_latest(RubricResult::execution_failure("boom"))
            .expect("score");
        store.append(candidate(1)).expect("append");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn score_latest_only_once() {
        let mut store = CandidateStore::new();
        assert_eq!(
            store.score_latest(RubricResult::execution_failure("boom")),
            Err(StoreError::Empty)
        );
        store.append(candidate(0)).expect("append");
        store
            .score_latest(RubricResult::execution_failure("boom"))
            .expect("score");
        assert_eq!(
            store.score_latest(RubricResult::execution_failure("again")),
            Err(StoreError::AlreadyScored(0))
        );
    }

    #[test]
    fn feedback_history_is_ordered() {
        let mut store = CandidateStore::new();
        store.append(candidate(0)).expect("append");
        store
            .score_latest(RubricResult::execution_failure("division by zero"))
            .expect("score");
        store.append(candidate(1)).expect("append");
        store
            .score_latest(RubricResult::Evaluation {
                criteria: Default::default(),
                feedback: "wrong chart type".to_string(),
            })
            .expect("score");

        assert_eq!(
            store.feedback_history(),
            vec![
                "Chart generation failed. Error: division by zero".to_string(),
                "wrong chart type".to_string(),
            ]
        );
    }
}
