//! Inference-backed stages of the loop: code generation and evaluation.

pub mod evaluator;
pub mod generator;
