//! Autonomous chart analyst.
//!
//! Turns a natural-language chart request plus a tabular dataset into a chart
//! image by looping generate, execute, evaluate until the chart passes a fixed
//! rubric or the retry budget runs out. The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (rubric, candidate store, state machine,
//!   code extraction). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, CSV loading, subprocesses,
//!   prompts, the Python sandbox).
//! - **[`agents`]**: The inference-backed generator and evaluator.
//!
//! [`run`] wires them into the loop controller.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
