//! Stable exit codes for analyst CLI commands.

/// Command succeeded. A run that exhausts its budget still succeeds.
pub const OK: i32 = 0;
/// Invalid input, config, or any other error.
pub const INVALID: i32 = 1;
/// The inference backend was unreachable or answered with an invalid structure.
pub const INFERENCE_FAILED: i32 = 2;
