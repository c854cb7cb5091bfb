//! Deterministic, pure logic shared by the analyst loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod candidate;
pub mod extract;
pub mod machine;
pub mod request;
pub mod rubric;
pub mod types;
