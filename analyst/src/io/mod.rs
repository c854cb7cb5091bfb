//! I/O helpers: config, datasets, subprocesses, and the on-disk charts layout.

pub mod charts;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod process;
pub mod prompt;
pub mod review_image;
pub mod sandbox;
