//! Bounded-concurrency task orchestration.
//!
//! This crate provides:
//! - [`Runner`]: runs a worker over many items with a concurrency ceiling
//! - [`Progress`]: the handle workers use to emit progress messages
//! - [`RunResult`]: the aggregate of successes and failures of one run

pub mod runner;

pub use regindex_shared::RunnerConfig;
pub use runner::{Progress, RunResult, Runner};
