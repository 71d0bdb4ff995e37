//! Batch drivers for regindex.
//!
//! This crate ties the runner, parser, and storage together into the batch
//! workflows: importing bulk title files ([`import`]) and dated snapshots
//! ([`versions`]), flattening stored titles into structures ([`structure`]),
//! maintaining computed metrics ([`metrics`]), and comparing two dated
//! versions ([`changes`]). Every driver isolates per-title failures and
//! reports them as [`TitleError`]s alongside the successes.

pub mod changes;
pub mod error;
pub mod import;
pub mod metrics;
pub mod structure;
pub mod versions;

use std::collections::BTreeSet;

pub use error::TitleError;

/// Selection of title numbers a driver should touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleFilter {
    only: Option<BTreeSet<u32>>,
}

impl TitleFilter {
    /// Select every title.
    pub fn all() -> Self {
        Self::default()
    }

    /// Select only the listed titles. An empty list selects every title.
    pub fn from_list(titles: &[u32]) -> Self {
        if titles.is_empty() {
            return Self::all();
        }
        Self {
            only: Some(titles.iter().copied().collect()),
        }
    }

    pub fn matches(&self, title: u32) -> bool {
        self.only.as_ref().is_none_or(|set| set.contains(&title))
    }
}
