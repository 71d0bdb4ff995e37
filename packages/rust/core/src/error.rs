//! Per-title failures reported by the batch drivers.

use regindex_shared::RegIndexError;

/// A failure while processing one title. Drivers collect these instead of
/// aborting the batch.
#[derive(Debug, thiserror::Error)]
#[error("title {title}: {source}")]
pub struct TitleError {
    /// Title number the failure belongs to.
    pub title: u32,
    /// Underlying cause.
    #[source]
    pub source: RegIndexError,
}

impl TitleError {
    pub fn new(title: u32, source: RegIndexError) -> Self {
        Self { title, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_title_and_cause() {
        let err = TitleError::new(12, RegIndexError::parse("unexpected end of document"));
        assert_eq!(
            err.to_string(),
            "title 12: parse error: unexpected end of document"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
