//! Structured event sink injected into the runner, parser, and drivers.
//!
//! Core components report what happened through [`EventSink`] and never write
//! logs themselves. [`TracingSink`] forwards events to `tracing`;
//! [`SilentSink`] drops them.

use crate::error::RegIndexError;

/// Receiver of structured progress events. Every method defaults to a no-op.
pub trait EventSink: Send + Sync {
    /// A runner is about to dispatch `total` items.
    fn run_started(&self, _prefix: &str, _total: usize) {}
    /// A worker emitted a progress message.
    fn run_message(&self, _prefix: &str, _message: &str) {}
    /// One item's outcome was collected, successful or not.
    fn item_finished(&self, _prefix: &str, _succeeded: bool) {}
    /// A runner joined all workers and drained every stream.
    fn run_finished(&self, _prefix: &str, _succeeded: usize, _failed: usize) {}
    /// A document was flattened successfully.
    fn document_parsed(&self, _document: &str, _nodes: usize, _words: usize) {}
    /// A document could not be parsed.
    fn document_failed(&self, _document: &str, _error: &RegIndexError) {}
}

/// Default sink: emits each event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn run_started(&self, prefix: &str, total: usize) {
        tracing::info!(runner = prefix, total, "run started");
    }

    fn run_message(&self, prefix: &str, message: &str) {
        tracing::info!(runner = prefix, "{message}");
    }

    fn item_finished(&self, prefix: &str, succeeded: bool) {
        tracing::trace!(runner = prefix, succeeded, "item finished");
    }

    fn run_finished(&self, prefix: &str, succeeded: usize, failed: usize) {
        if failed > 0 {
            tracing::warn!(runner = prefix, succeeded, failed, "run completed with errors");
        } else {
            tracing::info!(runner = prefix, succeeded, "run completed");
        }
    }

    fn document_parsed(&self, document: &str, nodes: usize, words: usize) {
        tracing::debug!(document, nodes, words, "document parsed");
    }

    fn document_failed(&self, document: &str, error: &RegIndexError) {
        tracing::warn!(document, error = %error, "document parse failed");
    }
}

/// No-op sink for headless/test usage.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSink;

impl EventSink for SilentSink {}
