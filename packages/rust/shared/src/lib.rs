//! Shared types, error model, configuration, and event sink for regindex.
//!
//! This crate is the foundation depended on by all other regindex crates.
//! It provides:
//! - [`RegIndexError`]: the unified error type
//! - Domain types ([`StructuralNode`], [`NodeKind`], [`TitleRecord`], metrics)
//! - Configuration ([`AppConfig`], [`RunnerConfig`], config loading)
//! - The [`EventSink`] observer used by the runner, parser, and drivers

pub mod config;
pub mod error;
pub mod events;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, RunnerConfig, RunnerSettings, config_dir, config_file_path,
    expand_home, init_config, load_config, load_config_from, validate_config,
};
pub use error::{RegIndexError, Result};
pub use events::{EventSink, SilentSink, TracingSink};
pub use types::{
    GlobalMetrics, NodeKind, PATH_SEPARATOR, StructuralNode, StructureRecord, TitleChange,
    TitleMetrics, TitleRecord, TitleVersionRecord, computed_keys, join_path, parent_path,
};
