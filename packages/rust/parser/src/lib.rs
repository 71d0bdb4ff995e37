//! Hierarchical document parsing for regindex.
//!
//! [`StructureParser`] flattens `DIV1`..`DIV9` markup into pre-order
//! [`StructuralNode`](regindex_shared::StructuralNode)s with per-node word
//! counts and paths. [`linkage::link`] then resolves parent references in a
//! separate pass.

pub mod linkage;
pub mod structure;
pub mod text;

pub use linkage::{link, parent_path, resolve_parents};
pub use structure::{ParseResult, StructureParser, hierarchy_level, parse_document};
pub use text::{count_words, normalize_text};
