//! Core domain types for structured regulatory documents.

use serde::{Deserialize, Serialize};

/// Separator between identifiers in a structural path (e.g. `1/3/A/1`).
pub const PATH_SEPARATOR: char = '/';

// ---------------------------------------------------------------------------
// NodeKind
// ---------------------------------------------------------------------------

/// Categorical tag of a hierarchy element, taken from its `TYPE` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    Title,
    Subtitle,
    Chapter,
    Subchapter,
    Part,
    Subpart,
    SubjectGroup,
    Section,
    Appendix,
    /// Any `TYPE` value outside the nine known kinds, kept verbatim.
    Other(String),
}

impl NodeKind {
    /// Conventional kind for a nesting level (`DIV1` is a title, `DIV8` a section).
    pub fn for_level(level: u8) -> Option<Self> {
        let kind = match level {
            1 => Self::Title,
            2 => Self::Subtitle,
            3 => Self::Chapter,
            4 => Self::Subchapter,
            5 => Self::Part,
            6 => Self::Subpart,
            7 => Self::SubjectGroup,
            8 => Self::Section,
            9 => Self::Appendix,
            _ => return None,
        };
        Some(kind)
    }

    /// Parse a `TYPE` attribute value (case-insensitive).
    pub fn from_attr(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "TITLE" => Self::Title,
            "SUBTITLE" => Self::Subtitle,
            "CHAPTER" => Self::Chapter,
            "SUBCHAP" => Self::Subchapter,
            "PART" => Self::Part,
            "SUBPART" => Self::Subpart,
            "SUBJGRP" => Self::SubjectGroup,
            "SECTION" => Self::Section,
            "APPENDIX" => Self::Appendix,
            _ => Self::Other(value.trim().to_string()),
        }
    }

    /// Wire name as stored and as it appears in the source markup.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Title => "TITLE",
            Self::Subtitle => "SUBTITLE",
            Self::Chapter => "CHAPTER",
            Self::Subchapter => "SUBCHAP",
            Self::Part => "PART",
            Self::Subpart => "SUBPART",
            Self::SubjectGroup => "SUBJGRP",
            Self::Section => "SECTION",
            Self::Appendix => "APPENDIX",
            Self::Other(raw) => raw,
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for NodeKind {
    fn from(value: String) -> Self {
        Self::from_attr(&value)
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        kind.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
// StructuralNode
// ---------------------------------------------------------------------------

/// One flattened hierarchy element of a parsed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralNode {
    /// Categorical tag (`TYPE` attribute).
    pub kind: NodeKind,
    /// Nesting level 1-9 implied by the element tag.
    pub level: u8,
    /// Local label (`N` attribute); unique among siblings only.
    pub identifier: String,
    /// Opaque source identifier (`NODE` attribute).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Heading text, excluded from body text and word count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    /// Whitespace-collapsed body text of all non-heading descendants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Whitespace-delimited tokens in `text`.
    pub word_count: usize,
    /// Ancestor identifiers joined by [`PATH_SEPARATOR`], root to leaf.
    pub path: String,
    /// Index of the parent within the same flattened list, set by linkage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
}

impl StructuralNode {
    /// Whether this node sits at the top of its document.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Append an identifier to a parent path. `None` marks a document-level node,
/// whose path is the identifier itself. An empty parent path still gets a
/// separator.
pub fn join_path(parent: Option<&str>, identifier: &str) -> String {
    match parent {
        Some(parent) => format!("{parent}{PATH_SEPARATOR}{identifier}"),
        None => identifier.to_string(),
    }
}

/// Path with its last segment removed, or `None` for a root path.
pub fn parent_path(path: &str) -> Option<&str> {
    path.rfind(PATH_SEPARATOR).map(|idx| &path[..idx])
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// A bulk title document as stored by the import driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleRecord {
    /// Title number (e.g. `12` for `title-12.xml`).
    pub number: u32,
    /// SHA-256 of the stored XML content.
    pub content_hash: String,
    /// Size of the stored XML content in bytes.
    pub size_bytes: u64,
    /// When the content was last imported (RFC 3339).
    pub imported_at: String,
}

/// A dated snapshot of a title, imported from a bulk directory for that date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleVersionRecord {
    pub title_number: u32,
    /// Snapshot date (`YYYY-MM-DD`).
    pub version_date: String,
    pub content_hash: String,
    pub size_bytes: u64,
    pub imported_at: String,
}

/// A persisted structural node with its storage-assigned identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureRecord {
    /// Storage key (UUID v7).
    pub id: String,
    /// Owning title.
    pub title_number: u32,
    /// Position in the pre-order flattening.
    pub ordinal: u32,
    /// The parsed node (its `parent` index is not persisted).
    #[serde(flatten)]
    pub node: StructuralNode,
    /// Storage key of the parent structure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Row creation time (RFC 3339).
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Computed values
// ---------------------------------------------------------------------------

/// Word and section totals for one title.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleMetrics {
    pub title_number: u32,
    pub word_count: usize,
    pub node_count: usize,
    pub section_count: usize,
}

impl TitleMetrics {
    /// Tally metrics for a flattened document.
    pub fn from_nodes(title_number: u32, nodes: &[StructuralNode]) -> Self {
        Self {
            title_number,
            word_count: nodes.iter().map(|n| n.word_count).sum(),
            node_count: nodes.len(),
            section_count: nodes
                .iter()
                .filter(|n| n.kind == NodeKind::Section)
                .count(),
        }
    }
}

/// Totals across every processed title.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalMetrics {
    pub titles: usize,
    pub word_count: usize,
    pub section_count: usize,
}

/// Word and section movement of one title between two dated versions.
///
/// Deltas are `end - start`. Percentages are relative to the start version
/// and are `0.0` when the start total is zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleChange {
    pub title_number: u32,
    pub start_date: String,
    pub end_date: String,
    pub word_count_change: i64,
    pub section_count_change: i64,
    pub total_words_start: usize,
    pub total_words_end: usize,
    pub total_sections_start: usize,
    pub total_sections_end: usize,
    pub percent_word_change: f64,
    pub percent_section_change: f64,
}

impl TitleChange {
    /// Compare the tallies of two versions of the same title.
    pub fn between(
        start_date: impl Into<String>,
        start: &TitleMetrics,
        end_date: impl Into<String>,
        end: &TitleMetrics,
    ) -> Self {
        let word_count_change = signed(end.word_count) - signed(start.word_count);
        let section_count_change = signed(end.section_count) - signed(start.section_count);

        Self {
            title_number: start.title_number,
            start_date: start_date.into(),
            end_date: end_date.into(),
            word_count_change,
            section_count_change,
            total_words_start: start.word_count,
            total_words_end: end.word_count,
            total_sections_start: start.section_count,
            total_sections_end: end.section_count,
            percent_word_change: percent(word_count_change, start.word_count),
            percent_section_change: percent(section_count_change, start.section_count),
        }
    }
}

fn signed(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn percent(change: i64, base: usize) -> f64 {
    if base == 0 {
        0.0
    } else {
        change as f64 / base as f64 * 100.0
    }
}

/// Keys under which computed values are stored.
pub mod computed_keys {
    /// Prefix shared by all per-title metric keys.
    pub const TITLE_METRICS_PREFIX: &str = "title-metrics-";

    /// Aggregate metrics over all titles.
    pub fn global_title_metrics() -> String {
        "global-title-metrics".to_string()
    }

    /// Metrics for a single title.
    pub fn title_metrics(title_number: u32) -> String {
        format!("{TITLE_METRICS_PREFIX}{title_number}")
    }

    /// Per-title changes between two version dates (`YYYY-MM-DD`).
    pub fn title_changes(start_date: &str, end_date: &str) -> String {
        format!("title-changes__{start_date}__{end_date}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kind: NodeKind, words: usize, path: &str) -> StructuralNode {
        StructuralNode {
            kind,
            level: 8,
            identifier: path.rsplit('/').next().unwrap_or_default().to_string(),
            node_id: None,
            heading: None,
            text: None,
            word_count: words,
            path: path.into(),
            parent: None,
        }
    }

    #[test]
    fn node_kind_from_attr() {
        assert_eq!(NodeKind::from_attr("SUBJGRP"), NodeKind::SubjectGroup);
        assert_eq!(NodeKind::from_attr("section"), NodeKind::Section);
        assert_eq!(
            NodeKind::from_attr("ANNEX"),
            NodeKind::Other("ANNEX".into())
        );
        assert_eq!(NodeKind::Subchapter.as_str(), "SUBCHAP");
    }

    #[test]
    fn node_kind_for_level() {
        assert_eq!(NodeKind::for_level(1), Some(NodeKind::Title));
        assert_eq!(NodeKind::for_level(8), Some(NodeKind::Section));
        assert_eq!(NodeKind::for_level(0), None);
        assert_eq!(NodeKind::for_level(10), None);
    }

    #[test]
    fn node_kind_serializes_as_wire_name() {
        let json = serde_json::to_string(&NodeKind::SubjectGroup).expect("serialize");
        assert_eq!(json, "\"SUBJGRP\"");
        let parsed: NodeKind = serde_json::from_str("\"APPENDIX\"").expect("deserialize");
        assert_eq!(parsed, NodeKind::Appendix);
    }

    #[test]
    fn path_helpers() {
        assert_eq!(join_path(None, "1"), "1");
        assert_eq!(join_path(Some("1/3"), "A"), "1/3/A");
        assert_eq!(join_path(Some(""), "A"), "/A");
        assert_eq!(parent_path("/A"), Some(""));
        assert_eq!(parent_path("1/3/A/1"), Some("1/3/A"));
        assert_eq!(parent_path("1"), None);
    }

    #[test]
    fn title_change_deltas_and_percentages() {
        let start = TitleMetrics {
            title_number: 7,
            word_count: 200,
            node_count: 10,
            section_count: 4,
        };
        let end = TitleMetrics {
            title_number: 7,
            word_count: 150,
            node_count: 12,
            section_count: 5,
        };

        let change = TitleChange::between("2024-01-01", &start, "2025-01-01", &end);
        assert_eq!(change.title_number, 7);
        assert_eq!(change.word_count_change, -50);
        assert_eq!(change.section_count_change, 1);
        assert_eq!(change.percent_word_change, -25.0);
        assert_eq!(change.percent_section_change, 25.0);

        let empty = TitleMetrics {
            title_number: 7,
            ..TitleMetrics::default()
        };
        let change = TitleChange::between("2024-01-01", &empty, "2025-01-01", &end);
        assert_eq!(change.word_count_change, 150);
        assert_eq!(change.percent_word_change, 0.0);
        assert_eq!(
            computed_keys::title_changes("2024-01-01", "2025-01-01"),
            "title-changes__2024-01-01__2025-01-01"
        );
    }

    #[test]
    fn title_metrics_tally() {
        let nodes = vec![
            node(NodeKind::Part, 2, "1"),
            node(NodeKind::Section, 10, "1/1.1"),
            node(NodeKind::Section, 5, "1/1.2"),
        ];
        let metrics = TitleMetrics::from_nodes(7, &nodes);
        assert_eq!(metrics.word_count, 17);
        assert_eq!(metrics.node_count, 3);
        assert_eq!(metrics.section_count, 2);
    }

    #[test]
    fn computed_keys_format() {
        assert_eq!(computed_keys::title_metrics(12), "title-metrics-12");
        assert_eq!(computed_keys::global_title_metrics(), "global-title-metrics");
    }
}
