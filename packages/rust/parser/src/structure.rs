//! Flattening of `DIV1`..`DIV9` hierarchy markup into structural nodes.
//!
//! Hierarchy elements are recognized by tag name alone: `DIV` followed by a
//! single digit giving the nesting level. Each carries `TYPE`, `N`, and an
//! optional `NODE` attribute, and may contain a direct `HEAD` child holding
//! its heading. Every other descendant contributes body text, except nested
//! hierarchy elements, which become child nodes of their own.
//!
//! Nodes are emitted in pre-order. Parent links are not set here; see
//! [`crate::linkage`].

use std::collections::HashSet;
use std::sync::Arc;

use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use regindex_shared::{
    EventSink, NodeKind, RegIndexError, Result, StructuralNode, TracingSink, join_path,
};

use crate::text::{TextRun, count_words, normalize_text, resolve_entity};

const DIV_PREFIX: &[u8] = b"DIV";
const HEAD_TAG: &[u8] = b"HEAD";
const ATTR_TYPE: &[u8] = b"TYPE";
const ATTR_IDENTIFIER: &[u8] = b"N";
const ATTR_NODE: &[u8] = b"NODE";

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Flattened document: nodes in pre-order and the sum of their word counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseResult {
    pub nodes: Vec<StructuralNode>,
    pub total_words: usize,
}

/// Parser for one labelled document source.
///
/// The label only identifies the document in reported events.
#[derive(Clone)]
pub struct StructureParser {
    label: String,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for StructureParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructureParser")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl StructureParser {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            events: Arc::new(TracingSink),
        }
    }

    /// Report parse outcomes to `events` instead of `tracing`.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Flatten a document into structural nodes.
    ///
    /// Fails on malformed markup, on a document that ends inside an open
    /// element, and on two nodes sharing a path.
    #[tracing::instrument(skip_all, fields(document = %self.label, bytes = xml.len()))]
    pub fn parse(&self, xml: &str) -> Result<ParseResult> {
        match flatten(xml) {
            Ok(result) => {
                self.events
                    .document_parsed(&self.label, result.nodes.len(), result.total_words);
                Ok(result)
            }
            Err(e) => {
                self.events.document_failed(&self.label, &e);
                Err(e)
            }
        }
    }
}

/// Parse a document without reporting events.
pub fn parse_document(xml: &str) -> Result<ParseResult> {
    flatten(xml)
}

/// Nesting level encoded in a hierarchy tag name (`DIV1`..`DIV9`).
pub fn hierarchy_level(name: &[u8]) -> Option<u8> {
    match name.strip_prefix(DIV_PREFIX) {
        Some([digit @ b'1'..=b'9']) => Some(digit - b'0'),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Document walk
// ---------------------------------------------------------------------------

/// A hierarchy element and its descendants, pre-order, with their word total.
struct Subtree {
    nodes: Vec<StructuralNode>,
    words: usize,
}

/// What an element contributed to its enclosing hierarchy node.
#[derive(Default)]
struct Content {
    heading: Option<String>,
    fragments: Vec<String>,
    children: Vec<Subtree>,
}

fn flatten(xml: &str) -> Result<ParseResult> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().expand_empty_elements = true;

    let mut nodes = Vec::new();
    let mut total_words = 0;
    let mut open = 0usize;

    loop {
        match reader.read_event().map_err(|e| xml_error(&reader, e))? {
            Event::Start(start) => match hierarchy_level(start.local_name().as_ref()) {
                Some(level) => {
                    let subtree = read_hierarchy(&mut reader, &start, level, None)?;
                    total_words += subtree.words;
                    nodes.extend(subtree.nodes);
                }
                None => open += 1,
            },
            Event::End(_) => open = open.saturating_sub(1),
            Event::Eof => {
                if open > 0 {
                    return Err(RegIndexError::parse(format!(
                        "unexpected end of document with {open} element(s) still open"
                    )));
                }
                break;
            }
            _ => {}
        }
    }

    ensure_unique_paths(&nodes)?;
    Ok(ParseResult { nodes, total_words })
}

fn read_hierarchy(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
    level: u8,
    parent_path: Option<&str>,
) -> Result<Subtree> {
    let attrs = HierarchyAttributes::from_start(start, level)?;
    let path = join_path(parent_path, &attrs.identifier);

    let name = start.local_name();
    let content = read_content(reader, name.as_ref(), &path, true)?;

    let text = normalize_text(&content.fragments);
    let word_count = count_words(text.as_deref());

    let mut nodes = vec![StructuralNode {
        kind: attrs.kind,
        level,
        identifier: attrs.identifier,
        node_id: attrs.node_id,
        heading: content.heading,
        text,
        word_count,
        path,
        parent: None,
    }];
    let mut words = word_count;
    for child in content.children {
        words += child.words;
        nodes.extend(child.nodes);
    }

    Ok(Subtree { nodes, words })
}

/// Read everything up to the end tag of the element just opened.
///
/// `direct_heading` is set only for hierarchy elements: a `HEAD` directly
/// inside one is its heading, anywhere else it is ordinary body text.
fn read_content(
    reader: &mut Reader<&[u8]>,
    element: &[u8],
    owner_path: &str,
    direct_heading: bool,
) -> Result<Content> {
    let mut content = Content::default();
    let mut run = TextRun::default();

    loop {
        match reader.read_event().map_err(|e| xml_error(reader, e))? {
            Event::Start(start) => {
                run.flush();
                let name = start.local_name();
                let name = name.as_ref();
                if direct_heading && name == HEAD_TAG {
                    content.heading = read_heading(reader)?;
                } else if let Some(level) = hierarchy_level(name) {
                    let child = read_hierarchy(reader, &start, level, Some(owner_path))?;
                    content.children.push(child);
                } else {
                    let nested = read_content(reader, name, owner_path, false)?;
                    run.extend(nested.fragments);
                    content.children.extend(nested.children);
                }
            }
            Event::End(_) => break,
            Event::Text(text) => run.push(&String::from_utf8_lossy(text.as_ref())),
            Event::CData(cdata) => run.push(&String::from_utf8_lossy(cdata.as_ref())),
            Event::GeneralRef(reference) => run.push(&reference_text(reference.as_ref())),
            Event::Eof => return Err(unclosed(element)),
            _ => {}
        }
    }

    content.fragments = run.finish();
    Ok(content)
}

/// Collect the trimmed text of a heading element. Empty headings are absent.
fn read_heading(reader: &mut Reader<&[u8]>) -> Result<Option<String>> {
    let mut text = String::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event().map_err(|e| xml_error(reader, e))? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Event::Text(t) => text.push_str(&String::from_utf8_lossy(t.as_ref())),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(c.as_ref())),
            Event::GeneralRef(r) => text.push_str(&reference_text(r.as_ref())),
            Event::Eof => return Err(unclosed(HEAD_TAG)),
            _ => {}
        }
    }

    let trimmed = text.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

struct HierarchyAttributes {
    kind: NodeKind,
    identifier: String,
    node_id: Option<String>,
}

impl HierarchyAttributes {
    /// Read `TYPE`, `N`, and `NODE`. A missing `TYPE` falls back to the
    /// conventional kind for the level; a missing `N` leaves the identifier empty.
    /// Values containing an unknown entity reference are rejected.
    fn from_start(start: &BytesStart<'_>, level: u8) -> Result<Self> {
        let element = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut kind = None;
        let mut identifier = String::new();
        let mut node_id = None;

        for attr in start.attributes() {
            let attr = attr.map_err(|e| {
                RegIndexError::parse(format!("malformed attribute on <{element}>: {e}"))
            })?;
            let raw = String::from_utf8_lossy(attr.value.as_ref());
            let value = unescape(&raw)
                .map_err(|e| {
                    RegIndexError::parse(format!("bad attribute value on <{element}>: {e}"))
                })?
                .into_owned();
            match attr.key.as_ref() {
                ATTR_TYPE => kind = Some(NodeKind::from_attr(&value)),
                ATTR_IDENTIFIER => identifier = value.trim().to_string(),
                ATTR_NODE => node_id = Some(value),
                _ => {}
            }
        }

        let kind = kind
            .or_else(|| NodeKind::for_level(level))
            .unwrap_or_else(|| NodeKind::Other(String::new()));

        Ok(Self {
            kind,
            identifier,
            node_id,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn reference_text(name: &[u8]) -> String {
    let name = String::from_utf8_lossy(name);
    resolve_entity(&name).unwrap_or_else(|| format!("&{name};"))
}

fn ensure_unique_paths(nodes: &[StructuralNode]) -> Result<()> {
    let mut seen = HashSet::with_capacity(nodes.len());
    for node in nodes {
        if !seen.insert(node.path.as_str()) {
            return Err(RegIndexError::validation(format!(
                "duplicate structural path '{}'",
                node.path
            )));
        }
    }
    Ok(())
}

fn xml_error(reader: &Reader<&[u8]>, error: quick_xml::Error) -> RegIndexError {
    RegIndexError::parse(format!(
        "malformed markup near byte {}: {error}",
        reader.buffer_position()
    ))
}

fn unclosed(element: &[u8]) -> RegIndexError {
    RegIndexError::parse(format!(
        "unexpected end of document inside <{}>",
        String::from_utf8_lossy(element)
    ))
}
