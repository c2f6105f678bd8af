//! Structural repair: parse the member into a tree and collapse every
//! paragraph that carries a placeholder into a single plain-text run.
//!
//! ## Tree model
//!
//! The parse keeps the exact source slice of every start tag, end tag, text
//! node and piece of auxiliary markup (declarations, comments, PIs, CDATA).
//! Serialization writes those slices back unchanged, so anything the repair
//! does not touch round-trips byte for byte: namespace prefixes, attribute
//! order and quoting included. Only the collapsed paragraphs are re-emitted.
//!
//! ## Paragraph granularity
//!
//! The repair does not try to find the exact runs a placeholder straddles.
//! Any paragraph whose flattened text contains `{{` or `{%` loses its run
//! level formatting and becomes `<w:r><w:t xml:space="preserve">…</w:t></w:r>`.
//! Placeholder paragraphs are template scaffolding, so formatting loss there
//! is acceptable while content loss is not: the new text leaf holds the
//! paragraph's flattened text exactly, whitespace included. Paragraph
//! properties (`w:pPr`) are kept.

use super::scan::has_opening_delimiter;
use super::{Repair, Repaired, Strategy};
use crate::error::ParseError;
use quick_xml::escape::{partial_escape, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use tracing::debug;

/// WordprocessingML main namespace.
pub const WML_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

/// Repairs a member by rebuilding its paragraph trees.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralRepair;

impl Repair for StructuralRepair {
    fn strategy(&self) -> Strategy {
        Strategy::Structural
    }

    fn repair(&self, markup: &str) -> Result<Repaired, ParseError> {
        let nodes = parse(markup)?;
        let mut collapsed = 0;
        let nodes = repair_nodes(nodes, &mut collapsed);

        let mut out = String::with_capacity(markup.len());
        serialize(&nodes, &mut out);
        debug!("Structural repair collapsed {} paragraphs", collapsed);

        Ok(Repaired {
            markup: out,
            strategy: Strategy::Structural,
            changes: collapsed,
        })
    }
}

/// Flattened text of every paragraph in `markup`, in document order.
///
/// Nested paragraphs are listed after their enclosing paragraph; an
/// enclosing paragraph's text excludes theirs.
pub fn paragraph_texts(markup: &str) -> Result<Vec<String>, ParseError> {
    let nodes = parse(markup)?;
    let mut texts = Vec::new();
    collect_paragraph_texts(&nodes, &mut texts);
    Ok(texts)
}

// ── Tree ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Paragraph,
    ParagraphProperties,
    TextLeaf,
    Other,
}

#[derive(Debug, Clone)]
enum Node {
    Element(Element),
    /// Character data: source slice and its unescaped value.
    Text { raw: String, value: String },
    /// `<![CDATA[…]]>` as written in the source.
    CData(String),
    /// Comments, declarations, processing instructions, doctype.
    Verbatim(String),
}

#[derive(Debug, Clone)]
struct Element {
    /// Qualified name, e.g. `w:p`.
    name: String,
    role: Role,
    /// Source slice of the start tag (or the whole self-closing tag).
    open: String,
    /// Source slice of the end tag; `None` for self-closing elements.
    close: Option<String>,
    children: Vec<Node>,
}

impl Element {
    /// Namespace prefix including the colon, or empty for unprefixed names.
    fn prefix(&self) -> &str {
        match self.name.find(':') {
            Some(i) => &self.name[..=i],
            None => "",
        }
    }
}

/// Where an element name resolved to, reduced to what the repair needs.
enum Scope {
    /// WordprocessingML, or no namespace at all.
    Vocabulary,
    /// Some other declared namespace (DrawingML, charts, …).
    Foreign,
    /// A prefix with no `xmlns:` declaration in scope.
    Undeclared(String),
}

impl Scope {
    fn resolve(ns: ResolveResult<'_>) -> Self {
        match ns {
            ResolveResult::Bound(Namespace(uri)) if uri == WML_NS.as_bytes() => Scope::Vocabulary,
            ResolveResult::Bound(_) => Scope::Foreign,
            ResolveResult::Unbound => Scope::Vocabulary,
            ResolveResult::Unknown(prefix) => {
                Scope::Undeclared(String::from_utf8_lossy(&prefix).into_owned())
            }
        }
    }

    fn role_of(&self, local: &[u8]) -> Role {
        if !matches!(self, Scope::Vocabulary) {
            return Role::Other;
        }
        match local {
            b"p" => Role::Paragraph,
            b"pPr" => Role::ParagraphProperties,
            b"t" => Role::TextLeaf,
            _ => Role::Other,
        }
    }
}

// ── Parse ────────────────────────────────────────────────────────────────

fn parse(markup: &str) -> Result<Vec<Node>, ParseError> {
    let mut reader = NsReader::from_str(markup);
    let mut stack: Vec<Element> = Vec::new();
    let mut top: Vec<Node> = Vec::new();
    let mut roots = 0usize;

    loop {
        let before = reader.buffer_position() as usize;
        let (ns, event) = reader.read_resolved_event()?;
        let scope = Scope::resolve(ns);
        let after = reader.buffer_position() as usize;
        let raw = markup.get(before..after).ok_or_else(|| {
            ParseError::new(format!("event at byte {before} does not end on a character boundary"))
        })?;

        let node = match event {
            Event::Start(e) => {
                stack.push(open_element(&scope, &e, raw)?);
                continue;
            }
            Event::Empty(e) => Node::Element(open_element(&scope, &e, raw)?),
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let mut element = stack
                    .pop()
                    .ok_or_else(|| ParseError::new(format!("unexpected closing tag </{name}>")))?;
                if element.name != name {
                    return Err(ParseError::new(format!(
                        "expected </{}>, found </{}>",
                        element.name, name
                    )));
                }
                element.close = Some(raw.to_string());
                Node::Element(element)
            }
            Event::Text(_) => {
                let value = unescape(raw)
                    .map_err(|e| ParseError::new(e.to_string()))?
                    .into_owned();
                if stack.is_empty() && !value.trim().is_empty() {
                    return Err(ParseError::new("text outside the root element"));
                }
                Node::Text {
                    raw: raw.to_string(),
                    value,
                }
            }
            Event::CData(_) => Node::CData(raw.to_string()),
            Event::Eof => break,
            _ => Node::Verbatim(raw.to_string()),
        };

        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => {
                if matches!(node, Node::Element(_)) {
                    roots += 1;
                    if roots > 1 {
                        return Err(ParseError::new("more than one root element"));
                    }
                }
                top.push(node);
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::new(format!(
            "element <{}> is never closed",
            open.name
        )));
    }
    if roots == 0 {
        return Err(ParseError::new("no root element"));
    }
    Ok(top)
}

fn open_element(scope: &Scope, start: &BytesStart<'_>, raw: &str) -> Result<Element, ParseError> {
    if let Scope::Undeclared(prefix) = scope {
        return Err(ParseError::new(format!(
            "undeclared namespace prefix '{prefix}'"
        )));
    }
    Ok(Element {
        name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        role: scope.role_of(start.local_name().as_ref()),
        open: raw.to_string(),
        close: None,
        children: Vec::new(),
    })
}

// ── Repair ───────────────────────────────────────────────────────────────

fn repair_nodes(nodes: Vec<Node>, collapsed: &mut usize) -> Vec<Node> {
    nodes
        .into_iter()
        .map(|node| match node {
            Node::Element(element) => Node::Element(repair_element(element, collapsed)),
            other => other,
        })
        .collect()
}

/// Rebuild `element` bottom-up: children first, then the element itself.
fn repair_element(element: Element, collapsed: &mut usize) -> Element {
    let Element {
        name,
        role,
        open,
        close,
        children,
    } = element;
    let children = repair_nodes(children, collapsed);
    let rebuilt = Element {
        name,
        role,
        open,
        close,
        children,
    };

    if rebuilt.role != Role::Paragraph || contains_paragraph(&rebuilt.children) {
        return rebuilt;
    }

    let mut text = String::new();
    flatten_into(&rebuilt.children, false, &mut text);
    if !has_opening_delimiter(&text) {
        return rebuilt;
    }

    *collapsed += 1;
    collapse(rebuilt, &text)
}

/// Replace every child except the first `pPr` with one run holding `text`.
fn collapse(paragraph: Element, text: &str) -> Element {
    let p = paragraph.prefix().to_string();
    let properties = paragraph.children.into_iter().find(|node| {
        matches!(node, Node::Element(child) if child.role == Role::ParagraphProperties)
    });

    let mut children: Vec<Node> = properties.into_iter().collect();
    children.push(Node::Verbatim(format!(
        "<{p}r><{p}t xml:space=\"preserve\">{}</{p}t></{p}r>",
        partial_escape(text)
    )));

    // Self-closing paragraphs have no text and are never collapsed.
    let close = paragraph
        .close
        .unwrap_or_else(|| format!("</{}>", paragraph.name));

    Element {
        name: paragraph.name,
        role: Role::Paragraph,
        open: paragraph.open,
        close: Some(close),
        children,
    }
}

fn contains_paragraph(nodes: &[Node]) -> bool {
    nodes.iter().any(|node| match node {
        Node::Element(e) => e.role == Role::Paragraph || contains_paragraph(&e.children),
        _ => false,
    })
}

/// Append the text-leaf content under `nodes` to `out`, skipping nested
/// paragraphs.
fn flatten_into(nodes: &[Node], in_leaf: bool, out: &mut String) {
    for node in nodes {
        match node {
            Node::Element(e) if e.role == Role::Paragraph => {}
            Node::Element(e) => flatten_into(&e.children, in_leaf || e.role == Role::TextLeaf, out),
            Node::Text { value, .. } if in_leaf => out.push_str(value),
            Node::CData(raw) if in_leaf => out.push_str(cdata_inner(raw)),
            _ => {}
        }
    }
}

fn cdata_inner(raw: &str) -> &str {
    raw.strip_prefix("<![CDATA[")
        .and_then(|s| s.strip_suffix("]]>"))
        .unwrap_or(raw)
}

fn collect_paragraph_texts(nodes: &[Node], texts: &mut Vec<String>) {
    for node in nodes {
        if let Node::Element(e) = node {
            if e.role == Role::Paragraph {
                let mut text = String::new();
                flatten_into(&e.children, false, &mut text);
                texts.push(text);
            }
            collect_paragraph_texts(&e.children, texts);
        }
    }
}

// ── Serialize ────────────────────────────────────────────────────────────

fn serialize(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Element(e) => {
                out.push_str(&e.open);
                serialize(&e.children, out);
                if let Some(close) = &e.close {
                    out.push_str(close);
                }
            }
            Node::Text { raw, .. } => out.push_str(raw),
            Node::CData(raw) | Node::Verbatim(raw) => out.push_str(raw),
        }
    }
}
