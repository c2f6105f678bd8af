//! Tag scanner: locate `{{ … }}` and `{% … %}` spans in raw markup.
//!
//! The scanner works on the serialized XML text, not on a parsed tree, so it
//! sees exactly what the template expander will see: a placeholder whose
//! delimiters were split across runs shows up as a span with `<w:…>` tags
//! embedded in it. Such spans are flagged *contaminated*.
//!
//! Matching is non-greedy and crosses line breaks. The first closing
//! delimiter ends a span, so a placeholder whose data legitimately contains
//! `}}` is cut short; nested same-kind delimiters are not supported.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

pub(crate) static RE_SIMPLE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{\{.*?\}\}").unwrap());

pub(crate) static RE_BLOCK_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{%.*?%\}").unwrap());

/// Any structural markup tag.
pub(crate) static RE_MARKUP_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Which delimiter pair bounds a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TagKind {
    /// `{{ expression }}`
    Simple,
    /// `{% statement %}`
    Block,
}

impl TagKind {
    pub fn open(self) -> &'static str {
        match self {
            TagKind::Simple => "{{",
            TagKind::Block => "{%",
        }
    }

    pub fn close(self) -> &'static str {
        match self {
            TagKind::Simple => "}}",
            TagKind::Block => "%}",
        }
    }

    pub(crate) fn pattern(self) -> &'static Regex {
        match self {
            TagKind::Simple => &RE_SIMPLE_TAG,
            TagKind::Block => &RE_BLOCK_TAG,
        }
    }
}

/// One placeholder candidate found in the markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagSpan {
    pub kind: TagKind,
    /// Byte offset of the opening delimiter.
    pub start: usize,
    /// Byte offset just past the closing delimiter.
    pub end: usize,
    /// The span as it appears in the markup, delimiters included.
    pub raw: String,
    /// `raw` with every structural tag removed.
    pub cleaned: String,
    /// Whether `raw` contains structural markup.
    pub contaminated: bool,
}

/// Result of [`scan`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub simple: Vec<TagSpan>,
    pub block: Vec<TagSpan>,
    /// Raw occurrences of `{{`, `}}`, `{%`, `%}` in that order.
    pub delimiter_counts: [usize; 4],
}

impl ScanReport {
    /// Total spans of both kinds.
    pub fn len(&self) -> usize {
        self.simple.len() + self.block.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spans of both kinds that contain embedded markup.
    pub fn contaminated_count(&self) -> usize {
        self.spans().filter(|s| s.contaminated).count()
    }

    /// Every span, simple tags first.
    pub fn spans(&self) -> impl Iterator<Item = &TagSpan> {
        self.simple.iter().chain(self.block.iter())
    }

    /// `true` when opening and closing delimiters occur equally often.
    pub fn is_balanced(&self) -> bool {
        let [open_s, close_s, open_b, close_b] = self.delimiter_counts;
        open_s == close_s && open_b == close_b
    }
}

/// Scan `markup` for simple and block tag spans.
pub fn scan(markup: &str) -> ScanReport {
    ScanReport {
        simple: find_spans(markup, TagKind::Simple),
        block: find_spans(markup, TagKind::Block),
        delimiter_counts: [
            markup.matches("{{").count(),
            markup.matches("}}").count(),
            markup.matches("{%").count(),
            markup.matches("%}").count(),
        ],
    }
}

fn find_spans(markup: &str, kind: TagKind) -> Vec<TagSpan> {
    kind.pattern()
        .find_iter(markup)
        .map(|m| {
            let raw = m.as_str();
            let contaminated = RE_MARKUP_TAG.is_match(raw);
            TagSpan {
                kind,
                start: m.start(),
                end: m.end(),
                raw: raw.to_string(),
                cleaned: strip_markup(raw),
                contaminated,
            }
        })
        .collect()
}

/// Remove structural tags from `fragment`, then neutralise any stray angle
/// bracket that was not part of a complete tag.
pub(crate) fn strip_markup(fragment: &str) -> String {
    let stripped = RE_MARKUP_TAG.replace_all(fragment, "");
    if stripped.contains(['<', '>']) {
        stripped.replace('<', "&lt;").replace('>', "&gt;")
    } else {
        stripped.into_owned()
    }
}

/// Whether `text` contains an opening delimiter of either kind.
pub fn has_opening_delimiter(text: &str) -> bool {
    [TagKind::Simple, TagKind::Block]
        .iter()
        .any(|kind| text.contains(kind.open()))
}
