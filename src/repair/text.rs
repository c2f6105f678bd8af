//! Textual repair: regex surgery for markup too damaged to parse.
//!
//! Works directly on the serialized text. Each placeholder match is widened
//! to whole runs (from the `<w:r>` that holds the opening delimiter to the
//! `</w:r>` of the run holding the closing one), stripped of tags and
//! replaced by one plain run. Element names are matched with the `w:` prefix
//! or without any prefix, the same vocabulary the structural pass accepts;
//! the replacement run takes the form of the run it starts in. A delimiter
//! that does not sit inside a run is left alone, since widening it would cut
//! through unrelated structure.
//!
//! Passes run in a fixed order: spell-check markers, simple tags, block tags,
//! empty runs. A block tag whose text contains `}}` is therefore split by the
//! simple pass first.

use super::scan::{strip_markup, TagKind};
use super::{Repair, Repaired, Strategy};
use crate::error::ParseError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;
use tracing::debug;

/// Spell and grammar check boundaries. Word drops these mid-word.
static RE_PROOF_ERR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:w:)?proofErr\b[^>]*/>").unwrap());

/// A run start tag. Must not match `<w:rPr>`.
static RE_RUN_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<(w:)?r(?:\s[^>]*)?>").unwrap());

static RE_RUN_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"</(?:w:)?r>").unwrap());

/// A run holding nothing but whitespace, run properties and empty text leaves.
static RE_EMPTY_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"<(?:w:)?r(?:\s[^>]*)?>\s*",
        r"(?:<(?:w:)?rPr(?:\s[^>/]*)?/>\s*|<(?:w:)?rPr(?:\s[^>]*)?>(?:\s|<[^/>][^>]*/>)*</(?:w:)?rPr>\s*)?",
        r"(?:(?:<(?:w:)?t(?:\s[^>]*)?/>|<(?:w:)?t(?:\s[^>]*)?></(?:w:)?t>)\s*)*",
        r"</(?:w:)?r>"
    ))
    .unwrap()
});

/// Repairs a member with text substitutions only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextualRepair;

impl TextualRepair {
    /// Infallible form of [`Repair::repair`].
    pub fn repair_text(&self, markup: &str) -> Repaired {
        let cleaned = RE_PROOF_ERR.replace_all(markup, "");

        let (after_simple, simple) = collapse_tag_regions(&cleaned, TagKind::Simple);
        let (after_block, block) = collapse_tag_regions(&after_simple, TagKind::Block);
        let out = RE_EMPTY_RUN.replace_all(&after_block, "").into_owned();

        debug!(
            "Textual repair rewrote {} simple and {} block regions",
            simple, block
        );

        Repaired {
            markup: out,
            strategy: Strategy::Textual,
            changes: simple + block,
        }
    }
}

impl Repair for TextualRepair {
    fn strategy(&self) -> Strategy {
        Strategy::Textual
    }

    fn repair(&self, markup: &str) -> Result<Repaired, ParseError> {
        Ok(self.repair_text(markup))
    }
}

// ── Region surgery ───────────────────────────────────────────────────────

/// One run start or end tag.
#[derive(Debug, Clone, Copy)]
struct RunTag {
    start: usize,
    end: usize,
    /// Written as `w:r` rather than `r`.
    prefixed: bool,
}

impl RunTag {
    fn prefix(&self) -> &'static str {
        if self.prefixed {
            "w:"
        } else {
            ""
        }
    }
}

/// Run boundaries in one version of the markup.
struct RunIndex {
    /// Run start tags, self-closing runs excluded.
    opens: Vec<RunTag>,
    closes: Vec<RunTag>,
}

impl RunIndex {
    fn new(markup: &str) -> Self {
        Self {
            opens: RE_RUN_OPEN
                .captures_iter(markup)
                .filter_map(|caps| {
                    let m = caps.get(0)?;
                    (!m.as_str().ends_with("/>")).then(|| RunTag {
                        start: m.start(),
                        end: m.end(),
                        prefixed: caps.get(1).is_some(),
                    })
                })
                .collect(),
            closes: RE_RUN_CLOSE
                .find_iter(markup)
                .map(|m| RunTag {
                    start: m.start(),
                    end: m.end(),
                    prefixed: m.as_str().starts_with("</w:"),
                })
                .collect(),
        }
    }

    /// The run enclosing `pos`, if `pos` is inside an open run.
    fn enclosing_open(&self, pos: usize) -> Option<RunTag> {
        let open = last_before(&self.opens, pos)?;
        match last_before(&self.closes, pos) {
            Some(close) if close.start > open.start => None,
            _ => Some(open),
        }
    }

    /// End offset of the first run end tag at or after `pos`.
    fn closing_end(&self, pos: usize) -> Option<usize> {
        let i = self.closes.partition_point(|c| c.start < pos);
        self.closes.get(i).map(|c| c.end)
    }
}

fn last_before(tags: &[RunTag], pos: usize) -> Option<RunTag> {
    let i = tags.partition_point(|t| t.start < pos);
    i.checked_sub(1).map(|i| tags[i])
}

/// A stretch of whole runs to replace, with the prefix its first run uses.
struct Region {
    span: Range<usize>,
    prefix: &'static str,
}

/// Replace every run region holding a `kind` tag with a single plain run.
/// Returns the new markup and the number of regions rewritten.
fn collapse_tag_regions(markup: &str, kind: TagKind) -> (String, usize) {
    let index = RunIndex::new(markup);
    let mut regions: Vec<Region> = Vec::new();

    for m in kind.pattern().find_iter(markup) {
        let Some(open) = index.enclosing_open(m.start()) else {
            continue;
        };
        // The closing delimiter must sit inside a run as well.
        if index.enclosing_open(m.end() - kind.close().len()).is_none() {
            continue;
        }
        let Some(end) = index.closing_end(m.end()) else {
            continue;
        };

        match regions.last_mut() {
            Some(last) if open.start < last.span.end => last.span.end = last.span.end.max(end),
            _ => regions.push(Region {
                span: open.start..end,
                prefix: open.prefix(),
            }),
        }
    }

    if regions.is_empty() {
        return (markup.to_string(), 0);
    }

    let mut out = String::with_capacity(markup.len());
    let mut cursor = 0;
    for Region { span, prefix: p } in &regions {
        out.push_str(&markup[cursor..span.start]);
        out.push_str(&format!(r#"<{p}r><{p}t xml:space="preserve">"#));
        out.push_str(&strip_markup(&markup[span.clone()]));
        out.push_str(&format!("</{p}t></{p}r>"));
        cursor = span.end;
    }
    out.push_str(&markup[cursor..]);
    (out, regions.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repair(markup: &str) -> Repaired {
        TextualRepair.repair_text(markup)
    }

    #[test]
    fn split_simple_tag_becomes_one_run() {
        let out = repair(r#"<w:r><w:t>{{ total</w:t></w:r><w:r><w:t>_price }}</w:t></w:r>"#);
        assert_eq!(
            out.markup,
            r#"<w:r><w:t xml:space="preserve">{{ total_price }}</w:t></w:r>"#
        );
        assert_eq!(out.changes, 1);
        assert_eq!(out.strategy, Strategy::Textual);
    }

    #[test]
    fn run_properties_and_proof_markers_are_stripped() {
        let out = repair(
            r#"<w:p><w:r w:rsidR="00AB"><w:rPr><w:b/></w:rPr><w:t>{{ cus</w:t></w:r><w:proofErr w:type="spellStart"/><w:r><w:t>tomer }}</w:t></w:r><w:proofErr w:type="spellEnd"/></w:p>"#,
        );
        assert_eq!(
            out.markup,
            r#"<w:p><w:r><w:t xml:space="preserve">{{ customer }}</w:t></w:r></w:p>"#
        );
    }

    #[test]
    fn surrounding_run_text_is_kept() {
        let out = repair(
            r#"<w:r><w:t xml:space="preserve">Dear {{ </w:t></w:r><w:r><w:t>name }},</w:t></w:r><w:r><w:t>bye</w:t></w:r>"#,
        );
        assert_eq!(
            out.markup,
            r#"<w:r><w:t xml:space="preserve">Dear {{ name }},</w:t></w:r><w:r><w:t>bye</w:t></w:r>"#
        );
    }

    #[test]
    fn overlapping_regions_merge() {
        let out = repair(
            r#"<w:r><w:t>{{ a }} and {{</w:t></w:r><w:r><w:t> b }}</w:t></w:r>"#,
        );
        assert_eq!(out.changes, 1);
        assert_eq!(
            out.markup,
            r#"<w:r><w:t xml:space="preserve">{{ a }} and {{ b }}</w:t></w:r>"#
        );
    }

    #[test]
    fn block_tags_are_repaired() {
        let out = repair(
            r#"<w:r><w:t>{% if </w:t></w:r><w:r><w:rPr><w:i/></w:rPr><w:t>show %}</w:t></w:r>"#,
        );
        assert_eq!(
            out.markup,
            r#"<w:r><w:t xml:space="preserve">{% if show %}</w:t></w:r>"#
        );
    }

    #[test]
    fn delimiter_outside_a_run_is_left_alone() {
        let input = "<w:p>{{ stray }}</w:p><w:r><w:t>x</w:t></w:r>";
        let out = repair(input);
        assert_eq!(out.markup, input);
        assert_eq!(out.changes, 0);
    }

    #[test]
    fn run_properties_tag_is_not_a_run() {
        // `<w:rPr>` after a closed run must not count as an enclosing run.
        let input = "<w:r><w:t>a</w:t></w:r><w:rPr>{{ x }}</w:rPr>";
        assert_eq!(repair(input).markup, input);
    }

    #[test]
    fn empty_runs_are_removed_but_content_runs_kept() {
        let out = repair(concat!(
            "<w:r> </w:r>",
            "<w:r><w:rPr><w:b/><w:sz w:val=\"24\"/></w:rPr><w:t></w:t></w:r>",
            "<w:r><w:t/></w:r>",
            "<w:r><w:br/></w:r>",
            r#"<w:r><w:t xml:space="preserve"> </w:t></w:r>"#,
        ));
        assert_eq!(
            out.markup,
            r#"<w:r><w:br/></w:r><w:r><w:t xml:space="preserve"> </w:t></w:r>"#
        );
    }

    #[test]
    fn cleaned_region_has_no_markup_characters() {
        let out = repair(r#"<w:r><w:t>{{ a</w:t></w:r><w:r><w:t>&lt;b }}</w:t></w:r>"#);
        let inner = out
            .markup
            .strip_prefix(r#"<w:r><w:t xml:space="preserve">"#)
            .and_then(|s| s.strip_suffix("</w:t></w:r>"))
            .unwrap();
        assert!(!inner.contains(['<', '>']));
        assert_eq!(inner, "{{ a&lt;b }}");
    }

    #[test]
    fn unprefixed_runs_are_repaired() {
        let out = repair("<r><t>{{ total</t></r><r><t>_price }}</t></r>");
        assert_eq!(
            out.markup,
            r#"<r><t xml:space="preserve">{{ total_price }}</t></r>"#
        );
        assert_eq!(out.changes, 1);
    }

    #[test]
    fn replacement_run_follows_the_first_run_form() {
        let out = repair(concat!(
            "<p><r><rPr><b/></rPr><t>{{ a</t></r><proofErr/><r><t> }}</t></r></p>",
            "<w:p><w:r><w:t>{% if </w:t></w:r><w:r><w:t>b %}</w:t></w:r></w:p>",
        ));
        assert_eq!(
            out.markup,
            concat!(
                r#"<p><r><t xml:space="preserve">{{ a }}</t></r></p>"#,
                r#"<w:p><w:r><w:t xml:space="preserve">{% if b %}</w:t></w:r></w:p>"#,
            )
        );
        assert_eq!(out.changes, 2);
    }

    #[test]
    fn drawing_runs_are_not_runs() {
        let input = "<a:r><a:t>{{ x</a:t></a:r><a:r><a:t> }}</a:t></a:r>";
        assert_eq!(repair(input).markup, input);
    }

    #[test]
    fn clean_placeholders_are_left_byte_identical() {
        for input in [
            r#"<w:p><w:r><w:t xml:space="preserve">Total: {{ total_price }}</w:t></w:r></w:p>"#,
            r#"<p><r><t xml:space="preserve">{% if vat %}</t></r></p>"#,
            r#"<w:r><w:t xml:space="preserve">{{ a &lt; b }}</w:t></w:r><w:r><w:t>plain</w:t></w:r>"#,
        ] {
            assert_eq!(repair(input).markup, input);
        }
    }

    #[test]
    fn second_repair_changes_nothing() {
        for input in [
            r#"<w:p><w:r w:rsidR="00AB"><w:rPr><w:b/></w:rPr><w:t>{{ cus</w:t></w:r><w:proofErr w:type="spellStart"/><w:r><w:t>tomer }}</w:t></w:r><w:r> </w:r></w:p>"#,
            "<r><t>{{ total</t></r><r><t>_price }}</t></r>",
            r#"<w:r><w:t>{% if </w:t></w:r><w:r><w:t>show %}{{ a</w:t></w:r><w:r><w:t> }}</w:t></w:r>"#,
        ] {
            let once = repair(input).markup;
            let twice = repair(&once).markup;
            assert_eq!(twice, once);
        }
    }

    #[test]
    fn never_fails() {
        assert!(TextualRepair.repair("<<<{{").is_ok());
        assert!(TextualRepair.repair("").is_ok());
    }
}
