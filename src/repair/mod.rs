//! Template-tag repair.
//!
//! Word serializes a placeholder like `{{ customer_name }}` as whatever runs
//! the author's keystrokes happened to produce, so the delimiters often end
//! up in different `<w:r>` elements with formatting, spell-check markers or
//! revision ids in between. A template engine reading that XML sees a broken
//! tag.
//!
//! ## Strategies
//!
//! ```text
//! member XML
//!  │
//!  ├─ StructuralRepair  parse → collapse placeholder paragraphs → serialize
//!  │       │ ParseError
//!  │       ▼
//!  └─ TextualRepair     regex surgery on the raw text (never fails)
//! ```
//!
//! [`repair_markup`] applies that policy. Both strategies implement
//! [`Repair`], which keeps them interchangeable in tests.

pub mod archive;
pub mod scan;
pub mod text;
pub mod tree;

pub use archive::{
    analyze_archive, analyze_archive_bytes, find_documents, fixed_output_path, repair_archive,
    repair_archive_bytes, ArchiveAnalysis, ArchiveReport, MemberOutcome, MemberReport, MemberScan,
    FIXED_SUFFIX, MAIN_MEMBER,
};
pub use scan::{scan, ScanReport, TagKind, TagSpan};
pub use text::TextualRepair;
pub use tree::{paragraph_texts, StructuralRepair};

use crate::error::ParseError;
use serde::Serialize;
use tracing::debug;

/// Which strategy produced a [`Repaired`] result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Structural,
    Textual,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Strategy::Structural => "structural",
            Strategy::Textual => "textual",
        })
    }
}

/// Output of one repair pass over one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repaired {
    pub markup: String,
    pub strategy: Strategy,
    /// Paragraphs collapsed (structural) or regions rewritten (textual).
    pub changes: usize,
}

/// A way of turning damaged markup into markup with contiguous tags.
pub trait Repair {
    fn strategy(&self) -> Strategy;

    fn repair(&self, markup: &str) -> Result<Repaired, ParseError>;
}

/// Repair `markup` structurally, falling back to textual surgery when the
/// markup does not parse.
pub fn repair_markup(markup: &str) -> Repaired {
    match StructuralRepair.repair(markup) {
        Ok(repaired) => repaired,
        Err(e) => {
            debug!(
                "{} repair failed ({}), using {} fallback",
                StructuralRepair.strategy(),
                e,
                TextualRepair.strategy()
            );
            TextualRepair.repair_text(markup)
        }
    }
}
