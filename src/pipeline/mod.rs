//! Pipeline stages for offer rendering.
//!
//! Each submodule implements one step. The three steps that shell out to
//! external software sit behind traits ([`TemplateExpander`],
//! [`DocumentConverter`], [`Rasterizer`]) so tests can run the whole
//! pipeline with in-process fakes.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ repair ──▶ expand ──▶ pdf ──▶ render/encode ──▶ package
//! (folder)  (DOCX)    (engine)  (soffice) (pdfium → JPEG)   (JPEG | zip)
//! ```
//!
//! 1. [`input`]  : validate the template name, pick the main document,
//!    read the optional `template.json` manifest
//! 2. repair     : [`crate::repair::repair_archive`] into the workspace
//! 3. [`context`] / [`expand`]: build the expansion context and hand it to
//!    the template engine
//! 4. [`pdf`]    : office document → PDF under a timeout
//! 5. [`render`] / [`encode`]: rasterise every page; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 6. [`package`]: first page inline, or every page zipped

pub mod context;
pub mod encode;
pub mod expand;
pub mod input;
pub mod package;
pub mod pdf;
pub mod render;

pub use context::{ExpansionContext, InlineImage, ProductContext};
pub use expand::{CommandExpander, TemplateExpander};
pub use input::{resolve_template, ResolvedTemplate, TemplateManifest};
pub use pdf::{DocumentConverter, SofficeConverter};
pub use render::{PdfiumRasterizer, Rasterizer};

use serde::Serialize;
use std::fmt;

/// Where a render request is in the pipeline.
///
/// Stages are entered in declaration order. A failure while entering a stage
/// ends the request; see [`crate::error::RenderError::stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    TemplateResolved,
    Repaired,
    Expanded,
    PdfReady,
    ImagesReady,
    Packaged,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Idle => "idle",
            Stage::TemplateResolved => "template resolved",
            Stage::Repaired => "repaired",
            Stage::Expanded => "expanded",
            Stage::PdfReady => "pdf ready",
            Stage::ImagesReady => "images ready",
            Stage::Packaged => "packaged",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        assert!(Stage::Idle < Stage::TemplateResolved);
        assert!(Stage::PdfReady < Stage::ImagesReady);
        assert!(Stage::ImagesReady < Stage::Packaged);
    }

    #[test]
    fn display() {
        assert_eq!(Stage::PdfReady.to_string(), "pdf ready");
    }
}
