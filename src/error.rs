//! Error types for the offer-render library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`ParseError`]: **Recoverable**: a document member is not well-formed
//!   XML. The repair policy consumes it to switch to the textual fallback; it
//!   never reaches a render caller.
//!
//! * [`ArchiveError`]: the DOCX container itself cannot be read, lacks its
//!   main member, or cannot be written back.
//!
//! * [`RenderError`]: **Fatal** for one render request: the template is
//!   missing, expansion failed, or an external tool timed out or crashed.
//!   Returned as `Err(RenderError)` from [`crate::render::Renderer::render`].
//!
//! None of these are retried inside the library. Retrying a render would
//! re-run a non-idempotent external process against a discarded workspace,
//! so that decision belongs to the caller.

use crate::pipeline::Stage;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Markup could not be parsed as a well-formed XML tree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("markup is not well-formed: {detail}")]
pub struct ParseError {
    pub detail: String,
}

impl ParseError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl From<quick_xml::Error> for ParseError {
    fn from(e: quick_xml::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Errors raised while reading or rewriting a DOCX container.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The container file could not be opened or read.
    #[error("Cannot read document '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The bytes are not a valid zip container.
    #[error("Not a valid DOCX container: {0}\nOpen and re-save the file in Word to rebuild it.")]
    InvalidContainer(#[from] zip::result::ZipError),

    /// A required member is absent from the container.
    #[error("Container has no '{name}' member; is this really a Word document?")]
    MissingMember { name: String },

    /// A required member exists but cannot be processed.
    #[error("Member '{name}' is unusable: {reason}")]
    InvalidMember { name: String, reason: String },

    /// The repaired container could not be written.
    #[error("Failed to write repaired document '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What a [`RenderError::NotFound`] was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    TemplateFolder,
    TemplateDocument,
    ProductFolder,
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Missing::TemplateFolder => "Template folder",
            Missing::TemplateDocument => "Template document",
            Missing::ProductFolder => "Product folder",
        })
    }
}

/// All fatal errors returned by the render pipeline.
#[derive(Debug, Error)]
pub enum RenderError {
    // ── Request errors ────────────────────────────────────────────────────
    /// A template or product directory, or a file inside it, is missing.
    #[error("{what} not found: '{path}'")]
    NotFound { what: Missing, path: PathBuf },

    /// The request is malformed (e.g. a template name with path separators).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Repair errors ─────────────────────────────────────────────────────
    /// The template container is unreadable. Only surfaced by the standalone
    /// repair entry points; the pipeline copies the original through instead.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    // ── External tool errors ──────────────────────────────────────────────
    /// The template expander rejected the template or the data.
    #[error("Template expansion failed: {detail}\n{hints}")]
    ExpansionFailed { detail: String, hints: String },

    /// The document converter binary could not be started.
    #[error(
        "Document converter '{program}' is not available: {detail}\n\
Install LibreOffice (apt-get install libreoffice / brew install libreoffice) \
or point CONVERTER_PROGRAM at an existing soffice binary."
    )]
    ConverterUnavailable { program: String, detail: String },

    /// The document converter did not finish within the timeout.
    #[error("Document conversion timed out after {secs}s; the converter process was abandoned")]
    ConversionTimeout { secs: u64 },

    /// The document converter exited with an error or produced no PDF.
    #[error("Document conversion failed: {detail}")]
    ConversionFailed { detail: String },

    /// A PDF page could not be rasterised or encoded.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterFailed { page: usize, detail: String },

    // ── Workspace errors ──────────────────────────────────────────────────
    /// Creating, writing or reading the per-request workspace failed.
    #[error("Workspace I/O failed ({context}): {source}")]
    Workspace {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RenderError {
    /// Wrap an I/O error raised while touching the workspace.
    pub fn workspace(context: impl Into<String>, source: std::io::Error) -> Self {
        RenderError::Workspace {
            context: context.into(),
            source,
        }
    }

    /// The pipeline stage this error aborts, i.e. the stage that was being
    /// entered when the failure happened.
    pub fn stage(&self) -> Stage {
        match self {
            RenderError::NotFound {
                what: Missing::ProductFolder,
                ..
            } => Stage::Expanded,
            RenderError::NotFound { .. } | RenderError::InvalidRequest(_) => {
                Stage::TemplateResolved
            }
            RenderError::InvalidConfig(_) => Stage::Idle,
            RenderError::Archive(_) => Stage::Repaired,
            RenderError::ExpansionFailed { .. } => Stage::Expanded,
            RenderError::ConverterUnavailable { .. }
            | RenderError::ConversionTimeout { .. }
            | RenderError::ConversionFailed { .. } => Stage::PdfReady,
            RenderError::RasterFailed { .. } => Stage::ImagesReady,
            RenderError::Workspace { .. } | RenderError::Internal(_) => Stage::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let e = RenderError::NotFound {
            what: Missing::TemplateFolder,
            path: PathBuf::from("templates/nope"),
        };
        let msg = e.to_string();
        assert!(msg.contains("Template folder"), "got: {msg}");
        assert!(msg.contains("templates/nope"), "got: {msg}");
    }

    #[test]
    fn conversion_timeout_display() {
        let e = RenderError::ConversionTimeout { secs: 60 };
        assert!(e.to_string().contains("60s"));
    }

    #[test]
    fn missing_member_display() {
        let e = ArchiveError::MissingMember {
            name: "word/document.xml".into(),
        };
        assert!(e.to_string().contains("word/document.xml"));
    }

    #[test]
    fn stage_mapping() {
        assert_eq!(
            RenderError::ConversionTimeout { secs: 1 }.stage(),
            Stage::PdfReady
        );
        assert_eq!(
            RenderError::RasterFailed {
                page: 2,
                detail: "boom".into()
            }
            .stage(),
            Stage::ImagesReady
        );
        assert_eq!(
            RenderError::NotFound {
                what: Missing::ProductFolder,
                path: PathBuf::from("p/1"),
            }
            .stage(),
            Stage::Expanded
        );
        assert_eq!(
            RenderError::NotFound {
                what: Missing::TemplateFolder,
                path: PathBuf::from("t/x"),
            }
            .stage(),
            Stage::TemplateResolved
        );
    }

    #[test]
    fn archive_error_converts_into_render_error() {
        let e: RenderError = ArchiveError::MissingMember {
            name: "word/document.xml".into(),
        }
        .into();
        assert!(matches!(e, RenderError::Archive(_)));
    }
}
