//! # offer-render
//!
//! Render DOCX offer templates to page images, and repair the template tags
//! Word breaks along the way.
//!
//! ## Why this crate?
//!
//! Offer templates are written in Word by people who never see the XML.
//! Word stores `{{ customer_name }}` as whatever runs the keystrokes, spell
//! checker and formatting changes produced, so the delimiters routinely end
//! up in different `<w:r>` elements and the template engine reports a syntax
//! error on a tag that looks perfect on screen. The [`repair`] module puts
//! every placeholder back into one run before expansion.
//!
//! ## Pipeline Overview
//!
//! ```text
//! template folder
//!  │
//!  ├─ 1. Resolve  validate name, pick main .docx, read template.json
//!  ├─ 2. Repair   rejoin split {{ }} / {% %} tags (structural → textual)
//!  ├─ 3. Expand   external template engine fills data + products
//!  ├─ 4. PDF      LibreOffice headless, bounded by a timeout
//!  ├─ 5. Raster   pdfium → JPEG per page (spawn_blocking)
//!  └─ 6. Package  first page inline, or all pages zipped
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use offer_render::{CommandExpander, RenderConfig, RenderRequest, Renderer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(RenderConfig::from_env()?);
//!     let expander = Arc::new(CommandExpander::new("docx-expand"));
//!     let renderer = Renderer::new(config, expander);
//!
//!     let output = renderer.render(&RenderRequest::new("wolftax")).await?;
//!     std::fs::write(&output.file_name, &output.body)?;
//!     eprintln!("{} pages in {}ms", output.page_count, output.stats.total_ms);
//!     Ok(())
//! }
//! ```
//!
//! Repair alone needs no external tools:
//!
//! ```rust,no_run
//! use offer_render::repair::{fixed_output_path, repair_archive};
//! use std::path::Path;
//!
//! let input = Path::new("templates/wolftax/wolftax.docx");
//! let report = repair_archive(input, &fixed_output_path(input))?;
//! println!("{} members repaired", report.repaired().count());
//! # Ok::<(), offer_render::ArchiveError>(())
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `offer-render` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! offer-render = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod render;
pub mod repair;
pub mod request;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{RenderConfig, RenderConfigBuilder};
pub use error::{ArchiveError, Missing, ParseError, RenderError};
pub use output::{PageImage, RenderOutput, RenderStats};
pub use pipeline::{
    CommandExpander, DocumentConverter, ExpansionContext, InlineImage, PdfiumRasterizer,
    Rasterizer, SofficeConverter, Stage, TemplateExpander,
};
pub use progress::{NoopProgressCallback, ProgressCallback, RenderProgressCallback};
pub use render::{render_sync, HealthReport, Renderer};
pub use repair::{repair_archive, repair_markup, scan, Repair, Repaired, Strategy};
pub use request::{ProductItem, RenderRequest, ReturnMode};
