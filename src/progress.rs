//! Progress-callback trait for render pipeline events.
//!
//! Inject an [`Arc<dyn RenderProgressCallback>`] via
//! [`crate::config::RenderConfigBuilder::progress_callback`] to be told when
//! each stage is entered and each page image is written.
//!
//! # Why callbacks instead of channels?
//!
//! The host decides how progress travels: a terminal spinner, a log line,
//! a job record in a database. The library only calls a trait. The trait is
//! `Send + Sync` because one `RenderConfig` serves concurrent requests.
//!
//! # Example
//!
//! ```rust
//! use offer_render::{RenderConfig, RenderProgressCallback, Stage};
//! use std::sync::Arc;
//!
//! struct StageLogger;
//!
//! impl RenderProgressCallback for StageLogger {
//!     fn on_stage(&self, template: &str, stage: Stage) {
//!         eprintln!("{template}: {stage}");
//!     }
//! }
//!
//! let config = RenderConfig::builder()
//!     .progress_callback(Arc::new(StageLogger))
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::Stage;
use std::sync::Arc;

/// Called by the render pipeline as a request moves through its stages.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Events for one request arrive in order; events for
/// different requests may interleave.
pub trait RenderProgressCallback: Send + Sync {
    /// Called once, before the template is resolved.
    fn on_render_start(&self, template: &str) {
        let _ = template;
    }

    /// Called each time the request enters `stage`.
    fn on_stage(&self, template: &str, stage: Stage) {
        let _ = (template, stage);
    }

    /// Called after each page image has been encoded.
    ///
    /// # Arguments
    /// * `page_num`   : 1-indexed page number
    /// * `total_pages`: pages in the PDF
    /// * `bytes`      : size of the encoded JPEG
    fn on_page_rendered(&self, page_num: usize, total_pages: usize, bytes: usize) {
        let _ = (page_num, total_pages, bytes);
    }

    /// Called once the output is packaged.
    fn on_render_complete(&self, template: &str, pages: usize) {
        let _ = (template, pages);
    }

    /// Called when the request fails; `stage` is the stage being entered.
    fn on_render_failed(&self, template: &str, stage: Stage, error: &str) {
        let _ = (template, stage, error);
    }
}

/// A callback that ignores every event.
pub struct NoopProgressCallback;

impl RenderProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RenderConfig`].
pub type ProgressCallback = Arc<dyn RenderProgressCallback>;
