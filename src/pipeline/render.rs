//! PDF rasterisation: render every page to JPEG via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so the
//! Tokio worker threads keep serving other requests while a page renders.
//!
//! ## All or nothing
//!
//! A render returns every page or an error. A half-rendered offer is worse
//! than none, so the first failing page aborts the whole document and the
//! pages rendered so far are dropped.

use crate::error::RenderError;
use crate::output::PageImage;
use crate::pipeline::encode::encode_page;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Turns a PDF into page images.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Render all pages of `pdf` at `dpi`, JPEG-encoded at `quality`.
    ///
    /// # Errors
    /// [`RenderError::RasterFailed`] for any page failure, or when the
    /// document has no pages.
    async fn rasterize(&self, pdf: &Path, dpi: u32, quality: u8) -> Result<Vec<PageImage>, RenderError>;
}

/// Rasterizer backed by the pdfium shared library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    library: Option<PathBuf>,
}

impl PdfiumRasterizer {
    /// Bind to `library` if given, else to pdfium on the system search path.
    pub fn new(library: Option<PathBuf>) -> Self {
        Self { library }
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn rasterize(&self, pdf: &Path, dpi: u32, quality: u8) -> Result<Vec<PageImage>, RenderError> {
        let path = pdf.to_path_buf();
        let library = self.library.clone();

        tokio::task::spawn_blocking(move || {
            rasterize_blocking(&path, library.as_deref(), dpi, quality)
        })
        .await
        .map_err(|e| RenderError::Internal(format!("Render task panicked: {}", e)))?
    }
}

/// Document-level failures are reported as page 0.
fn document_error(detail: impl Into<String>) -> RenderError {
    RenderError::RasterFailed {
        page: 0,
        detail: detail.into(),
    }
}

fn bind(library: Option<&Path>) -> Result<Pdfium, RenderError> {
    let bindings = match library {
        Some(path) if path.is_dir() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
        }
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| document_error(format!("cannot load pdfium: {e}")))?;
    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of page rendering.
fn rasterize_blocking(
    pdf_path: &Path,
    library: Option<&Path>,
    dpi: u32,
    quality: u8,
) -> Result<Vec<PageImage>, RenderError> {
    let pdfium = bind(library)?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| document_error(format!("cannot open {}: {:?}", pdf_path.display(), e)))?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);
    if total_pages == 0 {
        return Err(document_error("the PDF has no pages"));
    }

    // PDF user space is 72 points per inch.
    let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);

    let mut results = Vec::with_capacity(total_pages);
    for (idx, page) in pages.iter().enumerate() {
        let page_num = idx + 1;
        let raster_err = |detail: String| RenderError::RasterFailed {
            page: page_num,
            detail,
        };

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| raster_err(format!("{:?}", e)))?;
        let image = bitmap.as_image();
        let jpeg = encode_page(&image, quality, dpi).map_err(|e| raster_err(e.to_string()))?;

        debug!(
            "Rendered page {} → {}x{} px, {} bytes",
            page_num,
            image.width(),
            image.height(),
            jpeg.len()
        );
        results.push(PageImage {
            page_num,
            file_name: PageImage::file_name_for(page_num),
            width: image.width(),
            height: image.height(),
            jpeg,
        });
    }

    Ok(results)
}
