//! Packaging: turn page images into the response body.

use crate::error::RenderError;
use crate::output::PageImage;
use crate::request::ReturnMode;
use std::io::{Cursor, Write};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";
pub const ZIP_CONTENT_TYPE: &str = "application/zip";

/// A packaged body with its content type and download name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub body: Vec<u8>,
    pub content_type: &'static str,
    pub file_name: String,
}

/// Package `pages` for `template` according to `mode`.
pub fn package(pages: &[PageImage], template: &str, mode: ReturnMode) -> Result<Package, RenderError> {
    match mode {
        ReturnMode::FirstPageInline => {
            let first = pages.first().ok_or_else(|| RenderError::RasterFailed {
                page: 1,
                detail: "no pages to return".into(),
            })?;
            Ok(Package {
                body: first.jpeg.clone(),
                content_type: JPEG_CONTENT_TYPE,
                file_name: format!("offer_{template}.jpg"),
            })
        }
        ReturnMode::Zip => Ok(Package {
            body: zip_pages(pages)?,
            content_type: ZIP_CONTENT_TYPE,
            file_name: format!("offer_{template}.zip"),
        }),
    }
}

/// One deflate archive holding `page_001.jpg`, `page_002.jpg`, … in order.
pub fn zip_pages(pages: &[PageImage]) -> Result<Vec<u8>, RenderError> {
    let zip_err = |e: zip::result::ZipError| RenderError::Internal(format!("Cannot build zip: {e}"));

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for page in pages {
        zip.start_file(page.file_name.as_str(), options)
            .map_err(zip_err)?;
        zip.write_all(&page.jpeg)
            .map_err(|e| RenderError::Internal(format!("Cannot build zip: {e}")))?;
    }
    let body = zip.finish().map_err(zip_err)?.into_inner();
    debug!("Packaged {} pages → {} bytes zip", pages.len(), body.len());
    Ok(body)
}
