//! Render output types.

use serde::Serialize;

/// One rasterised page, already JPEG-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-indexed page number.
    pub page_num: usize,
    /// Archive entry name: `page_001.jpg`, `page_002.jpg`, …
    pub file_name: String,
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl PageImage {
    pub fn file_name_for(page_num: usize) -> String {
        format!("page_{page_num:03}.jpg")
    }
}

/// Result of a successful render.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    /// Response body: one JPEG or a zip of JPEGs.
    pub body: Vec<u8>,
    /// `image/jpeg` or `application/zip`.
    pub content_type: &'static str,
    /// Suggested download name, e.g. `offer_wolftax.zip`.
    pub file_name: String,
    pub page_count: usize,
    pub stats: RenderStats,
}

/// Wall-clock time spent in each stage, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderStats {
    pub resolve_ms: u64,
    pub repair_ms: u64,
    pub expand_ms: u64,
    pub convert_ms: u64,
    pub rasterize_ms: u64,
    pub package_ms: u64,
    pub total_ms: u64,
    /// Strategy used for the main member, or None if repair was bypassed.
    pub repair_strategy: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_file_names_are_zero_padded() {
        assert_eq!(PageImage::file_name_for(1), "page_001.jpg");
        assert_eq!(PageImage::file_name_for(42), "page_042.jpg");
        assert_eq!(PageImage::file_name_for(1234), "page_1234.jpg");
    }
}
