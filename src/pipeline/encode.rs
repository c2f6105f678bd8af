//! Image encoding: `DynamicImage` → JPEG bytes with a density header.
//!
//! Pages are flattened to RGB first: PDF renders come back as RGBA and JPEG
//! has no alpha channel. The JFIF header records the render DPI so image
//! viewers and print pipelines size the page correctly.

use image::codecs::jpeg::{JpegEncoder, PixelDensity};
use image::DynamicImage;
use tracing::debug;

/// Encode a rasterised page as JPEG at `quality` (1–100), tagged with `dpi`.
pub fn encode_page(img: &DynamicImage, quality: u8, dpi: u32) -> Result<Vec<u8>, image::ImageError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();

    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder.set_pixel_density(PixelDensity::dpi(dpi.min(u16::MAX as u32) as u16));
    encoder.encode_image(&rgb)?;

    debug!(
        "Encoded {}x{} page → {} bytes JPEG",
        rgb.width(),
        rgb.height(),
        buf.len()
    );
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn red(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn encode_small_image() {
        let data = encode_page(&red(10, 10), 85, 100).expect("encode should succeed");
        // SOI marker, then the JFIF APP0 segment.
        assert_eq!(&data[..2], &[0xFF, 0xD8]);
        assert_eq!(&data[6..11], b"JFIF\0");
        let decoded = image::load_from_memory(&data).expect("valid JPEG");
        assert_eq!((decoded.width(), decoded.height()), (10, 10));
    }

    #[test]
    fn density_is_recorded_in_dots_per_inch() {
        let data = encode_page(&red(4, 4), 85, 150).unwrap();
        // APP0 layout: version (2), units (1), x density (2), y density (2).
        assert_eq!(data[13], 1, "units = dots per inch");
        assert_eq!(u16::from_be_bytes([data[14], data[15]]), 150);
        assert_eq!(u16::from_be_bytes([data[16], data[17]]), 150);
    }

    #[test]
    fn lower_quality_is_smaller() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_fn(64, 64, |x, y| {
            Rgba([(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8, 255])
        }));
        let hi = encode_page(&img, 95, 100).unwrap();
        let lo = encode_page(&img, 10, 100).unwrap();
        assert!(lo.len() < hi.len());
    }
}
