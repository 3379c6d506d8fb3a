use anyhow::Context as _;
use base64::Engine as _;
use image::imageops::FilterType;

use crate::error::{GlimpseError, GlimpseResult};

/// A resampled, quality-reduced JPEG produced from a source image.
#[derive(Clone, Debug)]
pub struct ResampledImage {
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

impl ResampledImage {
    /// Encode as a `data:` URI, the form the upload layer hands to the
    /// backend for image stories.
    pub fn to_data_uri(&self) -> String {
        format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.jpeg)
        )
    }
}

/// Uniform scale factor fitting `(width, height)` inside the bounding box,
/// preserving aspect ratio. Never upscales.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let scale = (f64::from(max_width) / f64::from(width))
        .min(f64::from(max_height) / f64::from(height))
        .min(1.0);
    if scale >= 1.0 {
        return (width, height);
    }
    let w = ((f64::from(width) * scale).round() as u32).max(1);
    let h = ((f64::from(height) * scale).round() as u32).max(1);
    (w, h)
}

/// Decode `bytes`, scale down to fit the bounding box and re-encode as JPEG
/// at `quality` (0..=1).
///
/// Re-encoding always happens, even when the source already fits the box;
/// output for oversized sources is strictly smaller in pixels and output for
/// in-bounds sources may still shrink from the quality reduction. The
/// no-resize case is logged so the silent quality loss stays observable.
pub fn resample_image(
    bytes: &[u8],
    max_width: u32,
    max_height: u32,
    quality: f32,
) -> GlimpseResult<ResampledImage> {
    if !(0.0..=1.0).contains(&quality) {
        return Err(GlimpseError::validation(format!(
            "image quality {quality} outside 0..=1"
        )));
    }

    let decoded = image::load_from_memory(bytes)
        .map_err(|e| GlimpseError::decode(format!("not a decodable image: {e}")))?;
    let (src_w, src_h) = (decoded.width(), decoded.height());
    let (dst_w, dst_h) = fit_within(src_w, src_h, max_width, max_height);

    let resized = if (dst_w, dst_h) == (src_w, src_h) {
        tracing::warn!(
            width = src_w,
            height = src_h,
            "re-encoding image that already fits the bounding box (quality will still drop)"
        );
        decoded
    } else {
        // Lanczos for the downscale: the output is re-compressed anyway, so
        // interpolation quality is the only knob worth spending time on.
        decoded.resize_exact(dst_w, dst_h, FilterType::Lanczos3)
    };

    let jpeg_quality = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
    let mut jpeg = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, jpeg_quality);
    resized
        .to_rgb8()
        .write_with_encoder(encoder)
        .context("jpeg encode of resampled image")?;

    tracing::debug!(
        src = format!("{src_w}x{src_h}"),
        dst = format!("{dst_w}x{dst_h}"),
        quality = jpeg_quality,
        bytes = jpeg.len(),
        "resampled image"
    );

    Ok(ResampledImage {
        width: dst_w,
        height: dst_h,
        jpeg,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        });
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn fit_within_is_width_bound_for_wide_sources() {
        assert_eq!(fit_within(2000, 1000, 800, 800), (800, 400));
    }

    #[test]
    fn fit_within_is_height_bound_for_tall_sources() {
        assert_eq!(fit_within(1000, 2000, 800, 800), (400, 800));
    }

    #[test]
    fn fit_within_never_upscales() {
        assert_eq!(fit_within(400, 300, 800, 800), (400, 300));
    }

    #[test]
    fn resample_scales_down_oversized_source() {
        let src = png_bytes(2000, 1000);
        let out = resample_image(&src, 800, 800, 0.8).unwrap();
        assert_eq!((out.width, out.height), (800, 400));

        // Oversized sources must come out smaller in bytes, not just pixels.
        assert!(
            out.jpeg.len() < src.len(),
            "output ({}) not smaller than input ({})",
            out.jpeg.len(),
            src.len()
        );

        let decoded = image::load_from_memory(&out.jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (800, 400));
    }

    #[test]
    fn resample_reencodes_small_source_without_resizing() {
        let src = png_bytes(400, 300);
        let out = resample_image(&src, 800, 800, 0.8).unwrap();
        assert_eq!((out.width, out.height), (400, 300));
    }

    #[test]
    fn resample_rejects_non_image_input() {
        let err = resample_image(b"definitely not an image", 800, 800, 0.8).unwrap_err();
        assert!(matches!(err, GlimpseError::Decode(_)));
    }

    #[test]
    fn resample_rejects_out_of_range_quality() {
        let src = png_bytes(4, 4);
        assert!(resample_image(&src, 8, 8, 1.5).is_err());
    }

    #[test]
    fn data_uri_has_jpeg_header() {
        let src = png_bytes(4, 4);
        let out = resample_image(&src, 8, 8, 0.5).unwrap();
        assert!(out.to_data_uri().starts_with("data:image/jpeg;base64,"));
    }
}
