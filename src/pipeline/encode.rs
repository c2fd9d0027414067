//! Output encoding: format selection, quality resolution, alpha handling.
//!
//! JPEG is the only target with a real quality knob in the `image` crate;
//! WebP encodes lossless and GIF/BMP/TIFF take no quality parameter, so an
//! explicit `quality` on those is accepted and ignored by the generic
//! re-encode path.

use crate::error::TransformError;
use crate::spec::OutputFormat;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

pub fn encode(
    img: &DynamicImage,
    format: OutputFormat,
    quality: u8,
) -> Result<Vec<u8>, TransformError> {
    let mut buffer = Cursor::new(Vec::new());
    match format {
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel; flatten before encoding.
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
            rgb.write_with_encoder(encoder)
                .map_err(|e| encode_error(format, e))?;
        }
        OutputFormat::Png => {
            img.write_to(&mut buffer, ImageFormat::Png)
                .map_err(|e| encode_error(format, e))?;
        }
        other => {
            // Generic re-encode at the requested container type.
            let target = image_format(other);
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            rgba.write_to(&mut buffer, target)
                .map_err(|e| encode_error(other, e))?;
        }
    }
    Ok(buffer.into_inner())
}

/// Map a guessed container format back to the spec's format enum. Unknown
/// containers fall through to `None` and the caller picks the default.
pub fn source_format(format: ImageFormat) -> Option<OutputFormat> {
    match format {
        ImageFormat::Jpeg => Some(OutputFormat::Jpeg),
        ImageFormat::Png => Some(OutputFormat::Png),
        ImageFormat::WebP => Some(OutputFormat::Webp),
        ImageFormat::Gif => Some(OutputFormat::Gif),
        ImageFormat::Bmp => Some(OutputFormat::Bmp),
        ImageFormat::Tiff => Some(OutputFormat::Tiff),
        _ => None,
    }
}

fn image_format(format: OutputFormat) -> ImageFormat {
    match format {
        OutputFormat::Jpeg => ImageFormat::Jpeg,
        OutputFormat::Png => ImageFormat::Png,
        OutputFormat::Webp => ImageFormat::WebP,
        OutputFormat::Gif => ImageFormat::Gif,
        OutputFormat::Bmp => ImageFormat::Bmp,
        OutputFormat::Tiff => ImageFormat::Tiff,
    }
}

fn encode_error(format: OutputFormat, err: image::ImageError) -> TransformError {
    TransformError::Processing(format!("failed to encode as {}: {err}", format.extension()))
}
