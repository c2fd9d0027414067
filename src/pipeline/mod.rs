//! The transformation pipeline.
//!
//! `PipelineExecutor::execute` applies a validated spec to source bytes in
//! one fixed stage order: crop -> resize -> rotate -> flip -> flop ->
//! filters -> watermark -> encode. Crop runs before resize so that crop
//! coordinates always address source pixel space. Each stage is skipped
//! when its field is absent. The executor works purely on bytes; callers
//! own input and output placement.

pub mod encode;
pub mod filters;
pub mod geometry;
pub mod watermark;

use crate::error::TransformError;
use crate::spec::{OutputFormat, TransformationSpec};
use anyhow::{Context, Result};
use image::DynamicImage;
use std::path::PathBuf;

/// Shape and encoding of the produced derivative.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
    pub format: OutputFormat,
}

pub struct PipelineExecutor {
    font_dir: Option<PathBuf>,
}

impl PipelineExecutor {
    pub fn new(font_dir: Option<PathBuf>) -> Self {
        Self { font_dir }
    }

    /// Apply `spec` to `source`. Fails with `SourceUnreadable` when no
    /// decoder accepts the input and `Processing` for geometry or encoder
    /// errors. Safe to redo: the same input and spec produce an equivalent
    /// output, so at-least-once redelivery may simply run it again.
    pub fn execute(
        &self,
        source: &[u8],
        spec: &TransformationSpec,
    ) -> Result<PipelineOutput, TransformError> {
        let (mut img, source_format) = decode(source)?;

        if let Some(crop) = &spec.crop {
            img = geometry::crop(img, crop)?;
        }
        if let Some(resize) = &spec.resize {
            img = geometry::resize(img, resize)?;
        }
        if let Some(degrees) = spec.rotate {
            img = geometry::rotate(img, degrees);
        }
        if spec.flip == Some(true) {
            img = img.flipv();
        }
        if spec.flop == Some(true) {
            img = img.fliph();
        }
        if let Some(filters) = &spec.filters {
            img = filters::apply(img, filters);
        }
        if let Some(mark) = &spec.watermark {
            img = watermark::apply(img, mark, self.font_dir.as_deref())?;
        }

        let format = spec
            .format
            .or(source_format)
            .unwrap_or(OutputFormat::Png);
        let bytes = encode::encode(&img, format, spec.effective_quality())?;

        Ok(PipelineOutput {
            width: img.width(),
            height: img.height(),
            size_bytes: bytes.len() as u64,
            format,
            bytes,
        })
    }
}

/// Decoder chain: the `image` crate first, then `zune-jpeg` for JPEG inputs
/// the generic decoder rejects. Returns the decoded image and the detected
/// source format so encoding can default to it.
fn decode(source: &[u8]) -> Result<(DynamicImage, Option<OutputFormat>), TransformError> {
    let source_format = image::guess_format(source).ok().and_then(encode::source_format);

    match image::load_from_memory(source) {
        Ok(img) => Ok((img, source_format)),
        Err(primary) => match zune_jpeg_decoder(source) {
            Ok(img) => Ok((img, Some(OutputFormat::Jpeg))),
            Err(_) => Err(TransformError::SourceUnreadable(format!(
                "all decoders failed: {primary}"
            ))),
        },
    }
}

fn zune_jpeg_decoder(source: &[u8]) -> Result<DynamicImage> {
    let mut decoder = zune_jpeg::JpegDecoder::new(source);
    let pixels = decoder
        .decode()
        .map_err(|e| anyhow::anyhow!("zune-jpeg failed to decode: {e:?}"))?;
    let (width, height) = decoder
        .dimensions()
        .context("zune-jpeg reported no dimensions")?;
    let (width, height) = (width as u32, height as u32);

    let area = (width as usize) * (height as usize);
    let img = if pixels.len() == area * 3 {
        image::RgbImage::from_raw(width, height, pixels)
            .map(DynamicImage::ImageRgb8)
            .context("zune-jpeg RGB buffer has the wrong length")?
    } else if pixels.len() == area {
        image::GrayImage::from_raw(width, height, pixels)
            .map(DynamicImage::ImageLuma8)
            .context("zune-jpeg luma buffer has the wrong length")?
    } else {
        anyhow::bail!(
            "unsupported zune-jpeg output layout: {} bytes for {width}x{height}",
            pixels.len()
        );
    };
    Ok(img)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{CropSpec, FilterSpec, FitMode, ResizeSpec};
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_source(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([90, 60, 30, 255])));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn executor() -> PipelineExecutor {
        PipelineExecutor::new(None)
    }

    #[test]
    fn empty_spec_reencodes_at_the_source_format() {
        let out = executor()
            .execute(&png_source(20, 10), &TransformationSpec::default())
            .unwrap();
        assert_eq!(out.format, OutputFormat::Png);
        assert_eq!((out.width, out.height), (20, 10));
        assert_eq!(out.size_bytes, out.bytes.len() as u64);
    }

    #[test]
    fn crop_precedes_resize() {
        // 1000x800 source, crop 500x400 at the origin, then resize to the
        // exact 250x200 box. Resize-first would put the crop rectangle out
        // of bounds.
        let spec = TransformationSpec {
            crop: Some(CropSpec {
                x: 0,
                y: 0,
                width: 500,
                height: 400,
            }),
            resize: Some(ResizeSpec {
                width: Some(250),
                height: Some(200),
                fit: Some(FitMode::Fill),
                position: None,
                without_enlargement: None,
            }),
            ..Default::default()
        };
        let out = executor().execute(&png_source(1000, 800), &spec).unwrap();
        assert_eq!((out.width, out.height), (250, 200));
    }

    #[test]
    fn out_of_bounds_crop_is_a_processing_error() {
        let spec = TransformationSpec {
            crop: Some(CropSpec {
                x: 0,
                y: 0,
                width: 999,
                height: 999,
            }),
            ..Default::default()
        };
        let err = executor().execute(&png_source(100, 100), &spec).unwrap_err();
        assert!(matches!(err, TransformError::Processing(_)));
    }

    #[test]
    fn garbage_input_is_source_unreadable() {
        let err = executor()
            .execute(b"not an image at all", &TransformationSpec::default())
            .unwrap_err();
        assert!(matches!(err, TransformError::SourceUnreadable(_)));
    }

    #[test]
    fn explicit_format_overrides_the_source_format() {
        let spec = TransformationSpec {
            format: Some(OutputFormat::Jpeg),
            ..Default::default()
        };
        let out = executor().execute(&png_source(12, 12), &spec).unwrap();
        assert_eq!(out.format, OutputFormat::Jpeg);
        assert_eq!(image::guess_format(&out.bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn rotation_and_mirrors_compose_after_geometry() {
        let spec = TransformationSpec {
            rotate: Some(90),
            flip: Some(true),
            flop: Some(true),
            ..Default::default()
        };
        let out = executor().execute(&png_source(40, 20), &spec).unwrap();
        assert_eq!((out.width, out.height), (20, 40));
    }

    #[test]
    fn filters_run_without_changing_dimensions() {
        let spec = TransformationSpec {
            filters: Some(FilterSpec {
                grayscale: Some(true),
                blur: Some(1.5),
                normalize: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        let out = executor().execute(&png_source(30, 30), &spec).unwrap();
        assert_eq!((out.width, out.height), (30, 30));
    }
}
