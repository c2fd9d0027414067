//! Validation pass producing a checked spec.
//!
//! Runs before a spec reaches the queue or the executor; anything rejected
//! here surfaces synchronously as a `Validation` error and never consumes
//! pipeline capacity.

use crate::common::MAX_DIMENSION;
use crate::error::TransformError;
use crate::pipeline::watermark::parse_color;
use crate::spec::{CropSpec, FilterSpec, ResizeSpec, TransformationSpec, WatermarkSpec};

impl TransformationSpec {
    pub fn validate(&self) -> Result<(), TransformError> {
        if let Some(resize) = &self.resize {
            validate_resize(resize)?;
        }
        if let Some(crop) = &self.crop {
            validate_crop(crop)?;
        }
        if let Some(filters) = &self.filters {
            validate_filters(filters)?;
        }
        if let Some(watermark) = &self.watermark {
            validate_watermark(watermark)?;
        }
        if let Some(quality) = self.quality {
            if !(1..=100).contains(&quality) {
                return Err(invalid(format!("quality must be 1-100, got {quality}")));
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> TransformError {
    TransformError::Validation(message.into())
}

fn validate_resize(resize: &ResizeSpec) -> Result<(), TransformError> {
    if resize.width.is_none() && resize.height.is_none() {
        return Err(invalid("resize requires at least one of width or height"));
    }
    for (name, value) in [("width", resize.width), ("height", resize.height)] {
        if let Some(value) = value {
            if value == 0 || value > MAX_DIMENSION {
                return Err(invalid(format!(
                    "resize {name} must be 1-{MAX_DIMENSION}, got {value}"
                )));
            }
        }
    }
    Ok(())
}

fn validate_crop(crop: &CropSpec) -> Result<(), TransformError> {
    if crop.width == 0 || crop.height == 0 {
        return Err(invalid("crop width and height must be positive"));
    }
    if crop.width > MAX_DIMENSION || crop.height > MAX_DIMENSION {
        return Err(invalid(format!(
            "crop rectangle exceeds the {MAX_DIMENSION}px dimension limit"
        )));
    }
    Ok(())
}

fn validate_filters(filters: &FilterSpec) -> Result<(), TransformError> {
    if let Some(blur) = filters.blur {
        if !blur.is_finite() || blur < 0.0 {
            return Err(invalid(format!("blur radius must be >= 0, got {blur}")));
        }
    }
    if let Some(gamma) = filters.gamma {
        if !gamma.is_finite() || !(0.1..=10.0).contains(&gamma) {
            return Err(invalid(format!("gamma must be 0.1-10.0, got {gamma}")));
        }
    }
    for (name, value) in [
        ("brightness", filters.brightness),
        ("saturation", filters.saturation),
    ] {
        if let Some(value) = value {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!("{name} must be >= 0, got {value}")));
            }
        }
    }
    Ok(())
}

fn validate_watermark(watermark: &WatermarkSpec) -> Result<(), TransformError> {
    if watermark.text.trim().is_empty() {
        return Err(invalid("watermark text must not be empty"));
    }
    if let Some(size) = watermark.font_size {
        if !(1..=512).contains(&size) {
            return Err(invalid(format!("watermark fontSize must be 1-512, got {size}")));
        }
    }
    if let Some(padding) = watermark.padding {
        if padding > 500 {
            return Err(invalid(format!("watermark padding must be <= 500, got {padding}")));
        }
    }
    for color in [&watermark.font_color, &watermark.background_color]
        .into_iter()
        .flatten()
    {
        parse_color(color)?;
    }
    Ok(())
}
