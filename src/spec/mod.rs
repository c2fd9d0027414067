//! Typed transformation specs.
//!
//! Every edit a caller can request is an explicit optional field here; a spec
//! is validated once, up front, and the checked value is what travels to the
//! queue and the executor. Serialization uses camelCase names and omits
//! absent fields entirely, which the cache-key canonicalization relies on.

pub mod validate;

use serde::{Deserialize, Serialize};

/// Immutable description of the requested edits. All fields optional.
#[derive(
    Debug, Clone, Default, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode,
)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransformationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize: Option<ResizeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<CropSpec>,
    /// Signed degrees. Angles that are not a multiple of 90 pad the exposed
    /// corners with transparent fill.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotate: Option<i32>,
    /// Vertical mirror.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flip: Option<bool>,
    /// Horizontal mirror, applied after `flip` when both are requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flop: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark: Option<WatermarkSpec>,
    /// Target encoding; the source format is kept when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
    /// 1-100. Overrides the `compress` shorthand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    /// Shorthand lowering the default quality for lossy targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress: Option<bool>,
}

impl TransformationSpec {
    /// Effective encoding quality after resolving `quality` and `compress`.
    pub fn effective_quality(&self) -> u8 {
        self.quality.unwrap_or(if self.compress == Some(true) {
            crate::common::COMPRESSED_QUALITY
        } else {
            crate::common::DEFAULT_QUALITY
        })
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode,
)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResizeSpec {
    /// Either dimension may be omitted to preserve the source aspect ratio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fit: Option<FitMode>,
    /// Crop/placement anchor for `cover` and `contain`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Gravity>,
    /// Forbid upscaling beyond the source resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub without_enlargement: Option<bool>,
}

/// Axis-aligned rectangle in source pixel space.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode,
)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CropSpec {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Resize strategy governing aspect-ratio mismatch.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    bitcode::Encode,
    bitcode::Decode,
)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Fill the box, cropping the overflow.
    #[default]
    Cover,
    /// Fit inside the box and letterbox the remainder.
    Contain,
    /// Stretch to the exact box, ignoring aspect ratio.
    Fill,
    /// Fit inside the box without padding.
    Inside,
    /// Cover the box without cropping; the result may exceed the box.
    Outside,
}

/// Nine-anchor placement used by resize cropping and watermark composition.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    bitcode::Encode,
    bitcode::Decode,
)]
#[serde(rename_all = "kebab-case")]
pub enum Gravity {
    TopLeft,
    Top,
    TopRight,
    Left,
    #[default]
    Center,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
}

/// Tone and color adjustments. Each field is independently optional; the
/// executor applies them in one fixed order no matter how they were given.
#[derive(
    Debug, Clone, Default, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode,
)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grayscale: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sepia: Option<bool>,
    /// Gaussian radius, >= 0. Zero is a no-op.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blur: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharpen: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negate: Option<bool>,
    /// Auto contrast stretch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalize: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f32>,
    /// Multiplier; 1.0 leaves the image unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f32>,
    /// Multiplier; 0.0 fully desaturates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saturation: Option<f32>,
    /// Hue rotation in degrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hue: Option<i32>,
}

/// A generated text badge composed onto the image.
#[derive(
    Debug, Clone, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode,
)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WatermarkSpec {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u32>,
    /// Hex (`#rgb`, `#rrggbb`, `#rrggbbaa`) or a named color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_color: Option<String>,
    /// Family name resolved against the configured font directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<u32>,
    /// Anchor for the badge; bottom-right when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Gravity>,
}

/// Supported target encodings.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[serde(alias = "jpg")]
    Jpeg,
    Png,
    Webp,
    Gif,
    Bmp,
    Tiff,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Gif => "gif",
            OutputFormat::Bmp => "bmp",
            OutputFormat::Tiff => "tiff",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Gif => "image/gif",
            OutputFormat::Bmp => "image/bmp",
            OutputFormat::Tiff => "image/tiff",
        }
    }
}
