//! Generated text badge composed onto the image.
//!
//! The badge is a rounded rectangle sized from the rendered text plus
//! padding, with the label centered inside it, anchored per the spec
//! (bottom-right when unspecified) and inset from the image edge.

use crate::common::{DEFAULT_WATERMARK_FONT_SIZE, DEFAULT_WATERMARK_PADDING, WATERMARK_MARGIN};
use crate::error::TransformError;
use crate::pipeline::geometry::anchor_offset;
use crate::spec::{Gravity, WatermarkSpec};
use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, Rgba, RgbaImage, imageops};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::fs;
use std::path::Path;

const DEFAULT_FONT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const DEFAULT_BACKGROUND_COLOR: Rgba<u8> = Rgba([0, 0, 0, 160]);

pub fn apply(
    img: DynamicImage,
    spec: &WatermarkSpec,
    font_dir: Option<&Path>,
) -> Result<DynamicImage, TransformError> {
    let font = load_font(font_dir, spec.font_family.as_deref())?;
    let font_size = spec.font_size.unwrap_or(DEFAULT_WATERMARK_FONT_SIZE);
    let padding = spec.padding.unwrap_or(DEFAULT_WATERMARK_PADDING);
    let font_color = match &spec.font_color {
        Some(color) => parse_color(color)?,
        None => DEFAULT_FONT_COLOR,
    };
    let background = match &spec.background_color {
        Some(color) => parse_color(color)?,
        None => DEFAULT_BACKGROUND_COLOR,
    };

    let scale = PxScale::from(font_size as f32);
    let (text_w, text_h) = text_size(scale, &font, &spec.text);
    let badge_w = text_w + 2 * padding;
    let badge_h = text_h + 2 * padding;
    let badge = render_badge(badge_w, badge_h, padding, background, |canvas| {
        draw_text_mut(
            canvas,
            font_color,
            padding as i32,
            padding as i32,
            scale,
            &font,
            &spec.text,
        );
    });

    let mut canvas = img.to_rgba8();
    let gravity = spec.position.unwrap_or(Gravity::BottomRight);
    let (x, y) = anchor_offset(
        gravity,
        (canvas.width(), canvas.height()),
        (badge_w, badge_h),
        WATERMARK_MARGIN,
    );
    imageops::overlay(&mut canvas, &badge, x as i64, y as i64);
    Ok(DynamicImage::ImageRgba8(canvas))
}

/// Rounded rectangle backdrop, then the label drawn on top.
fn render_badge(
    width: u32,
    height: u32,
    padding: u32,
    background: Rgba<u8>,
    draw_label: impl FnOnce(&mut RgbaImage),
) -> RgbaImage {
    let mut badge = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    let radius = corner_radius(width, height, padding);
    if radius == 0 {
        draw_filled_rect_mut(
            &mut badge,
            Rect::at(0, 0).of_size(width, height),
            background,
        );
    } else {
        let r = radius as i32;
        let (w, h) = (width as i32, height as i32);
        // Two overlapping rectangles leave the four corner squares empty;
        // the circles fill them back in rounded.
        if width > 2 * radius {
            draw_filled_rect_mut(
                &mut badge,
                Rect::at(r, 0).of_size(width - 2 * radius, height),
                background,
            );
        }
        if height > 2 * radius {
            draw_filled_rect_mut(
                &mut badge,
                Rect::at(0, r).of_size(width, height - 2 * radius),
                background,
            );
        }
        for (cx, cy) in [(r, r), (w - r - 1, r), (r, h - r - 1), (w - r - 1, h - r - 1)] {
            draw_filled_circle_mut(&mut badge, (cx, cy), r, background);
        }
    }
    draw_label(&mut badge);
    badge
}

/// Corner radius for a badge: capped by the padding and by half the badge
/// height so opposite corners never overlap.
pub fn corner_radius(width: u32, height: u32, padding: u32) -> u32 {
    padding.min(height / 2).min(width / 2)
}

/// Resolve a font family against the configured font directory. Without a
/// requested family the lexicographically first font file in the directory
/// is used, so repeated runs pick the same face.
fn load_font(font_dir: Option<&Path>, family: Option<&str>) -> Result<FontVec, TransformError> {
    let dir = font_dir.ok_or_else(|| {
        TransformError::Processing("watermark requested but no font directory is configured".into())
    })?;

    let path = match family {
        Some(family) => ["ttf", "otf"]
            .iter()
            .map(|ext| dir.join(format!("{family}.{ext}")))
            .find(|p| p.is_file())
            .ok_or_else(|| {
                TransformError::Processing(format!(
                    "watermark font family {family:?} not found under {dir:?}"
                ))
            })?,
        None => first_font_file(dir)?,
    };

    let bytes = fs::read(&path)
        .map_err(|e| TransformError::Processing(format!("failed to read font {path:?}: {e}")))?;
    FontVec::try_from_vec(bytes)
        .map_err(|_| TransformError::Processing(format!("font {path:?} is not a valid font file")))
}

fn first_font_file(dir: &Path) -> Result<std::path::PathBuf, TransformError> {
    let mut fonts: Vec<_> = fs::read_dir(dir)
        .map_err(|e| {
            TransformError::Processing(format!("failed to read font directory {dir:?}: {e}"))
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|s| s.to_str()),
                Some("ttf") | Some("otf")
            )
        })
        .collect();
    fonts.sort();
    fonts.into_iter().next().ok_or_else(|| {
        TransformError::Processing(format!("no font files found under {dir:?}"))
    })
}

/// Parse `#rgb`, `#rrggbb`, `#rrggbbaa` or a small set of named colors.
pub fn parse_color(input: &str) -> Result<Rgba<u8>, TransformError> {
    let named = match input.to_ascii_lowercase().as_str() {
        "black" => Some([0, 0, 0, 255]),
        "white" => Some([255, 255, 255, 255]),
        "red" => Some([255, 0, 0, 255]),
        "green" => Some([0, 128, 0, 255]),
        "blue" => Some([0, 0, 255, 255]),
        "yellow" => Some([255, 255, 0, 255]),
        "gray" | "grey" => Some([128, 128, 128, 255]),
        "transparent" => Some([0, 0, 0, 0]),
        _ => None,
    };
    if let Some(channels) = named {
        return Ok(Rgba(channels));
    }

    let hex = input.strip_prefix('#').ok_or_else(|| bad_color(input))?;
    let expand = |c: u8| (c << 4) | c;
    let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).map_err(|_| bad_color(input));
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| bad_color(input));
    match hex.len() {
        3 => Ok(Rgba([
            expand(nibble(0)?),
            expand(nibble(1)?),
            expand(nibble(2)?),
            255,
        ])),
        6 => Ok(Rgba([byte(0)?, byte(2)?, byte(4)?, 255])),
        8 => Ok(Rgba([byte(0)?, byte(2)?, byte(4)?, byte(6)?])),
        _ => Err(bad_color(input)),
    }
}

fn bad_color(input: &str) -> TransformError {
    TransformError::Validation(format!(
        "invalid color {input:?}: expected #rgb, #rrggbb, #rrggbbaa or a named color"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colors_parse_in_all_three_widths() {
        assert_eq!(parse_color("#fff").unwrap(), Rgba([255, 255, 255, 255]));
        assert_eq!(parse_color("#102030").unwrap(), Rgba([16, 32, 48, 255]));
        assert_eq!(parse_color("#10203040").unwrap(), Rgba([16, 32, 48, 64]));
    }

    #[test]
    fn named_colors_parse_case_insensitively() {
        assert_eq!(parse_color("White").unwrap(), Rgba([255, 255, 255, 255]));
        assert_eq!(parse_color("grey").unwrap(), parse_color("gray").unwrap());
    }

    #[test]
    fn malformed_colors_are_validation_errors() {
        for bad in ["#zzz", "#12345", "chartreuse-ish", ""] {
            assert!(matches!(
                parse_color(bad),
                Err(TransformError::Validation(_))
            ));
        }
    }

    #[test]
    fn corner_radius_never_exceeds_half_the_badge() {
        assert_eq!(corner_radius(100, 40, 8), 8);
        assert_eq!(corner_radius(100, 10, 8), 5);
        assert_eq!(corner_radius(6, 40, 8), 3);
    }

    #[test]
    fn badge_background_fills_the_center_and_skips_the_corners() {
        let badge = render_badge(40, 20, 6, Rgba([10, 10, 10, 200]), |_| {});
        assert_eq!(badge.get_pixel(20, 10)[3], 200);
        // The very corner pixel lies outside the rounded outline.
        assert_eq!(badge.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn missing_font_directory_is_a_processing_error() {
        let spec = WatermarkSpec {
            text: "hello".into(),
            font_size: None,
            font_color: None,
            font_family: None,
            background_color: None,
            padding: None,
            position: None,
        };
        let img = DynamicImage::ImageRgba8(RgbaImage::new(10, 10));
        assert!(matches!(
            apply(img, &spec, None),
            Err(TransformError::Processing(_))
        ));
    }
}
