//! Geometric stages: crop, resize-fit policies, rotation, anchor math.

use crate::error::TransformError;
use crate::spec::{CropSpec, FitMode, Gravity, ResizeSpec};
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage, imageops};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};

/// Extract an axis-aligned rectangle. The rectangle must lie fully inside
/// the source; crop coordinates always address source pixel space.
pub fn crop(img: DynamicImage, spec: &CropSpec) -> Result<DynamicImage, TransformError> {
    let (src_w, src_h) = (img.width(), img.height());
    let right = spec.x.checked_add(spec.width);
    let bottom = spec.y.checked_add(spec.height);
    match (right, bottom) {
        (Some(right), Some(bottom)) if right <= src_w && bottom <= src_h => {
            Ok(img.crop_imm(spec.x, spec.y, spec.width, spec.height))
        }
        _ => Err(TransformError::Processing(format!(
            "crop rectangle {}x{} at ({}, {}) exceeds source bounds {}x{}",
            spec.width, spec.height, spec.x, spec.y, src_w, src_h
        ))),
    }
}

pub fn resize(img: DynamicImage, spec: &ResizeSpec) -> Result<DynamicImage, TransformError> {
    let (src_w, src_h) = (img.width(), img.height());
    let (mut target_w, mut target_h) = target_box(src_w, src_h, spec)?;

    if spec.without_enlargement == Some(true) {
        target_w = target_w.min(src_w);
        target_h = target_h.min(src_h);
    }

    let sx = target_w as f64 / src_w as f64;
    let sy = target_h as f64 / src_h as f64;
    let gravity = spec.position.unwrap_or_default();

    let out = match spec.fit.unwrap_or_default() {
        FitMode::Fill => img.resize_exact(target_w, target_h, FilterType::Lanczos3),
        FitMode::Cover => {
            let scale = sx.max(sy);
            let (sw, sh) = scaled_dims(src_w, src_h, scale);
            let scaled = img.resize_exact(sw.max(target_w), sh.max(target_h), FilterType::Lanczos3);
            let (cx, cy) = anchor_offset(
                gravity,
                (scaled.width(), scaled.height()),
                (target_w, target_h),
                0,
            );
            scaled.crop_imm(cx, cy, target_w, target_h)
        }
        FitMode::Contain => {
            let scale = sx.min(sy);
            let (sw, sh) = scaled_dims(src_w, src_h, scale);
            let scaled = img.resize_exact(sw.min(target_w), sh.min(target_h), FilterType::Lanczos3);
            let mut canvas = RgbaImage::from_pixel(target_w, target_h, Rgba([0, 0, 0, 0]));
            let (px, py) = anchor_offset(
                gravity,
                (target_w, target_h),
                (scaled.width(), scaled.height()),
                0,
            );
            imageops::overlay(&mut canvas, &scaled.to_rgba8(), px as i64, py as i64);
            DynamicImage::ImageRgba8(canvas)
        }
        FitMode::Inside => {
            let scale = sx.min(sy);
            let (sw, sh) = scaled_dims(src_w, src_h, scale);
            img.resize_exact(sw.min(target_w), sh.min(target_h), FilterType::Lanczos3)
        }
        FitMode::Outside => {
            let scale = sx.max(sy);
            let (sw, sh) = scaled_dims(src_w, src_h, scale);
            img.resize_exact(sw.max(target_w), sh.max(target_h), FilterType::Lanczos3)
        }
    };
    Ok(out)
}

/// Rotate about the image center. Cardinal angles map to lossless quarter
/// turns; anything else expands the canvas first so no corner is clipped,
/// filling the exposed area with transparent pixels.
pub fn rotate(img: DynamicImage, degrees: i32) -> DynamicImage {
    match degrees.rem_euclid(360) {
        0 => img,
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        other => rotate_arbitrary(img, other as f32),
    }
}

fn rotate_arbitrary(img: DynamicImage, degrees: f32) -> DynamicImage {
    let theta = degrees.to_radians();
    let (w, h) = (img.width() as f32, img.height() as f32);
    let (sin, cos) = (theta.sin().abs(), theta.cos().abs());
    let out_w = (w * cos + h * sin).ceil() as u32;
    let out_h = (w * sin + h * cos).ceil() as u32;

    let fill = Rgba([0u8, 0, 0, 0]);
    let mut canvas = RgbaImage::from_pixel(out_w, out_h, fill);
    let dx = ((out_w - img.width()) / 2) as i64;
    let dy = ((out_h - img.height()) / 2) as i64;
    imageops::overlay(&mut canvas, &img.to_rgba8(), dx, dy);

    let rotated = rotate_about_center(&canvas, theta, Interpolation::Bilinear, fill);
    DynamicImage::ImageRgba8(rotated)
}

/// Top-left offset that places `inner` inside `outer` at the given anchor,
/// inset by `margin` on the anchored edges. Offsets saturate at zero when
/// the inner box does not fit.
pub fn anchor_offset(
    gravity: Gravity,
    outer: (u32, u32),
    inner: (u32, u32),
    margin: u32,
) -> (u32, u32) {
    let (ow, oh) = outer;
    let (iw, ih) = inner;
    let center_x = (ow.saturating_sub(iw)) / 2;
    let center_y = (oh.saturating_sub(ih)) / 2;
    let right_x = ow.saturating_sub(iw + margin);
    let bottom_y = oh.saturating_sub(ih + margin);

    match gravity {
        Gravity::TopLeft => (margin, margin),
        Gravity::Top => (center_x, margin),
        Gravity::TopRight => (right_x, margin),
        Gravity::Left => (margin, center_y),
        Gravity::Center => (center_x, center_y),
        Gravity::Right => (right_x, center_y),
        Gravity::BottomLeft => (margin, bottom_y),
        Gravity::Bottom => (center_x, bottom_y),
        Gravity::BottomRight => (right_x, bottom_y),
    }
}

fn target_box(src_w: u32, src_h: u32, spec: &ResizeSpec) -> Result<(u32, u32), TransformError> {
    match (spec.width, spec.height) {
        (Some(w), Some(h)) => Ok((w, h)),
        (Some(w), None) => {
            let h = (src_h as f64 * w as f64 / src_w as f64).round().max(1.0) as u32;
            Ok((w, h))
        }
        (None, Some(h)) => {
            let w = (src_w as f64 * h as f64 / src_h as f64).round().max(1.0) as u32;
            Ok((w, h))
        }
        (None, None) => Err(TransformError::Processing(
            "resize reached the executor without any target dimension".into(),
        )),
    }
}

fn scaled_dims(src_w: u32, src_h: u32, scale: f64) -> (u32, u32) {
    let w = (src_w as f64 * scale).round().max(1.0) as u32;
    let h = (src_h as f64 * scale).round().max(1.0) as u32;
    (w, h)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([10, 20, 30, 255])))
    }

    fn resize_spec(width: Option<u32>, height: Option<u32>, fit: FitMode) -> ResizeSpec {
        ResizeSpec {
            width,
            height,
            fit: Some(fit),
            position: None,
            without_enlargement: None,
        }
    }

    #[test]
    fn crop_inside_bounds_yields_the_rectangle() {
        let out = crop(
            source(100, 80),
            &CropSpec {
                x: 10,
                y: 20,
                width: 30,
                height: 40,
            },
        )
        .unwrap();
        assert_eq!((out.width(), out.height()), (30, 40));
    }

    #[test]
    fn crop_exceeding_bounds_fails() {
        let err = crop(
            source(100, 80),
            &CropSpec {
                x: 90,
                y: 0,
                width: 20,
                height: 10,
            },
        )
        .unwrap_err();
        assert!(matches!(err, TransformError::Processing(_)));
    }

    #[test]
    fn cover_produces_the_exact_box() {
        let out = resize(source(1000, 500), &resize_spec(Some(200), Some(200), FitMode::Cover))
            .unwrap();
        assert_eq!((out.width(), out.height()), (200, 200));
    }

    #[test]
    fn contain_letterboxes_to_the_exact_box() {
        let out = resize(source(1000, 500), &resize_spec(Some(200), Some(200), FitMode::Contain))
            .unwrap();
        assert_eq!((out.width(), out.height()), (200, 200));
        // Letterbox rows above and below the scaled content are transparent.
        let rgba = out.to_rgba8();
        assert_eq!(rgba.get_pixel(0, 0)[3], 0);
        assert_eq!(rgba.get_pixel(100, 100)[3], 255);
    }

    #[test]
    fn inside_preserves_aspect_within_the_box() {
        let out = resize(source(1000, 500), &resize_spec(Some(200), Some(200), FitMode::Inside))
            .unwrap();
        assert_eq!((out.width(), out.height()), (200, 100));
    }

    #[test]
    fn outside_covers_the_box_without_cropping() {
        let out = resize(source(1000, 500), &resize_spec(Some(200), Some(200), FitMode::Outside))
            .unwrap();
        assert_eq!((out.width(), out.height()), (400, 200));
    }

    #[test]
    fn single_dimension_preserves_aspect() {
        let out = resize(source(1000, 500), &resize_spec(Some(100), None, FitMode::Cover))
            .unwrap();
        assert_eq!((out.width(), out.height()), (100, 50));
    }

    #[test]
    fn without_enlargement_caps_at_source_resolution() {
        let spec = ResizeSpec {
            width: Some(4000),
            height: Some(2000),
            fit: Some(FitMode::Fill),
            position: None,
            without_enlargement: Some(true),
        };
        let out = resize(source(1000, 500), &spec).unwrap();
        assert_eq!((out.width(), out.height()), (1000, 500));
    }

    #[test]
    fn quarter_turns_swap_dimensions() {
        let out = rotate(source(100, 50), 90);
        assert_eq!((out.width(), out.height()), (50, 100));
        let out = rotate(source(100, 50), -90);
        assert_eq!((out.width(), out.height()), (50, 100));
        let out = rotate(source(100, 50), 180);
        assert_eq!((out.width(), out.height()), (100, 50));
    }

    #[test]
    fn diagonal_rotation_expands_the_canvas() {
        let out = rotate(source(100, 100), 45);
        assert!(out.width() >= 141 && out.width() <= 143);
        assert!(out.height() >= 141 && out.height() <= 143);
        // An exposed corner is transparent fill.
        assert_eq!(out.to_rgba8().get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn anchor_offsets_respect_margins() {
        assert_eq!(anchor_offset(Gravity::Center, (100, 100), (20, 10), 0), (40, 45));
        assert_eq!(
            anchor_offset(Gravity::BottomRight, (100, 100), (20, 10), 12),
            (68, 78)
        );
        assert_eq!(anchor_offset(Gravity::TopLeft, (100, 100), (20, 10), 12), (12, 12));
    }
}
