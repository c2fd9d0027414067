//! Tone and color filters.
//!
//! Applied in one fixed sub-order regardless of how the spec was written:
//! grayscale -> sepia -> blur -> sharpen -> negate -> normalize -> gamma ->
//! brightness -> saturation -> hue.

use crate::common::{SHARPEN_SIGMA, SHARPEN_THRESHOLD};
use crate::spec::FilterSpec;
use image::{DynamicImage, Rgba, RgbaImage};

pub fn apply(mut img: DynamicImage, filters: &FilterSpec) -> DynamicImage {
    if filters.grayscale == Some(true) {
        img = img.grayscale();
    }
    if filters.sepia == Some(true) {
        img = DynamicImage::ImageRgba8(sepia(&img.to_rgba8()));
    }
    if let Some(radius) = filters.blur {
        // Zero radius is a no-op; the blur kernel degenerates there.
        if radius > 0.0 {
            img = img.blur(radius);
        }
    }
    if filters.sharpen == Some(true) {
        img = img.unsharpen(SHARPEN_SIGMA, SHARPEN_THRESHOLD);
    }
    if filters.negate == Some(true) {
        img.invert();
    }
    if filters.normalize == Some(true) {
        img = DynamicImage::ImageRgba8(normalize(&img.to_rgba8()));
    }
    if let Some(gamma) = filters.gamma {
        img = DynamicImage::ImageRgba8(apply_gamma(&img.to_rgba8(), gamma));
    }
    if let Some(brightness) = filters.brightness {
        img = DynamicImage::ImageRgba8(scale_brightness(&img.to_rgba8(), brightness));
    }
    if let Some(saturation) = filters.saturation {
        img = DynamicImage::ImageRgba8(scale_saturation(&img.to_rgba8(), saturation));
    }
    if let Some(degrees) = filters.hue {
        img = img.huerotate(degrees);
    }
    img
}

fn clamp_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn luma(pixel: &Rgba<u8>) -> f32 {
    0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32
}

/// Desaturation plus warm tint via the classic sepia matrix.
fn sepia(src: &RgbaImage) -> RgbaImage {
    map_pixels(src, |p| {
        let (r, g, b) = (p[0] as f32, p[1] as f32, p[2] as f32);
        Rgba([
            clamp_channel(0.393 * r + 0.769 * g + 0.189 * b),
            clamp_channel(0.349 * r + 0.686 * g + 0.168 * b),
            clamp_channel(0.272 * r + 0.534 * g + 0.131 * b),
            p[3],
        ])
    })
}

/// Linear contrast stretch over the joint RGB min/max, preserving hue.
fn normalize(src: &RgbaImage) -> RgbaImage {
    let mut min = u8::MAX;
    let mut max = u8::MIN;
    for pixel in src.pixels() {
        for channel in &pixel.0[..3] {
            min = min.min(*channel);
            max = max.max(*channel);
        }
    }
    if max <= min {
        return src.clone();
    }
    let range = (max - min) as f32;
    map_pixels(src, |p| {
        let stretch = |v: u8| clamp_channel((v.saturating_sub(min)) as f32 * 255.0 / range);
        Rgba([stretch(p[0]), stretch(p[1]), stretch(p[2]), p[3]])
    })
}

fn apply_gamma(src: &RgbaImage, gamma: f32) -> RgbaImage {
    let exponent = 1.0 / gamma;
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = clamp_channel(255.0 * (i as f32 / 255.0).powf(exponent));
    }
    map_pixels(src, |p| Rgba([lut[p[0] as usize], lut[p[1] as usize], lut[p[2] as usize], p[3]]))
}

fn scale_brightness(src: &RgbaImage, factor: f32) -> RgbaImage {
    map_pixels(src, |p| {
        Rgba([
            clamp_channel(p[0] as f32 * factor),
            clamp_channel(p[1] as f32 * factor),
            clamp_channel(p[2] as f32 * factor),
            p[3],
        ])
    })
}

fn scale_saturation(src: &RgbaImage, factor: f32) -> RgbaImage {
    map_pixels(src, |p| {
        let gray = luma(p);
        let mix = |v: u8| clamp_channel(gray + (v as f32 - gray) * factor);
        Rgba([mix(p[0]), mix(p[1]), mix(p[2]), p[3]])
    })
}

fn map_pixels(src: &RgbaImage, f: impl Fn(&Rgba<u8>) -> Rgba<u8>) -> RgbaImage {
    let mut out = src.clone();
    for pixel in out.pixels_mut() {
        *pixel = f(pixel);
    }
    out
}
