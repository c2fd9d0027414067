pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 3;

pub const DEFAULT_WORKER_COUNT: usize = 2;

pub const DEFAULT_QUEUE_BACKOFF_MS: u64 = 2000;

/// Encoding quality when the spec asks for neither `quality` nor `compress`.
pub const DEFAULT_QUALITY: u8 = 80;

/// Encoding quality implied by the `compress` shorthand.
pub const COMPRESSED_QUALITY: u8 = 60;

/// Upper bound for any requested dimension, in pixels.
pub const MAX_DIMENSION: u32 = 10_000;

pub const DEFAULT_WATERMARK_FONT_SIZE: u32 = 24;

pub const DEFAULT_WATERMARK_PADDING: u32 = 8;

/// Distance between a watermark badge and the image edge it anchors to.
pub const WATERMARK_MARGIN: u32 = 12;

pub const SHARPEN_SIGMA: f32 = 1.0;

pub const SHARPEN_THRESHOLD: i32 = 1;

pub const VALID_IMAGE_EXTENSIONS: &'static [&'static str] = &[
    "jpg", "jpeg", "jfif", "jpe", "png", "tif", "tiff", "webp", "bmp", "gif",
];
