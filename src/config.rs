//! Environment-driven configuration.
//!
//! Every tunable lives in one serde struct deserialized from `MORPHO_*`
//! variables; `.env` is loaded first by the binary so local overrides work
//! without exporting anything.

use crate::common::{
    DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL_SECS, DEFAULT_MAX_DELIVERY_ATTEMPTS,
    DEFAULT_QUEUE_BACKOFF_MS, DEFAULT_WORKER_COUNT,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the redb files (`metadata.redb`, `queue.redb`).
    pub data_dir: PathBuf,
    /// Root of the blob store; originals and derivatives live below it.
    pub storage_root: PathBuf,
    /// Directory searched for watermark fonts (`<family>.ttf` / `.otf`).
    pub font_dir: Option<PathBuf>,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    pub worker_count: usize,
    /// Delivery budget per job message before it dead-letters.
    pub max_delivery_attempts: u32,
    /// Fixed backoff between queue open attempts.
    pub queue_backoff_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            storage_root: PathBuf::from("./storage"),
            font_dir: None,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            worker_count: DEFAULT_WORKER_COUNT,
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            queue_backoff_ms: DEFAULT_QUEUE_BACKOFF_MS,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        envy::prefixed("MORPHO_")
            .from_env::<AppConfig>()
            .context("failed to read MORPHO_* configuration from the environment")
    }
}
