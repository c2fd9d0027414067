//! Bounded TTL cache mapping cache keys to output descriptors.
//!
//! Eviction is deterministic: when an insert pushes the cache past capacity,
//! the oldest-inserted live entry goes first. Expired entries are purged
//! lazily on access and before capacity checks. The cache is in-process and
//! infallible by construction; lookups and fills are best-effort from the
//! caller's point of view and can never fail a request.

use crate::jobs::OutputDescriptor;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry {
    image_id: String,
    value: OutputDescriptor,
    inserted_at: Instant,
    seq: u64,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Live (non-expired) entries; never exceeds `capacity`.
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct ResultCache {
    entries: DashMap<String, CacheEntry>,
    capacity: usize,
    default_ttl: Duration,
    seq: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResultCache {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            default_ttl,
            seq: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Lookup. Expired or absent keys are misses, never errors.
    pub fn get(&self, key: &str) -> Option<OutputDescriptor> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }
        // Drop the expired entry outside the read guard.
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or overwrite; whichever path (sync or worker) finishes a key
    /// first writes it, and a later writer simply wins.
    pub fn set(
        &self,
        key: &str,
        image_id: &str,
        value: OutputDescriptor,
        ttl: Option<Duration>,
    ) {
        let entry = CacheEntry {
            image_id: image_id.to_string(),
            value,
            inserted_at: Instant::now(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            ttl: ttl.unwrap_or(self.default_ttl),
        };
        self.entries.insert(key.to_string(), entry);
        self.enforce_capacity();
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry belonging to an image, used on deletion or re-upload.
    ///
    /// Keys carry an `img_<imageId>_` prefix, but the match is on the stored
    /// image id so that one id being a prefix of another cannot over-delete.
    pub fn delete_by_image(&self, image_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.image_id != image_id);
        before - self.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .count();
        CacheStats {
            entries: entries.min(self.capacity),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn enforce_capacity(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));

        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.seq)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    if self.entries.remove(&key).is_some() {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => break,
            }
        }
    }
}
