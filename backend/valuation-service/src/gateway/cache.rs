//! Sharded LRU prediction cache
//!
//! Keys are SHA-256 digests of the normalized payload, so the shard is picked
//! from the digest directly. Each shard is an independent `LruCache` behind its
//! own lock; unrelated keys only contend when they land on the same shard.

use event_schema::{ListingPayload, PredictionResult};
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::features;
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Digest of every payload field that can affect a prediction, taken over
    /// the same normalized form the feature vector is built from.
    pub fn from_payload(payload: &ListingPayload) -> Self {
        let p = features::normalize(payload);
        let bits = |value: Option<f64>| value.map(f64::to_bits);

        let digest_input = serde_json::json!({
            "district": p.district,
            "city": p.city,
            "town": p.town,
            "property_type": p.property_type,
            "area_sqm": bits(p.area_sqm),
            "gross_area_sqm": bits(p.gross_area_sqm),
            "net_area_sqm": bits(p.net_area_sqm),
            "rooms": p.rooms,
            "construction_year": p.construction_year,
            "energy_certificate": p.energy_certificate,
            "amenities": p.amenities,
            "published_at": p.published_at.map(|d| d.to_rfc3339()),
        });

        Self(Sha256::digest(digest_input.to_string().as_bytes()).into())
    }

    fn shard_index(&self, shards: usize) -> usize {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.0[..8]);
        (u64::from_be_bytes(prefix) % shards as u64) as usize
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Total entries across all shards
    pub capacity: usize,
    pub shards: usize,
    pub freshness: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            shards: 16,
            freshness: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
}

struct Entry {
    result: PredictionResult,
    stored_at: Instant,
}

pub struct PredictionCache {
    shards: Vec<Mutex<LruCache<CacheKey, Entry>>>,
    freshness: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
}

impl PredictionCache {
    pub fn new(config: &CacheConfig) -> Self {
        let shard_count = config.shards.max(1);
        let per_shard = NonZeroUsize::new(config.capacity.div_ceil(shard_count))
            .unwrap_or(NonZeroUsize::MIN);

        Self {
            shards: (0..shard_count)
                .map(|_| Mutex::new(LruCache::new(per_shard)))
                .collect(),
            freshness: config.freshness,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &CacheKey) -> &Mutex<LruCache<CacheKey, Entry>> {
        &self.shards[key.shard_index(self.shards.len())]
    }

    /// Fresh entry for `key`; stale entries are dropped, never served
    pub fn get(&self, key: &CacheKey) -> Option<PredictionResult> {
        let mut shard = self.shard(key).lock();

        let lookup = shard
            .get(key)
            .map(|entry| (entry.stored_at.elapsed() < self.freshness, entry.result.clone()));

        match lookup {
            Some((true, result)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
                Some(result)
            }
            Some((false, _)) => {
                shard.pop(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::CACHE_LOOKUPS.with_label_values(&["expired"]).inc();
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::CACHE_LOOKUPS.with_label_values(&["miss"]).inc();
                None
            }
        }
    }

    pub fn insert(&self, key: CacheKey, result: PredictionResult) {
        let entry = Entry {
            result,
            stored_at: Instant::now(),
        };

        let displaced = self.shard(&key).lock().push(key, entry);

        // push also hands back the previous value of the same key
        if matches!(displaced, Some((old, _)) if old != key) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            metrics::CACHE_EVICTIONS.inc();
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
