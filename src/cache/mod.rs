//! # Cache Module
//!
//! Short-lived caching of provider search results.
//!
//! Free-text searches are the most expensive thing the resolver does: each
//! one spawns a `yt-dlp` process or hits a remote Invidious instance. Users
//! tend to repeat the same query within a few seconds (retyping `!play`,
//! several members asking for the same song), so results are kept for a
//! short time-to-live keyed by provider and normalized query.
//!
//! ## Configuration
//!
//! ```env
//! SEARCH_CACHE_TTL=5m         # Time-to-live for a cached search (0s disables it)
//! ```
//!
//! Only search results are cached. Resolved stream URLs expire on the
//! provider side and are never cached here.

pub mod lru_cache;

use lru_cache::{CacheMetrics, LRUCache};
use std::time::Duration;
use tracing::debug;

use crate::audio::track::Provider;
use crate::sources::Candidate;

/// Maximum number of distinct searches kept in memory.
pub const SEARCH_CACHE_CAPACITY: usize = 256;

/// Cache of search candidates keyed by `(provider, normalized query, limit)`.
#[derive(Debug, Clone)]
pub struct SearchCache {
    inner: LRUCache<(Provider, String, usize), Vec<Candidate>>,
}

impl SearchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: LRUCache::new(SEARCH_CACHE_CAPACITY, ttl),
        }
    }

    fn key(provider: Provider, query: &str, limit: usize) -> (Provider, String, usize) {
        let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        (provider, normalized, limit)
    }

    pub fn get(&self, provider: Provider, query: &str, limit: usize) -> Option<Vec<Candidate>> {
        let hit = self.inner.get(&Self::key(provider, query, limit));
        if hit.is_some() {
            debug!("📦 Búsqueda en cache ({}): {}", provider, query);
        }
        hit
    }

    /// Only non-empty result sets are stored.
    pub fn put(&self, provider: Provider, query: &str, limit: usize, candidates: &[Candidate]) {
        if !candidates.is_empty() {
            self.inner
                .insert(Self::key(provider, query, limit), candidates.to_vec());
        }
    }

    pub fn cleanup(&self) -> usize {
        self.inner.cleanup_expired()
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.inner.metrics()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
