//! # Response Cache
//!
//! TTL-bounded memo of successful provider responses, keyed by a SHA-256
//! digest of (provider id, capability, payload bytes). Entries live in a
//! sharded concurrent map; simultaneous `put`s for one key are last-writer-wins.
//!
//! Eviction scans for the least-recently-used entry (expired entries go
//! first), which is linear in the capacity.

use crate::types::ProviderId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Deterministic cache key (hex-encoded SHA-256)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(pub String);

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A memoized provider response
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Provider that produced the response
    pub provider: ProviderId,
    pub response: serde_json::Value,
    pub created_at: Instant,
    pub ttl: Duration,
    /// Reuses served so far, including the one returning this copy
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) < self.ttl
    }
}

/// Cache counters for the health report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
struct Slot {
    provider: ProviderId,
    response: serde_json::Value,
    created_at: Instant,
    ttl: Duration,
    hits: AtomicU64,
    /// Logical clock value of the last access, for LRU ordering
    last_access: AtomicU64,
}

impl Slot {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) < self.ttl
    }
}

/// Concurrent TTL + LRU response cache
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<CacheKey, Slot>,
    capacity: usize,
    tick: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            tick: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Derive the key for a (provider, capability, payload) triple.
    ///
    /// Pure: each field is length-prefixed before hashing so that field
    /// boundaries cannot collide (`("ab", "c")` differs from `("a", "bc")`).
    pub fn key_for(provider: &ProviderId, capability: &str, payload: &[u8]) -> CacheKey {
        let mut hasher = Sha256::new();
        for field in [provider.as_str().as_bytes(), capability.as_bytes(), payload] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field);
        }
        CacheKey(hex::encode(hasher.finalize()))
    }

    /// Key for a JSON payload, using its compact serialized text as the blob
    pub fn key_for_json(
        provider: &ProviderId,
        capability: &str,
        payload: &serde_json::Value,
    ) -> CacheKey {
        Self::key_for(provider, capability, payload.to_string().as_bytes())
    }

    /// Look up a fresh entry. Misses and expired entries return `None`.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = Instant::now();

        if let Some(slot) = self.entries.get(key) {
            if slot.is_fresh(now) {
                let hit_count = slot.hits.fetch_add(1, Ordering::Relaxed) + 1;
                slot.last_access.store(self.next_tick(), Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);

                return Some(CacheEntry {
                    key: key.clone(),
                    provider: slot.provider.clone(),
                    response: slot.response.clone(),
                    created_at: slot.created_at,
                    ttl: slot.ttl,
                    hit_count,
                });
            }
        }

        // The read guard must be released before removing from the same shard
        if self
            .entries
            .remove_if(key, |_, slot| !slot.is_fresh(now))
            .is_some()
        {
            debug!(key = %key, "Dropped expired cache entry");
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or overwrite an entry. A zero TTL or zero capacity stores nothing.
    pub fn put(&self, key: CacheKey, provider: ProviderId, response: serde_json::Value, ttl: Duration) {
        if ttl.is_zero() || self.capacity == 0 {
            return;
        }

        let slot = Slot {
            provider,
            response,
            created_at: Instant::now(),
            ttl,
            hits: AtomicU64::new(0),
            last_access: AtomicU64::new(self.next_tick()),
        };
        self.entries.insert(key.clone(), slot);

        while self.entries.len() > self.capacity {
            if !self.evict_one(&key) {
                break;
            }
        }
    }

    /// Remove one entry, never the one just written
    fn evict_one(&self, keep: &CacheKey) -> bool {
        let now = Instant::now();
        let victim = self
            .entries
            .iter()
            .filter(|entry| entry.key() != keep)
            .min_by_key(|entry| {
                let slot = entry.value();
                // Expired entries sort before every live one
                let rank = if slot.is_fresh(now) { 1u8 } else { 0u8 };
                (rank, slot.last_access.load(Ordering::Relaxed))
            })
            .map(|entry| entry.key().clone());

        match victim {
            Some(victim) => {
                if self.entries.remove(&victim).is_some() {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %victim, "Evicted cache entry");
                }
                true
            }
            None => false,
        }
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.is_fresh(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }
}
