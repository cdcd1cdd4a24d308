//! Optional TTL cache of model completions, consulted before any rate budget is spent.

mod key;

pub use key::cache_key;

use crate::providers::Provider;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedCompletion {
    pub text: String,
    pub provider: Provider,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

type Entries = HashMap<String, (CachedCompletion, Instant)>;

fn purge_expired(entries: &mut Entries, ttl: Duration) -> usize {
    let before = entries.len();
    entries.retain(|_, (_, stored)| stored.elapsed() < ttl);
    before - entries.len()
}

#[derive(Debug)]
pub struct PromptCache {
    ttl: Duration,
    entries: Mutex<Entries>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PromptCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<CachedCompletion> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let hit = match entries.get(key) {
            Some((value, stored)) if stored.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        };
        let counter = if hit.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        hit
    }

    /// Stores a completion and drops every entry that has outlived the TTL.
    pub fn put(&self, key: String, value: CachedCompletion) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let purged = purge_expired(&mut entries, self.ttl);
        if purged > 0 {
            debug!(purged, "expired prompt cache entries removed");
        }
        entries.insert(key, (value, Instant::now()));
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
