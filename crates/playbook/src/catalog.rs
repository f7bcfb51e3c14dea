// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Catalog entry lookup and the orchestrator's bounded, TTL'd playbook
//! cache (§3 "Catalog Entry", §4.5 "Catalog cache").
//!
//! Content fetch (resolving a `catalog_id` to playbook text) is an
//! external collaborator per spec.md §1 ("the catalog registration
//! workflow beyond content fetch" is out of scope); this module defines
//! the narrow [`CatalogFetcher`] boundary it's consumed through.

use crate::model::Playbook;
use crate::parser::{self, LoadError};
use lru::LruCache;
use noetl_core::Clock;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Versioned playbook identity: immutable per `(path, version)` (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct CatalogId(pub i64);

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub catalog_id: CatalogId,
    pub path: String,
    pub version: String,
    pub yaml: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog entry {0:?} not found")]
    NotFound(CatalogId),
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Narrow boundary to the catalog registration subsystem: given a
/// `catalog_id`, return its immutable `(path, version, yaml)` content.
pub trait CatalogFetcher: Send + Sync {
    fn fetch(&self, catalog_id: CatalogId) -> Result<CatalogEntry, CatalogError>;

    /// Resolve a `(path, version)` pair to its `catalog_id`, needed when a
    /// nested-playbook task names its child by path rather than by id.
    /// Default `None`: a fetcher that only ever sees pre-resolved ids
    /// (e.g. one backed purely by content fetch) need not implement this.
    fn resolve(&self, _path: &str, _version: &str) -> Option<CatalogId> {
        None
    }
}

/// In-memory fetcher backing both tests and any deployment that resolves
/// the catalog out of band (e.g. pre-loaded at startup).
#[derive(Default)]
pub struct StaticFetcher {
    entries: Mutex<std::collections::HashMap<CatalogId, CatalogEntry>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: CatalogEntry) {
        self.entries.lock().insert(entry.catalog_id, entry);
    }
}

impl CatalogFetcher for StaticFetcher {
    fn fetch(&self, catalog_id: CatalogId) -> Result<CatalogEntry, CatalogError> {
        self.entries.lock().get(&catalog_id).cloned().ok_or(CatalogError::NotFound(catalog_id))
    }

    fn resolve(&self, path: &str, version: &str) -> Option<CatalogId> {
        self.entries.lock().values().find(|e| e.path == path && e.version == version).map(|e| e.catalog_id)
    }
}

struct CacheEntry {
    playbook: Arc<Playbook>,
    inserted_at_ms: i64,
}

/// Bounded LRU (~100 entries) with a ~5-minute TTL of parsed playbooks by
/// `catalog_id` (§4.5 "Catalog cache"): cache miss fetches and parses
/// once; cache hit reuses the parsed [`Playbook`] arena.
pub struct CatalogCache<C: Clock> {
    fetcher: Arc<dyn CatalogFetcher>,
    clock: C,
    ttl_ms: i64,
    entries: Mutex<LruCache<CatalogId, CacheEntry>>,
}

pub const DEFAULT_CAPACITY: usize = 100;
pub const DEFAULT_TTL_MS: i64 = 5 * 60 * 1000;

impl<C: Clock> CatalogCache<C> {
    pub fn new(fetcher: Arc<dyn CatalogFetcher>, clock: C) -> Self {
        Self::with_capacity(fetcher, clock, DEFAULT_CAPACITY, DEFAULT_TTL_MS)
    }

    pub fn with_capacity(fetcher: Arc<dyn CatalogFetcher>, clock: C, capacity: usize, ttl_ms: i64) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN));
        Self { fetcher, clock, ttl_ms, entries: Mutex::new(LruCache::new(capacity)) }
    }

    /// Resolve `catalog_id` to its parsed playbook, fetching and parsing
    /// only on a cold or TTL-expired cache entry.
    pub fn get(&self, catalog_id: CatalogId) -> Result<Arc<Playbook>, CatalogError> {
        let now = self.clock.epoch_ms();
        {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get(&catalog_id) {
                if now - entry.inserted_at_ms < self.ttl_ms {
                    return Ok(entry.playbook.clone());
                }
            }
        }

        let raw = self.fetcher.fetch(catalog_id)?;
        let playbook = Arc::new(parser::load(&raw.path, &raw.version, &raw.yaml)?);
        self.entries.lock().put(catalog_id, CacheEntry { playbook: playbook.clone(), inserted_at_ms: now });
        Ok(playbook)
    }

    /// Resolve a `(path, version)` pair to its `catalog_id` via the
    /// underlying fetcher, bypassing the parsed-playbook cache.
    pub fn resolve(&self, path: &str, version: &str) -> Option<CatalogId> {
        self.fetcher.resolve(path, version)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noetl_core::FakeClock;

    const LINEAR: &str = r#"
entry_step: start
steps:
  start:
    is_end: true
"#;

    fn fetcher_with(id: CatalogId) -> Arc<StaticFetcher> {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.insert(CatalogEntry { catalog_id: id, path: "demo.yaml".into(), version: "1".into(), yaml: LINEAR.into() });
        fetcher
    }

    #[test]
    fn caches_parsed_playbook_across_calls() {
        let id = CatalogId(1);
        let fetcher = fetcher_with(id);
        let cache = CatalogCache::new(fetcher, FakeClock::new());
        let first = cache.get(id).unwrap();
        let second = cache.get(id).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn expires_entry_past_ttl() {
        let id = CatalogId(1);
        let fetcher = fetcher_with(id);
        let clock = FakeClock::new();
        let cache = CatalogCache::with_capacity(fetcher, clock.clone(), 10, 1000);
        let first = cache.get(id).unwrap();
        clock.advance(std::time::Duration::from_millis(2000));
        let second = cache.get(id).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_entry_is_an_error() {
        let fetcher: Arc<StaticFetcher> = Arc::new(StaticFetcher::new());
        let cache = CatalogCache::new(fetcher, FakeClock::new());
        assert!(matches!(cache.get(CatalogId(99)), Err(CatalogError::NotFound(_))));
    }
}
