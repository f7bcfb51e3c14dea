// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Bounded, content-addressed LRU cache of compiled expressions (§4.4
//! "Bounded template cache"). Three disjoint instances are created by the
//! call sites that need one — orchestrator admission/arc evaluation,
//! playbook-engine render, worker outcome evaluation — so a cache-size
//! pressure spike in one evaluator can never evict entries another
//! evaluator depends on.

use super::expr::Expr;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default capacity per spec.md §4.4 ("target max ~500 entries").
pub const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A named, bounded LRU of source text -> parsed [`Expr`]. Named so logs
/// and `/metrics`-style exports can attribute hit rate to a call site.
pub struct TemplateCache {
    name: &'static str,
    entries: Mutex<LruCache<String, Expr>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TemplateCache {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN));
        Self {
            name,
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fetch the parsed expression for `source`, parsing and inserting on
    /// miss via `parse`.
    pub fn get_or_parse<E>(
        &self,
        source: &str,
        parse: impl FnOnce(&str) -> Result<Expr, E>,
    ) -> Result<Expr, E> {
        let mut entries = self.entries.lock();
        if let Some(expr) = entries.get(source) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(expr.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let was_full = entries.len() == entries.cap().get();
        drop(entries);

        let expr = parse(source)?;

        let mut entries = self.entries.lock();
        if was_full && !entries.contains(source) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        entries.put(source.to_string(), expr.clone());
        Ok(expr)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.lock().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
