//! Memoized query plans keyed by raw query text.
//!
//! A [`QueryPlanCache`] maps the exact text of a client query document to
//! the plan produced by parsing it. The first request for a text pays for
//! the parse; every later request gets the stored plan back.
//!
//! # Concurrency
//!
//! There is no per-key lock around the computation. When several tasks
//! miss on the same key at once, each of them computes, and the first one
//! to finish publishes its plan through an atomic insert-if-absent. The
//! others throw their own result away and return the published one, so
//! every caller observes the same `Arc<P>`. Redundant work is bounded by
//! the number of callers racing on a cold key and is counted in
//! [`PlanCacheStats::discarded`].
//!
//! Failed plans (for instance a parse error) are ordinary values of `P` and
//! are cached and replayed like successful ones.
//!
//! Entries are never evicted. The key space is the set of distinct query
//! documents clients send, which is small for a fixed schema.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tracing::debug;

/// Errors from [`QueryPlanCache::get_or_compute_blocking`].
#[derive(Debug, thiserror::Error)]
pub enum PlanCacheError {
    /// The blocking computation panicked or was cancelled; nothing was cached.
    #[error("plan computation aborted: {0}")]
    ComputeAborted(String),
}

/// Point-in-time counters for a [`QueryPlanCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanCacheStats {
    /// Number of cached plans.
    pub entries: usize,
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that had to compute.
    pub misses: u64,
    /// Computations whose result lost the publish race and was dropped.
    pub discarded: u64,
}

/// Concurrent memo table from query text to plan.
#[derive(Debug)]
pub struct QueryPlanCache<P> {
    entries: DashMap<String, Arc<P>>,
    hits: AtomicU64,
    misses: AtomicU64,
    discarded: AtomicU64,
}

impl<P> QueryPlanCache<P> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Return the cached plan for `key` without computing anything.
    ///
    /// Does not touch the hit/miss counters.
    pub fn get(&self, key: &str) -> Option<Arc<P>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Return the plan for `key`, computing it with `compute` on a miss.
    ///
    /// `compute` runs on the calling task. Use
    /// [`get_or_compute_blocking`](Self::get_or_compute_blocking) for
    /// CPU-heavy work.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Arc<P>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = P>,
    {
        if let Some(plan) = self.lookup(key) {
            return plan;
        }
        debug!(key_len = key.len(), "query plan cache miss, computing");
        let plan = compute().await;
        self.publish(key, plan)
    }

    /// Like [`get_or_compute`](Self::get_or_compute), but runs `compute`
    /// on tokio's blocking pool so parsing never occupies an I/O worker.
    ///
    /// # Errors
    ///
    /// Returns [`PlanCacheError::ComputeAborted`] if `compute` panicked or
    /// the blocking task was cancelled. The key stays uncached.
    pub async fn get_or_compute_blocking<F>(
        &self,
        key: &str,
        compute: F,
    ) -> Result<Arc<P>, PlanCacheError>
    where
        F: FnOnce() -> P + Send + 'static,
        P: Send + 'static,
    {
        if let Some(plan) = self.lookup(key) {
            return Ok(plan);
        }
        debug!(key_len = key.len(), "query plan cache miss, computing off-thread");
        let plan = tokio::task::spawn_blocking(compute)
            .await
            .map_err(|e| PlanCacheError::ComputeAborted(e.to_string()))?;
        Ok(self.publish(key, plan))
    }

    /// Number of cached plans.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot the counters.
    pub fn stats(&self) -> PlanCacheStats {
        PlanCacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    fn lookup(&self, key: &str) -> Option<Arc<P>> {
        let found = self.get(key);
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Insert `plan` unless another caller got there first; either way
    /// return the plan that is now stored.
    fn publish(&self, key: &str, plan: P) -> Arc<P> {
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(existing) => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                debug!(key_len = key.len(), "lost plan publish race, discarding result");
                Arc::clone(existing.get())
            }
            Entry::Vacant(slot) => {
                let stored = slot.insert(Arc::new(plan));
                debug!(key_len = key.len(), "query plan cached");
                Arc::clone(stored.value())
            }
        }
    }
}

impl<P> Default for QueryPlanCache<P> {
    fn default() -> Self {
        Self::new()
    }
}
