//! Short-lived memoization of selection results.
//!
//! Keyed by `(organization, strategy)`. Entries expire a fixed TTL after
//! insertion. The cache is advisory: whoever reads it must re-validate the
//! cached entry against the store before serving it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::model::{OrganizationId, RegistryEntry, Strategy};

/// Default time-to-live for a cached selection.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

struct Slot {
    entry: RegistryEntry,
    inserted_at: Instant,
}

/// Shared selection cache.
pub struct SelectionCache {
    ttl: Duration,
    slots: Mutex<HashMap<(OrganizationId, Strategy), Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub ttl_secs: u64,
    pub live_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl SelectionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a cached pick. Expired slots are dropped and count as a miss.
    pub fn get(&self, organization_id: OrganizationId, strategy: Strategy) -> Option<RegistryEntry> {
        let mut slots = self.slots.lock();
        let key = (organization_id, strategy);
        let fresh = match slots.get(&key) {
            Some(slot) if slot.inserted_at.elapsed() < self.ttl => Some(slot.entry.clone()),
            Some(_) => {
                slots.remove(&key);
                None
            }
            None => None,
        };
        match fresh {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(organization_id, %strategy, test_id = %entry.test_id, "selection cache hit");
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(organization_id, %strategy, "selection cache miss");
                None
            }
        }
    }

    /// Store a pick, replacing whatever was there.
    pub fn put(&self, organization_id: OrganizationId, strategy: Strategy, entry: RegistryEntry) {
        self.slots.lock().insert(
            (organization_id, strategy),
            Slot {
                entry,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop one `(organization, strategy)` slot.
    pub fn evict(&self, organization_id: OrganizationId, strategy: Strategy) {
        self.slots.lock().remove(&(organization_id, strategy));
    }

    /// Drop every slot of an organization, all strategies.
    pub fn invalidate(&self, organization_id: OrganizationId) {
        self.slots
            .lock()
            .retain(|(org, _), _| *org != organization_id);
    }

    /// Drop every slot that currently points at `test_id`.
    pub fn invalidate_test(&self, test_id: Uuid) {
        self.slots
            .lock()
            .retain(|_, slot| slot.entry.test_id != test_id);
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.slots.lock().clear();
        tracing::info!("selection cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let slots = self.slots.lock();
        CacheStats {
            ttl_secs: self.ttl.as_secs(),
            live_entries: slots
                .values()
                .filter(|s| s.inserted_at.elapsed() < self.ttl)
                .count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for SelectionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}
