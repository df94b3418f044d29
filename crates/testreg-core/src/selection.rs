//! Test selection.
//!
//! Picks exactly one eligible registry entry for an organization under a
//! [`Strategy`], then has the store record the use atomically. Cached picks
//! are served when still active; a candidate whose test has left the catalog
//! is healed away and selection is retried once.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::instrument;
use uuid::Uuid;

use crate::cache::SelectionCache;
use crate::consistency::ConsistencyChecker;
use crate::error::RegistryError;
use crate::model::{OrganizationId, RegistryEntry, Strategy};
use crate::store::RegistryStore;

/// Selection behaviour that varies per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionPolicy {
    /// Whether entries owned by `global_organization_id` are eligible for
    /// every organization.
    pub global_scope_enabled: bool,
    pub global_organization_id: OrganizationId,
    /// Whether a cache hit still records a use at the store.
    pub count_cache_hits: bool,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            global_scope_enabled: false,
            global_organization_id: 0,
            count_cache_hits: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Order candidates by preference for a deterministic strategy.
///
/// `balanced`: fewest uses first. `round_robin`: least recently used first,
/// never-used before everything. Ties go to the lower `test_id`. `random`
/// shuffles.
pub fn rank_candidates(candidates: &mut [RegistryEntry], strategy: Strategy) {
    match strategy {
        Strategy::Balanced => {
            candidates.sort_by(|a, b| {
                a.usage_count
                    .cmp(&b.usage_count)
                    .then_with(|| a.test_id.cmp(&b.test_id))
            });
        }
        Strategy::RoundRobin => {
            // `None < Some(_)`, so never-used entries sort first.
            candidates.sort_by(|a, b| {
                a.last_used
                    .cmp(&b.last_used)
                    .then_with(|| a.test_id.cmp(&b.test_id))
            });
        }
        Strategy::Random => candidates.shuffle(&mut rand::thread_rng()),
    }
}

/// Pick the single preferred candidate.
pub fn pick_candidate(candidates: &[RegistryEntry], strategy: Strategy) -> Option<&RegistryEntry> {
    match strategy {
        Strategy::Balanced => candidates
            .iter()
            .min_by(|a, b| {
                a.usage_count
                    .cmp(&b.usage_count)
                    .then_with(|| a.test_id.cmp(&b.test_id))
            }),
        Strategy::RoundRobin => candidates
            .iter()
            .min_by(|a, b| {
                a.last_used
                    .cmp(&b.last_used)
                    .then_with(|| a.test_id.cmp(&b.test_id))
            }),
        Strategy::Random => candidates.choose(&mut rand::thread_rng()),
    }
}

/// Strictly increasing usage timestamps within this process, so two picks
/// in the same clock tick still order for round-robin.
#[derive(Default)]
struct UsageClock {
    last_micros: AtomicI64,
}

impl UsageClock {
    fn stamp(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_micros();
        let prev = self
            .last_micros
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(now.max(prev + 1))
            })
            .unwrap_or_else(|prev| prev);
        DateTime::<Utc>::from_timestamp_micros(now.max(prev + 1)).unwrap_or_else(Utc::now)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

enum Attempt {
    Selected(RegistryEntry),
    Empty,
    Retry,
}

/// Chooses tests for organizations and records their use.
pub struct SelectionEngine {
    store: Arc<dyn RegistryStore>,
    checker: ConsistencyChecker,
    cache: Option<Arc<SelectionCache>>,
    policy: SelectionPolicy,
    clock: UsageClock,
    pending_usage: Mutex<Vec<JoinHandle<()>>>,
}

impl SelectionEngine {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        checker: ConsistencyChecker,
        cache: Option<Arc<SelectionCache>>,
        policy: SelectionPolicy,
    ) -> Self {
        Self {
            store,
            checker,
            cache,
            policy,
            clock: UsageClock::default(),
            pending_usage: Mutex::new(Vec::new()),
        }
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    pub fn cache(&self) -> Option<&Arc<SelectionCache>> {
        self.cache.as_ref()
    }

    fn check_scope(&self, organization_id: OrganizationId) -> Result<(), RegistryError> {
        let is_global =
            self.policy.global_scope_enabled && organization_id == self.policy.global_organization_id;
        if organization_id > 0 || is_global {
            Ok(())
        } else {
            Err(RegistryError::InvalidScope(organization_id))
        }
    }

    /// Whether entries owned by `owner` may be served to `organization_id`.
    fn serves(&self, organization_id: OrganizationId, owner: OrganizationId) -> bool {
        owner == organization_id
            || (self.policy.global_scope_enabled && owner == self.policy.global_organization_id)
    }

    /// Active entries an organization may receive.
    pub async fn eligible(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<RegistryEntry>, RegistryError> {
        self.check_scope(organization_id)?;
        let mut pool = self.store.list_entries(Some(organization_id)).await?;
        if self.policy.global_scope_enabled && organization_id != self.policy.global_organization_id {
            pool.extend(
                self.store
                    .list_entries(Some(self.policy.global_organization_id))
                    .await?,
            );
        }
        pool.retain(|e| e.is_active);
        Ok(pool)
    }

    /// Select one test and record its use.
    ///
    /// Returns [`RegistryError::NotFound`] when nothing is eligible.
    #[instrument(skip(self))]
    pub async fn select_test(
        &self,
        organization_id: OrganizationId,
        strategy: Strategy,
    ) -> Result<RegistryEntry, RegistryError> {
        self.check_scope(organization_id)?;

        if let Some(hit) = self.cached_selection(organization_id, strategy).await? {
            return Ok(hit);
        }

        let mut retried = false;
        loop {
            match self.attempt(organization_id, strategy).await? {
                Attempt::Selected(entry) => {
                    tracing::info!(
                        test_id = %entry.test_id,
                        organization_id,
                        %strategy,
                        usage_count = entry.usage_count,
                        "selected test"
                    );
                    if let Some(cache) = &self.cache {
                        cache.invalidate(organization_id);
                        cache.put(organization_id, strategy, entry.clone());
                    }
                    return Ok(entry);
                }
                Attempt::Retry if !retried => retried = true,
                Attempt::Retry | Attempt::Empty => {
                    tracing::warn!(organization_id, %strategy, "no tests available in registry");
                    return Err(RegistryError::NotFound {
                        organization_id,
                        strategy,
                    });
                }
            }
        }
    }

    async fn attempt(
        &self,
        organization_id: OrganizationId,
        strategy: Strategy,
    ) -> Result<Attempt, RegistryError> {
        let pool = self.eligible(organization_id).await?;
        let Some(candidate) = pick_candidate(&pool, strategy).map(|e| e.test_id) else {
            return Ok(Attempt::Empty);
        };

        if !self.store.catalog_contains(candidate).await? {
            tracing::error!(test_id = %candidate, "test exists in registry but not in catalog");
            self.checker.heal_entry(candidate).await?;
            self.forget(candidate);
            return Ok(Attempt::Retry);
        }

        match self.store.record_usage(candidate, self.clock.stamp()).await? {
            Some(entry) => Ok(Attempt::Selected(entry)),
            None => {
                tracing::warn!(test_id = %candidate, "candidate deactivated during selection, retrying");
                self.forget(candidate);
                Ok(Attempt::Retry)
            }
        }
    }

    /// Serve a cached pick if it is still active at the store and still
    /// owned by a scope the organization is served from.
    async fn cached_selection(
        &self,
        organization_id: OrganizationId,
        strategy: Strategy,
    ) -> Result<Option<RegistryEntry>, RegistryError> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        let Some(hit) = cache.get(organization_id, strategy) else {
            return Ok(None);
        };

        match self.store.get_entry(hit.test_id).await? {
            Some(current)
                if current.is_active && self.serves(organization_id, current.organization_id) =>
            {
                tracing::info!(test_id = %current.test_id, organization_id, "using cached test selection");
                if self.policy.count_cache_hits {
                    self.record_usage_in_background(current.test_id);
                }
                Ok(Some(current))
            }
            _ => {
                tracing::debug!(test_id = %hit.test_id, "cached selection no longer eligible");
                cache.evict(organization_id, strategy);
                Ok(None)
            }
        }
    }

    fn record_usage_in_background(&self, test_id: Uuid) {
        let store = Arc::clone(&self.store);
        let at = self.clock.stamp();
        let handle = tokio::spawn(async move {
            match store.record_usage(test_id, at).await {
                Ok(Some(_)) => {}
                Ok(None) => tracing::warn!(%test_id, "cache hit usage skipped, entry inactive"),
                Err(e) => tracing::error!(%test_id, "failed to record cache hit usage: {e}"),
            }
        });
        let mut pending = self.pending_usage.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Wait for usage recorded in the background by cache hits.
    pub async fn flush_pending_usage(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pending_usage.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("background usage task failed: {e}");
            }
        }
    }

    fn forget(&self, test_id: Uuid) {
        if let Some(cache) = &self.cache {
            cache.invalidate_test(test_id);
        }
    }

    /// Select up to `count` distinct tests, ordered by `strategy`, recording
    /// a use on each. Orphans met on the way are deactivated and skipped.
    /// Bypasses the cache.
    #[instrument(skip(self))]
    pub async fn select_many(
        &self,
        organization_id: OrganizationId,
        count: usize,
        strategy: Strategy,
    ) -> Result<Vec<RegistryEntry>, RegistryError> {
        let mut pool = self.eligible(organization_id).await?;
        if count == 0 {
            return Ok(Vec::new());
        }
        if pool.is_empty() {
            tracing::warn!(organization_id, "no tests available for organization");
            return Err(RegistryError::NotFound {
                organization_id,
                strategy,
            });
        }
        rank_candidates(&mut pool, strategy);

        let mut selected = Vec::with_capacity(count.min(pool.len()));
        for candidate in pool {
            if selected.len() == count {
                break;
            }
            if !self.store.catalog_contains(candidate.test_id).await? {
                tracing::error!(test_id = %candidate.test_id, "test exists in registry but not in catalog");
                self.checker.heal_entry(candidate.test_id).await?;
                continue;
            }
            if let Some(entry) = self
                .store
                .record_usage(candidate.test_id, self.clock.stamp())
                .await?
            {
                selected.push(entry);
            }
        }

        if let Some(cache) = &self.cache {
            cache.invalidate(organization_id);
        }
        tracing::info!(organization_id, selected = selected.len(), "selected tests for organization");
        Ok(selected)
    }
}
