//! End-to-end registry tests: selection, healing, caching and health scoring
//! against the in-memory store.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use testreg_core::config::{CleanupConfig, RegistryConfig};
use testreg_core::consistency::ORPHAN_DEACTIVATION_REASON;
use testreg_core::health::{HealthStatus, Recommendation};
use testreg_core::model::{CatalogTest, EntryUpdate, OrganizationId, RegistryEntry, Strategy};
use testreg_core::service::{Registration, RegistryService};
use testreg_core::store::RegistryStore;
use testreg_core::{RegistryError, StoreError};
use testreg_store::MemoryStore;

const A: u128 = 1;
const B: u128 = 2;
const C: u128 = 3;
const D: u128 = 4;

fn id(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

fn catalog_test(n: u128, org: OrganizationId) -> CatalogTest {
    CatalogTest {
        test_id: id(n),
        test_name: format!("Test {n}"),
        organization_id: org,
    }
}

fn config(cache: bool) -> RegistryConfig {
    let mut config = RegistryConfig::default();
    config.cache.enabled = cache;
    config
}

/// Put tests into both the catalog and the registry.
async fn seed(store: &MemoryStore, org: OrganizationId, ids: &[u128]) {
    for &n in ids {
        store.upsert_catalog_test(catalog_test(n, org)).await;
        store
            .create_entry(RegistryEntry::from_catalog(&catalog_test(n, org)))
            .await
            .unwrap();
    }
}

fn service(store: &Arc<MemoryStore>, config: RegistryConfig) -> RegistryService {
    RegistryService::new(store.clone(), config)
}

async fn usage(store: &MemoryStore, n: u128) -> u64 {
    store.get_entry(id(n)).await.unwrap().unwrap().usage_count
}

// --- Consistency ---

/// Catalog {A,B,C}; registry {A,B} plus orphan D.
async fn drifted_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[A, B]).await;
    store.upsert_catalog_test(catalog_test(C, 1)).await;
    store
        .create_entry(RegistryEntry::new(id(D), "Deleted test", 1))
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn validate_reports_orphans_and_unregistered() {
    let store = drifted_store().await;
    let registry = service(&store, config(false));

    let report = registry.validate_only(None).await.unwrap();
    assert_eq!(report.orphaned, vec![id(D)]);
    assert_eq!(report.unregistered, vec![id(C)]);
    assert_eq!(report.active_count, 3);
    assert_eq!(report.total_registry_count, 3);
    assert_eq!(report.total_catalog_count, 3);

    let again = registry.validate_only(None).await.unwrap();
    assert_eq!(report, again);
}

#[tokio::test]
async fn heal_reconciles_and_is_idempotent() {
    let store = drifted_store().await;
    let registry = service(&store, config(false));

    let first = registry.heal(None).await.unwrap();
    assert_eq!(first.deactivated, 1);
    assert_eq!(first.created, 1);

    let d = store.get_entry(id(D)).await.unwrap().unwrap();
    assert!(!d.is_active);
    assert_eq!(d.deactivation_reason.as_deref(), Some(ORPHAN_DEACTIVATION_REASON));

    let c = store.get_entry(id(C)).await.unwrap().unwrap();
    assert!(c.is_active);
    assert_eq!(c.usage_count, 0);

    let active: HashSet<Uuid> = store
        .list_entries(None)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.is_active)
        .map(|e| e.test_id)
        .collect();
    assert_eq!(active, HashSet::from([id(A), id(B), id(C)]));

    let second = registry.heal(None).await.unwrap();
    assert!(second.is_noop());

    let report = registry.validate_only(None).await.unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.inactive_orphans, vec![id(D)]);
}

#[tokio::test]
async fn scoped_validation_ignores_other_organizations() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[A]).await;
    seed(&store, 2, &[B]).await;
    store.upsert_catalog_test(catalog_test(C, 2)).await;

    let registry = service(&store, config(false));
    let org1 = registry.validate_only(Some(1)).await.unwrap();
    assert!(org1.is_consistent());
    assert_eq!(org1.total_catalog_count, 1);

    let org2 = registry.validate_only(Some(2)).await.unwrap();
    assert_eq!(org2.unregistered, vec![id(C)]);
}

// --- Selection ---

#[tokio::test]
async fn balanced_spreads_load_evenly() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[A, B, C]).await;
    let registry = service(&store, config(false));

    let mut picks = Vec::new();
    for _ in 0..9 {
        picks.push(registry.select_test(1, Strategy::Balanced).await.unwrap().test_id);
    }

    assert_eq!(&picks[..3], &[id(A), id(B), id(C)]);
    for n in [A, B, C] {
        assert_eq!(usage(&store, n).await, 3);
    }
}

#[tokio::test]
async fn balanced_prefers_newly_registered_test() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[A, B]).await;
    let registry = service(&store, config(false));
    for _ in 0..4 {
        registry.select_test(1, Strategy::Balanced).await.unwrap();
    }

    store.upsert_catalog_test(catalog_test(D, 1)).await;
    assert_eq!(
        registry.register_test(&catalog_test(D, 1)).await.unwrap(),
        Registration::Created
    );

    for _ in 0..2 {
        let picked = registry.select_test(1, Strategy::Balanced).await.unwrap();
        assert_eq!(picked.test_id, id(D));
    }
}

#[tokio::test]
async fn round_robin_visits_every_entry_before_repeating() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[A, B, C, D]).await;
    let registry = service(&store, config(false));

    let mut first = Vec::new();
    for _ in 0..4 {
        first.push(registry.select_test(1, Strategy::RoundRobin).await.unwrap().test_id);
    }
    let distinct: HashSet<Uuid> = first.iter().copied().collect();
    assert_eq!(distinct.len(), 4);

    let mut second = Vec::new();
    for _ in 0..4 {
        second.push(registry.select_test(1, Strategy::RoundRobin).await.unwrap().test_id);
    }
    assert_eq!(first, second);
}

#[tokio::test]
async fn random_only_returns_eligible_entries() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[A, B]).await;
    seed(&store, 2, &[C]).await;
    let registry = service(&store, config(false));
    registry.deactivate(id(B), "maintenance").await.unwrap();

    for _ in 0..20 {
        let picked = registry.select_test(1, Strategy::Random).await.unwrap();
        assert_eq!(picked.test_id, id(A));
    }
    assert_eq!(usage(&store, B).await, 0);
}

#[tokio::test]
async fn deactivated_entry_is_never_selected() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[A, B]).await;
    let registry = service(&store, config(true));

    registry.select_test(1, Strategy::Balanced).await.unwrap();
    registry.deactivate(id(A), "broken audio").await.unwrap();

    for strategy in Strategy::ALL {
        for _ in 0..3 {
            let picked = registry.select_test(1, strategy).await.unwrap();
            assert_eq!(picked.test_id, id(B));
        }
    }
    assert_eq!(usage(&store, A).await, 1);
}

#[tokio::test]
async fn empty_pool_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let registry = service(&store, config(true));

    let err = registry.select_test(1, Strategy::Balanced).await.unwrap_err();
    assert!(matches!(
        err,
        RegistryError::NotFound {
            organization_id: 1,
            strategy: Strategy::Balanced
        }
    ));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn non_positive_scope_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let registry = service(&store, config(false));

    let err = registry.select_test(0, Strategy::Balanced).await.unwrap_err();
    assert!(matches!(err, RegistryError::InvalidScope(0)));
    assert!(err.is_configuration());
}

#[tokio::test]
async fn global_scope_is_opt_in() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 0, &[A]).await;

    let scoped = service(&store, config(false));
    assert!(matches!(
        scoped.select_test(5, Strategy::Balanced).await,
        Err(RegistryError::NotFound { .. })
    ));

    let mut global = config(false);
    global.selection.global_scope_enabled = true;
    let shared = service(&store, global);
    let picked = shared.select_test(5, Strategy::Balanced).await.unwrap();
    assert_eq!(picked.test_id, id(A));
}

#[tokio::test]
async fn orphan_candidate_is_healed_and_selection_retried() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[B]).await;
    // A sorts first under balanced but is missing from the catalog.
    store
        .create_entry(RegistryEntry::new(id(A), "Gone", 1))
        .await
        .unwrap();
    let registry = service(&store, config(false));

    let picked = registry.select_test(1, Strategy::Balanced).await.unwrap();
    assert_eq!(picked.test_id, id(B));

    let a = store.get_entry(id(A)).await.unwrap().unwrap();
    assert!(!a.is_active);
    assert_eq!(a.usage_count, 0);
}

#[tokio::test]
async fn only_orphans_yields_not_found_after_one_retry() {
    let store = Arc::new(MemoryStore::new());
    for n in [A, B, C] {
        store
            .create_entry(RegistryEntry::new(id(n), "Gone", 1))
            .await
            .unwrap();
    }
    let registry = service(&store, config(false));

    let err = registry.select_test(1, Strategy::Balanced).await.unwrap_err();
    assert!(matches!(err, RegistryError::NotFound { .. }));
    // One attempt plus one retry healed two orphans; the third is untouched.
    let inactive = store
        .list_entries(None)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| !e.is_active)
        .count();
    assert_eq!(inactive, 2);
}

/// Deactivates `target` the first time selection checks it against the
/// catalog, as a heal running concurrently would.
struct RacingStore {
    inner: Arc<MemoryStore>,
    target: Uuid,
    fired: AtomicBool,
}

#[async_trait]
impl RegistryStore for RacingStore {
    async fn list_entries(
        &self,
        scope: Option<OrganizationId>,
    ) -> Result<Vec<RegistryEntry>, StoreError> {
        self.inner.list_entries(scope).await
    }

    async fn get_entry(&self, test_id: Uuid) -> Result<Option<RegistryEntry>, StoreError> {
        self.inner.get_entry(test_id).await
    }

    async fn create_entry(&self, entry: RegistryEntry) -> Result<RegistryEntry, StoreError> {
        self.inner.create_entry(entry).await
    }

    async fn update_entry(
        &self,
        test_id: Uuid,
        update: EntryUpdate,
    ) -> Result<RegistryEntry, StoreError> {
        self.inner.update_entry(test_id, update).await
    }

    async fn record_usage(
        &self,
        test_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<RegistryEntry>, StoreError> {
        self.inner.record_usage(test_id, at).await
    }

    async fn list_catalog(
        &self,
        scope: Option<OrganizationId>,
    ) -> Result<Vec<CatalogTest>, StoreError> {
        self.inner.list_catalog(scope).await
    }

    async fn catalog_contains(&self, test_id: Uuid) -> Result<bool, StoreError> {
        if test_id == self.target && !self.fired.swap(true, Ordering::SeqCst) {
            self.inner
                .update_entry(test_id, EntryUpdate::deactivate("concurrent heal"))
                .await?;
        }
        self.inner.catalog_contains(test_id).await
    }
}

#[tokio::test]
async fn selection_racing_a_deactivation_is_retried() {
    let inner = Arc::new(MemoryStore::new());
    seed(&inner, 1, &[A, B]).await;
    let store = Arc::new(RacingStore {
        inner: inner.clone(),
        target: id(A),
        fired: AtomicBool::new(false),
    });
    let registry = RegistryService::new(store, config(false));

    let picked = registry.select_test(1, Strategy::Balanced).await.unwrap();
    assert_eq!(picked.test_id, id(B));
    assert_eq!(usage(&inner, A).await, 0);
    assert_eq!(usage(&inner, B).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_selections_are_all_counted() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[A, B, C, D]).await;
    let registry = Arc::new(service(&store, config(false)));

    let selections = (0..40).map(|_| {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.select_test(1, Strategy::Balanced).await })
    });
    for result in futures::future::join_all(selections).await {
        result.unwrap().unwrap();
    }

    let mut total = 0;
    for n in [A, B, C, D] {
        total += usage(&store, n).await;
    }
    assert_eq!(total, 40);
}

#[tokio::test]
async fn select_many_returns_distinct_entries_and_skips_orphans() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[B, C, D]).await;
    store
        .create_entry(RegistryEntry::new(id(A), "Gone", 1))
        .await
        .unwrap();
    let registry = service(&store, config(true));

    let picked = registry.select_many(1, 2, Strategy::Balanced).await.unwrap();
    let ids: Vec<Uuid> = picked.iter().map(|e| e.test_id).collect();
    assert_eq!(ids, vec![id(B), id(C)]);
    assert!(!store.get_entry(id(A)).await.unwrap().unwrap().is_active);

    let all = registry.select_many(1, 10, Strategy::Balanced).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(registry.select_many(1, 0, Strategy::Random).await.unwrap().is_empty());
}

// --- Cache ---

#[tokio::test]
async fn cache_hit_skips_usage_increment_by_default() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[A, B]).await;
    let registry = service(&store, config(true));

    let first = registry.select_test(1, Strategy::Balanced).await.unwrap();
    let reads_after_first = store.read_count();
    let second = registry.select_test(1, Strategy::Balanced).await.unwrap();

    assert_eq!(first.test_id, id(A));
    assert_eq!(second.test_id, id(A));
    assert_eq!(usage(&store, A).await, 1);
    assert_eq!(usage(&store, B).await, 0);
    // The hit costs one point read instead of a pool listing.
    assert_eq!(store.read_count() - reads_after_first, 1);

    let stats = registry.cache_stats().unwrap();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.ttl_secs, 300);
}

#[tokio::test]
async fn cache_hit_records_usage_when_configured() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[A, B]).await;
    let mut cfg = config(true);
    cfg.cache.count_hits = true;
    let registry = service(&store, cfg);

    registry.select_test(1, Strategy::Balanced).await.unwrap();
    let second = registry.select_test(1, Strategy::Balanced).await.unwrap();
    assert_eq!(second.test_id, id(A));

    registry.flush_pending_usage().await;
    assert_eq!(usage(&store, A).await, 2);
}

#[tokio::test(start_paused = true)]
async fn cache_expires_after_ttl() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[A, B]).await;
    let registry = service(&store, config(true));

    assert_eq!(registry.select_test(1, Strategy::Balanced).await.unwrap().test_id, id(A));
    tokio::time::advance(Duration::from_secs(301)).await;
    assert_eq!(registry.select_test(1, Strategy::Balanced).await.unwrap().test_id, id(B));
}

#[tokio::test]
async fn stale_cache_hit_falls_through_to_selection() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[A, B]).await;
    let registry = service(&store, config(true));

    registry.select_test(1, Strategy::Balanced).await.unwrap();
    // Bypass the service so the cache is not told.
    store
        .update_entry(id(A), EntryUpdate::deactivate("pulled"))
        .await
        .unwrap();

    let picked = registry.select_test(1, Strategy::Balanced).await.unwrap();
    assert_eq!(picked.test_id, id(B));
    assert_eq!(usage(&store, A).await, 1);
}

#[tokio::test]
async fn moved_entry_is_not_served_from_old_owner_cache() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[A, B]).await;
    let registry = service(&store, config(true));

    assert_eq!(registry.select_test(1, Strategy::Balanced).await.unwrap().test_id, id(A));
    registry.register_test(&catalog_test(A, 2)).await.unwrap();

    for _ in 0..2 {
        let picked = registry.select_test(1, Strategy::Balanced).await.unwrap();
        assert_eq!(picked.test_id, id(B));
    }
    assert_eq!(usage(&store, A).await, 1);
}

#[tokio::test]
async fn cached_entry_owned_elsewhere_falls_through_to_selection() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[A, B]).await;
    let registry = service(&store, config(true));

    registry.select_test(1, Strategy::Balanced).await.unwrap();
    store
        .update_entry(
            id(A),
            EntryUpdate {
                organization_id: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let picked = registry.select_test(1, Strategy::Balanced).await.unwrap();
    assert_eq!(picked.test_id, id(B));
    assert_eq!(registry.select_test(2, Strategy::Balanced).await.unwrap().test_id, id(A));
}

// --- Health ---

#[tokio::test]
async fn single_active_entry_scores_good() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[A]).await;
    let registry = service(&store, config(false));

    let report = registry.health_report(None).await.unwrap();
    assert_eq!(report.score, 80);
    assert_eq!(report.status, HealthStatus::Good);
    assert_eq!(report.statistics.active_tests, 1);
    assert_eq!(report.recommendations, vec![Recommendation::AddMoreTests]);
}

#[tokio::test]
async fn no_active_entries_is_poor_when_penalties_stack() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[A]).await;
    let registry = service(&store, config(false));
    registry.deactivate(id(A), "retired").await.unwrap();

    let report = registry.health_report(None).await.unwrap();
    assert_eq!(report.score, 30);
    assert_eq!(report.status, HealthStatus::Poor);
    assert_eq!(report.statistics.inactive_tests, 1);
    assert_eq!(report.statistics.average_usage, 0.0);
}

#[tokio::test]
async fn no_active_entries_is_fair_with_exclusive_tiers() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[A]).await;
    let mut cfg = config(false);
    cfg.health.stack_availability_penalties = false;
    let registry = service(&store, cfg);
    registry.deactivate(id(A), "retired").await.unwrap();

    let report = registry.health_report(None).await.unwrap();
    assert_eq!(report.score, 50);
    assert_eq!(report.status, HealthStatus::Fair);
    assert_eq!(report.recommendations, vec![Recommendation::RegisterActiveTest]);
}

#[tokio::test]
async fn health_quantifies_drift_instead_of_failing() {
    let store = drifted_store().await;
    let registry = service(&store, config(false));

    let report = registry.health_report(None).await.unwrap();
    // 3 active: no availability penalty; -20 orphan, -10 unregistered.
    assert_eq!(report.score, 70);
    assert_eq!(report.status, HealthStatus::Good);
    assert_eq!(
        report.recommendations,
        vec![
            Recommendation::RunConsistencyHeal,
            Recommendation::RegisterMissingTests
        ]
    );

    registry.heal(None).await.unwrap();
    let healed = registry.health_report(None).await.unwrap();
    assert_eq!(healed.score, 100);
    assert_eq!(healed.status, HealthStatus::Excellent);
}

#[tokio::test]
async fn scoped_health_counts_the_shared_pool_with_global_scope() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 0, &[A, B, C]).await;

    let scoped = service(&store, config(false));
    let report = scoped.health_report(Some(5)).await.unwrap();
    assert_eq!(report.statistics.active_tests, 0);
    assert_eq!(report.status, HealthStatus::Poor);

    let mut global = config(false);
    global.selection.global_scope_enabled = true;
    let shared = service(&store, global);
    let report = shared.health_report(Some(5)).await.unwrap();
    assert_eq!(report.statistics.active_tests, 3);
    assert_eq!(report.score, 100);
    assert_eq!(report.status, HealthStatus::Excellent);
    shared.select_test(5, Strategy::Balanced).await.unwrap();
}

// --- Administration ---

#[tokio::test]
async fn register_test_upserts() {
    let store = Arc::new(MemoryStore::new());
    let registry = service(&store, config(false));

    let test = catalog_test(A, 1);
    assert_eq!(registry.register_test(&test).await.unwrap(), Registration::Created);
    registry.select_test(1, Strategy::Balanced).await.unwrap();

    let renamed = CatalogTest {
        test_name: "Renamed".into(),
        ..test
    };
    assert_eq!(registry.register_test(&renamed).await.unwrap(), Registration::Updated);

    let entry = store.get_entry(id(A)).await.unwrap().unwrap();
    assert_eq!(entry.test_name, "Renamed");
    assert_eq!(entry.usage_count, 1);
}

#[tokio::test]
async fn register_test_rejects_invalid_rows() {
    let store = Arc::new(MemoryStore::new());
    let registry = service(&store, config(false));

    let err = registry
        .register_test(&CatalogTest {
            test_id: id(A),
            test_name: "  ".into(),
            organization_id: 1,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidEntry { .. }));
    assert!(store.get_entry(id(A)).await.unwrap().is_none());
}

#[tokio::test]
async fn force_reregister_all_counts_created_and_updated() {
    let store = drifted_store().await;
    let registry = service(&store, config(false));

    let summary = registry.force_reregister_all(None).await.unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(summary.updated, 2);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn setup_registers_catalog_and_reports_health() {
    let store = Arc::new(MemoryStore::new());
    for n in [A, B, C] {
        store.upsert_catalog_test(catalog_test(n, 1)).await;
    }
    let registry = service(&store, config(true));

    let summary = registry.setup().await.unwrap();
    assert_eq!(summary.registration.created, 3);
    assert!(summary.consistency.is_consistent());
    assert_eq!(summary.health.status, HealthStatus::Excellent);
}

#[tokio::test]
async fn activate_restores_eligibility() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[A]).await;
    let registry = service(&store, config(true));

    registry.deactivate(id(A), "maintenance").await.unwrap();
    assert!(registry.select_test(1, Strategy::Balanced).await.is_err());

    let entry = registry.activate(id(A), "fixed").await.unwrap();
    assert!(entry.deactivation_reason.is_none());
    assert_eq!(
        registry.select_test(1, Strategy::Balanced).await.unwrap().test_id,
        id(A)
    );
}

#[tokio::test]
async fn reset_usage_is_the_only_decrement() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 1, &[A]).await;
    let registry = service(&store, config(false));
    for _ in 0..3 {
        registry.select_test(1, Strategy::Balanced).await.unwrap();
    }

    let entry = registry.reset_usage(id(A)).await.unwrap();
    assert_eq!(entry.usage_count, 0);
}

#[tokio::test]
async fn cleanup_deactivates_only_stale_low_usage_entries() {
    let store = Arc::new(MemoryStore::new());
    let long_ago = Utc::now() - chrono::Duration::days(120);

    let mut stale = RegistryEntry::new(id(A), "Stale", 1);
    stale.created_at = long_ago;
    stale.last_used = Some(long_ago);
    stale.usage_count = 2;

    let mut popular = RegistryEntry::new(id(B), "Popular", 1);
    popular.created_at = long_ago;
    popular.last_used = Some(long_ago);
    popular.usage_count = 50;

    let fresh = RegistryEntry::new(id(C), "Fresh", 1);

    for entry in [stale, popular, fresh] {
        store.create_entry(entry).await.unwrap();
    }
    let registry = service(&store, config(false));

    let deactivated = registry.cleanup_stale(CleanupConfig::default()).await.unwrap();
    assert_eq!(deactivated, 1);
    assert!(!store.get_entry(id(A)).await.unwrap().unwrap().is_active);
    assert!(store.get_entry(id(B)).await.unwrap().unwrap().is_active);
    assert!(store.get_entry(id(C)).await.unwrap().unwrap().is_active);
}

#[tokio::test]
async fn cleanup_with_unrepresentable_threshold_deactivates_nothing() {
    let store = Arc::new(MemoryStore::new());
    let mut ancient = RegistryEntry::new(id(A), "Ancient", 1);
    ancient.created_at = Utc::now() - chrono::Duration::days(3650);
    store.create_entry(ancient).await.unwrap();
    let registry = service(&store, config(false));

    for days_threshold in [100_000_000, u32::MAX] {
        let deactivated = registry
            .cleanup_stale(CleanupConfig {
                days_threshold,
                usage_threshold: 10,
            })
            .await
            .unwrap();
        assert_eq!(deactivated, 0);
    }
    assert!(store.get_entry(id(A)).await.unwrap().unwrap().is_active);
}

// --- Store failures ---

#[tokio::test(start_paused = true)]
async fn slow_store_surfaces_retryable_timeout() {
    let store = Arc::new(MemoryStore::new().with_latency(Duration::from_secs(30)));
    let mut cfg = config(false);
    cfg.store.timeout_ms = 100;
    let registry = service(&store, cfg);

    let err = registry.select_test(1, Strategy::Balanced).await.unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Store(StoreError::Timeout {
            operation: "list_entries",
            after_ms: 100
        })
    ));
    assert!(err.is_retryable());

    assert!(registry.health_report(None).await.is_err());
}
