//! The registry facade used by the web layer and maintenance tooling.
//!
//! Wires the consistency checker, selection engine, selection cache and
//! health scorer around one store, and adds the administrative operations
//! (registration, activation, cleanup, setup).

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::cache::{CacheStats, SelectionCache};
use crate::config::{CleanupConfig, RegistryConfig};
use crate::consistency::{ConsistencyChecker, ConsistencyReport, HealOutcome};
use crate::error::{RegistryError, StoreError};
use crate::health::{HealthReport, HealthScorer};
use crate::model::{CatalogTest, EntryUpdate, OrganizationId, RegistryEntry, Strategy};
use crate::selection::SelectionEngine;
use crate::store::{RegistryStore, TimedStore};

/// Whether a registration created or updated the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Registration {
    Created,
    Updated,
}

/// Counts from a batch registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationSummary {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

/// What [`RegistryService::setup`] did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupSummary {
    pub registration: RegistrationSummary,
    pub consistency: ConsistencyReport,
    pub health: HealthReport,
}

/// The test registry.
pub struct RegistryService {
    store: Arc<dyn RegistryStore>,
    checker: ConsistencyChecker,
    engine: SelectionEngine,
    scorer: HealthScorer,
    config: RegistryConfig,
}

impl RegistryService {
    /// Build a service over `store`. Every store call is bounded by the
    /// configured timeout.
    pub fn new(store: Arc<dyn RegistryStore>, config: RegistryConfig) -> Self {
        let store: Arc<dyn RegistryStore> =
            Arc::new(TimedStore::new(store, config.store_timeout()));
        let global = config.selection.global_organization_id;
        let checker = ConsistencyChecker::new(Arc::clone(&store), global);
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(SelectionCache::new(config.cache_ttl())));
        let engine = SelectionEngine::new(
            Arc::clone(&store),
            checker.clone(),
            cache,
            config.selection_policy(),
        );
        let scorer = HealthScorer::new(Arc::clone(&store), checker.clone(), config.health_policy());

        Self {
            store,
            checker,
            engine,
            scorer,
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn engine(&self) -> &SelectionEngine {
        &self.engine
    }

    pub fn checker(&self) -> &ConsistencyChecker {
        &self.checker
    }

    // -----------------------------------------------------------------------
    // Selection and health
    // -----------------------------------------------------------------------

    /// Select a test for an organization.
    pub async fn select_test(
        &self,
        organization_id: OrganizationId,
        strategy: Strategy,
    ) -> Result<RegistryEntry, RegistryError> {
        self.engine.select_test(organization_id, strategy).await
    }

    /// Select a test with the configured default strategy.
    pub async fn select_default(
        &self,
        organization_id: OrganizationId,
    ) -> Result<RegistryEntry, RegistryError> {
        self.engine
            .select_test(organization_id, self.config.selection.default_strategy)
            .await
    }

    /// Select up to `count` distinct tests.
    pub async fn select_many(
        &self,
        organization_id: OrganizationId,
        count: usize,
        strategy: Strategy,
    ) -> Result<Vec<RegistryEntry>, RegistryError> {
        self.engine
            .select_many(organization_id, count, strategy)
            .await
    }

    pub async fn health_report(
        &self,
        scope: Option<OrganizationId>,
    ) -> Result<HealthReport, RegistryError> {
        self.scorer.report(scope).await
    }

    /// Compare registry and catalog without changing anything.
    pub async fn validate_only(
        &self,
        scope: Option<OrganizationId>,
    ) -> Result<ConsistencyReport, RegistryError> {
        self.checker.validate(scope).await
    }

    /// Deactivate orphans and register missing catalog tests.
    pub async fn heal(&self, scope: Option<OrganizationId>) -> Result<HealOutcome, RegistryError> {
        let outcome = self.checker.heal(scope).await?;
        if !outcome.is_noop() {
            self.clear_cache();
        }
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    /// Register a catalog test, or refresh the name and owner of an existing
    /// entry. Usage and activation state are left alone on update.
    #[instrument(skip(self, test), fields(test_id = %test.test_id))]
    pub async fn register_test(&self, test: &CatalogTest) -> Result<Registration, RegistryError> {
        let global = self.config.selection.global_organization_id;
        RegistryEntry::from_catalog(test).validate(global)?;

        let outcome = match self.store.get_entry(test.test_id).await? {
            Some(_) => {
                self.refresh_entry(test).await?;
                Registration::Updated
            }
            None => match self
                .store
                .create_entry(RegistryEntry::from_catalog(test))
                .await
            {
                Ok(_) => Registration::Created,
                Err(StoreError::DuplicateEntry(_)) => {
                    self.refresh_entry(test).await?;
                    Registration::Updated
                }
                Err(e) => return Err(e.into()),
            },
        };

        if let Some(cache) = self.engine.cache() {
            // The entry may have moved; drop picks cached under its old owner too.
            cache.invalidate_test(test.test_id);
            cache.invalidate(test.organization_id);
        }
        tracing::info!(name = %test.test_name, ?outcome, "test registry entry registered");
        Ok(outcome)
    }

    async fn refresh_entry(&self, test: &CatalogTest) -> Result<RegistryEntry, RegistryError> {
        let update = EntryUpdate {
            test_name: Some(test.test_name.clone()),
            organization_id: Some(test.organization_id),
            ..Default::default()
        };
        Ok(self.store.update_entry(test.test_id, update).await?)
    }

    /// Register (or refresh) every catalog test in scope.
    ///
    /// Individual failures are logged and counted; store outages abort.
    #[instrument(skip(self))]
    pub async fn force_reregister_all(
        &self,
        scope: Option<OrganizationId>,
    ) -> Result<RegistrationSummary, RegistryError> {
        let catalog = self.store.list_catalog(scope).await?;
        let mut summary = RegistrationSummary::default();

        for test in &catalog {
            match self.register_test(test).await {
                Ok(Registration::Created) => summary.created += 1,
                Ok(Registration::Updated) => summary.updated += 1,
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::error!(test_id = %test.test_id, "failed to register test: {e}");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            created = summary.created,
            updated = summary.updated,
            failed = summary.failed,
            "re-registration complete"
        );
        Ok(summary)
    }

    /// Take a test out of the selection pool.
    #[instrument(skip(self))]
    pub async fn deactivate(&self, test_id: Uuid, reason: &str) -> Result<RegistryEntry, RegistryError> {
        let entry = self
            .store
            .update_entry(test_id, EntryUpdate::deactivate(reason))
            .await?;
        if let Some(cache) = self.engine.cache() {
            cache.invalidate_test(test_id);
        }
        tracing::warn!(%test_id, reason, "test deactivated");
        Ok(entry)
    }

    /// Put a test back into the selection pool.
    #[instrument(skip(self))]
    pub async fn activate(&self, test_id: Uuid, reason: &str) -> Result<RegistryEntry, RegistryError> {
        let entry = self
            .store
            .update_entry(test_id, EntryUpdate::activate())
            .await?;
        if let Some(cache) = self.engine.cache() {
            cache.invalidate(entry.organization_id);
        }
        tracing::info!(%test_id, reason, "test activated");
        Ok(entry)
    }

    /// Administrative reset of a test's usage counter.
    #[instrument(skip(self))]
    pub async fn reset_usage(&self, test_id: Uuid) -> Result<RegistryEntry, RegistryError> {
        let update = EntryUpdate {
            reset_usage: true,
            ..Default::default()
        };
        let entry = self.store.update_entry(test_id, update).await?;
        if let Some(cache) = self.engine.cache() {
            cache.invalidate(entry.organization_id);
        }
        tracing::warn!(%test_id, "usage count reset");
        Ok(entry)
    }

    /// Deactivate active entries that have gone unused for longer than
    /// `policy.days_threshold` days and were used fewer than
    /// `policy.usage_threshold` times. Returns how many were deactivated.
    ///
    /// A threshold reaching past the earliest representable time selects
    /// nothing.
    #[instrument(skip(self))]
    pub async fn cleanup_stale(&self, policy: CleanupConfig) -> Result<usize, RegistryError> {
        let cutoff = stale_cutoff(Utc::now(), policy.days_threshold);
        let reason = format!("unused for {} days", policy.days_threshold);

        let stale: Vec<Uuid> = self
            .store
            .list_entries(None)
            .await?
            .into_iter()
            .filter(|e| {
                e.is_active && e.last_activity() < cutoff && e.usage_count < policy.usage_threshold
            })
            .map(|e| e.test_id)
            .collect();

        for test_id in &stale {
            self.store
                .update_entry(*test_id, EntryUpdate::deactivate(reason.clone()))
                .await?;
        }
        if !stale.is_empty() {
            self.clear_cache();
            tracing::info!(deactivated = stale.len(), "auto-cleanup deactivated old or unused tests");
        }
        Ok(stale.len())
    }

    /// Register the whole catalog, then validate and score the result.
    #[instrument(skip(self))]
    pub async fn setup(&self) -> Result<SetupSummary, RegistryError> {
        let registration = self.force_reregister_all(None).await?;
        let consistency = self.checker.validate(None).await?;
        let health = self.scorer.report(None).await?;
        self.clear_cache();

        tracing::info!(
            registered = registration.created,
            status = %health.status,
            score = health.score,
            active = health.statistics.active_tests,
            "test registry setup complete"
        );
        Ok(SetupSummary {
            registration,
            consistency,
            health,
        })
    }

    // -----------------------------------------------------------------------
    // Cache maintenance
    // -----------------------------------------------------------------------

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.engine.cache().map(|c| c.stats())
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = self.engine.cache() {
            cache.clear();
        }
    }

    /// Wait for cache-hit usage still being recorded in the background.
    pub async fn flush_pending_usage(&self) {
        self.engine.flush_pending_usage().await;
    }
}

/// Last activity before which an entry counts as stale.
fn stale_cutoff(now: DateTime<Utc>, days_threshold: u32) -> DateTime<Utc> {
    TimeDelta::try_days(i64::from(days_threshold))
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
