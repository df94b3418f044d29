//! Registry/catalog consistency checking and healing.
//!
//! The registry and the authoritative catalog are two tables that must stay
//! in sync. An *orphaned* entry is an active registry entry whose test is
//! gone from the catalog; an *unregistered* test is a catalog row without any
//! registry entry. Neither is ever an error: they are reported, scored and,
//! on request, healed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::error::{RegistryError, StoreError};
use crate::model::{EntryUpdate, OrganizationId, RegistryEntry};
use crate::store::RegistryStore;

/// Reason recorded on entries deactivated by healing.
pub const ORPHAN_DEACTIVATION_REASON: &str = "test not found in catalog";

/// Result of comparing the registry against the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// Organization the report was restricted to, if any.
    pub scope: Option<OrganizationId>,
    /// Active entries whose test is missing from the catalog, sorted.
    pub orphaned: Vec<Uuid>,
    /// Catalog tests with no registry entry, sorted.
    pub unregistered: Vec<Uuid>,
    /// Entries already deactivated whose test is also gone. Informational.
    pub inactive_orphans: Vec<Uuid>,
    /// Active entries in scope.
    pub active_count: usize,
    /// Registry entries in scope, active or not.
    pub total_registry_count: usize,
    /// Catalog tests in scope.
    pub total_catalog_count: usize,
}

impl ConsistencyReport {
    /// True when there is nothing to heal.
    pub fn is_consistent(&self) -> bool {
        self.orphaned.is_empty() && self.unregistered.is_empty()
    }
}

/// Mutations performed by a heal pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealOutcome {
    /// Orphaned entries that were deactivated.
    pub deactivated: usize,
    /// Unregistered tests that got a registry entry.
    pub created: usize,
    /// Catalog rows that could not be registered (invalid name or owner).
    pub skipped: usize,
}

impl HealOutcome {
    pub fn is_noop(&self) -> bool {
        self.deactivated == 0 && self.created == 0
    }
}

/// Compares the registry with the catalog and reconciles the two.
#[derive(Clone)]
pub struct ConsistencyChecker {
    store: Arc<dyn RegistryStore>,
    global_organization_id: OrganizationId,
}

impl ConsistencyChecker {
    pub fn new(store: Arc<dyn RegistryStore>, global_organization_id: OrganizationId) -> Self {
        Self {
            store,
            global_organization_id,
        }
    }

    /// Compare registry and catalog. Read-only.
    ///
    /// Membership is checked against the whole of both tables so that a
    /// scoped report never mistakes an entry owned elsewhere for an orphan.
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        scope: Option<OrganizationId>,
    ) -> Result<ConsistencyReport, RegistryError> {
        let entries = self.store.list_entries(None).await?;
        let catalog = self.store.list_catalog(None).await?;

        let catalog_ids: BTreeSet<Uuid> = catalog.iter().map(|t| t.test_id).collect();
        let registry_ids: BTreeSet<Uuid> = entries.iter().map(|e| e.test_id).collect();

        let in_scope = |org: OrganizationId| scope.map_or(true, |s| s == org);
        let scoped_entries: Vec<&RegistryEntry> = entries
            .iter()
            .filter(|e| in_scope(e.organization_id))
            .collect();

        let mut orphaned = Vec::new();
        let mut inactive_orphans = Vec::new();
        for entry in &scoped_entries {
            if catalog_ids.contains(&entry.test_id) {
                continue;
            }
            if entry.is_active {
                orphaned.push(entry.test_id);
            } else {
                inactive_orphans.push(entry.test_id);
            }
        }
        orphaned.sort();
        inactive_orphans.sort();

        let scoped_catalog: BTreeSet<Uuid> = catalog
            .iter()
            .filter(|t| in_scope(t.organization_id))
            .map(|t| t.test_id)
            .collect();
        let unregistered: Vec<Uuid> = scoped_catalog.difference(&registry_ids).copied().collect();

        let report = ConsistencyReport {
            scope,
            active_count: scoped_entries.iter().filter(|e| e.is_active).count(),
            total_registry_count: scoped_entries.len(),
            total_catalog_count: scoped_catalog.len(),
            orphaned,
            unregistered,
            inactive_orphans,
        };

        tracing::info!(
            orphaned = report.orphaned.len(),
            unregistered = report.unregistered.len(),
            active = report.active_count,
            "registry validation complete"
        );
        Ok(report)
    }

    /// Deactivate orphans and register unregistered catalog tests.
    ///
    /// Running it twice without a catalog change performs no mutation the
    /// second time.
    #[instrument(skip(self))]
    pub async fn heal(&self, scope: Option<OrganizationId>) -> Result<HealOutcome, RegistryError> {
        let report = self.validate(scope).await?;
        let mut outcome = HealOutcome::default();

        for test_id in &report.orphaned {
            match self
                .store
                .update_entry(*test_id, EntryUpdate::deactivate(ORPHAN_DEACTIVATION_REASON))
                .await
            {
                Ok(_) => {
                    tracing::warn!(%test_id, reason = ORPHAN_DEACTIVATION_REASON, "deactivated orphaned entry");
                    outcome.deactivated += 1;
                }
                Err(StoreError::EntryNotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if !report.unregistered.is_empty() {
            let catalog: BTreeMap<Uuid, _> = self
                .store
                .list_catalog(scope)
                .await?
                .into_iter()
                .map(|t| (t.test_id, t))
                .collect();

            for test_id in &report.unregistered {
                let Some(test) = catalog.get(test_id) else {
                    continue;
                };
                let entry = RegistryEntry::from_catalog(test);
                if let Err(e) = entry.validate(self.global_organization_id) {
                    tracing::warn!(%test_id, "cannot register catalog test: {e}");
                    outcome.skipped += 1;
                    continue;
                }
                match self.store.create_entry(entry).await {
                    Ok(created) => {
                        tracing::info!(test_id = %created.test_id, name = %created.test_name, "registered missing test");
                        outcome.created += 1;
                    }
                    // Registered concurrently; nothing left to do.
                    Err(StoreError::DuplicateEntry(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        tracing::info!(
            deactivated = outcome.deactivated,
            created = outcome.created,
            skipped = outcome.skipped,
            "registry heal complete"
        );
        Ok(outcome)
    }

    /// Heal a single entry: deactivate it if it is active and its test has
    /// left the catalog. Returns whether a deactivation happened.
    #[instrument(skip(self))]
    pub async fn heal_entry(&self, test_id: Uuid) -> Result<bool, RegistryError> {
        if self.store.catalog_contains(test_id).await? {
            return Ok(false);
        }
        match self.store.get_entry(test_id).await? {
            Some(entry) if entry.is_active => {
                self.store
                    .update_entry(test_id, EntryUpdate::deactivate(ORPHAN_DEACTIVATION_REASON))
                    .await?;
                tracing::warn!(%test_id, reason = ORPHAN_DEACTIVATION_REASON, "deactivated orphaned entry");
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
