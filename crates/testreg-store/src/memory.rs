//! In-process registry store.
//!
//! All state sits behind one `RwLock`; every mutation, `record_usage`
//! included, runs under the write half, which makes it the single-writer
//! serialization point for increments.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use testreg_core::error::StoreError;
use testreg_core::model::{CatalogTest, EntryUpdate, OrganizationId, RegistryEntry};
use testreg_core::store::RegistryStore;

/// Serializable image of a store: registry entries plus catalog rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub entries: Vec<RegistryEntry>,
    #[serde(default)]
    pub catalog: Vec<CatalogTest>,
}

fn in_scope(scope: Option<OrganizationId>, organization_id: OrganizationId) -> bool {
    scope.map_or(true, |s| s == organization_id)
}

/// Registry and catalog tables with the mutation rules every backend shares.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    entries: BTreeMap<Uuid, RegistryEntry>,
    catalog: BTreeMap<Uuid, CatalogTest>,
}

impl Tables {
    /// Later duplicates of an id win.
    pub(crate) fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            entries: snapshot
                .entries
                .into_iter()
                .map(|e| (e.test_id, e))
                .collect(),
            catalog: snapshot
                .catalog
                .into_iter()
                .map(|t| (t.test_id, t))
                .collect(),
        }
    }

    pub(crate) fn to_snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            entries: self.entries.values().cloned().collect(),
            catalog: self.catalog.values().cloned().collect(),
        }
    }

    pub(crate) fn list_entries(&self, scope: Option<OrganizationId>) -> Vec<RegistryEntry> {
        self.entries
            .values()
            .filter(|e| in_scope(scope, e.organization_id))
            .cloned()
            .collect()
    }

    pub(crate) fn get_entry(&self, test_id: Uuid) -> Option<RegistryEntry> {
        self.entries.get(&test_id).cloned()
    }

    pub(crate) fn create_entry(&mut self, entry: RegistryEntry) -> Result<RegistryEntry, StoreError> {
        if self.entries.contains_key(&entry.test_id) {
            return Err(StoreError::DuplicateEntry(entry.test_id));
        }
        self.entries.insert(entry.test_id, entry.clone());
        Ok(entry)
    }

    pub(crate) fn update_entry(
        &mut self,
        test_id: Uuid,
        update: &EntryUpdate,
        now: DateTime<Utc>,
    ) -> Result<RegistryEntry, StoreError> {
        let entry = self
            .entries
            .get_mut(&test_id)
            .ok_or(StoreError::EntryNotFound(test_id))?;
        update.apply(entry, now);
        Ok(entry.clone())
    }

    /// Increment usage if the entry exists and is active.
    pub(crate) fn record_usage(&mut self, test_id: Uuid, at: DateTime<Utc>) -> Option<RegistryEntry> {
        match self.entries.get_mut(&test_id) {
            Some(entry) if entry.is_active => {
                entry.usage_count += 1;
                entry.last_used = Some(at);
                entry.updated_at = at;
                Some(entry.clone())
            }
            _ => None,
        }
    }

    pub(crate) fn list_catalog(&self, scope: Option<OrganizationId>) -> Vec<CatalogTest> {
        self.catalog
            .values()
            .filter(|t| in_scope(scope, t.organization_id))
            .cloned()
            .collect()
    }

    pub(crate) fn catalog_contains(&self, test_id: Uuid) -> bool {
        self.catalog.contains_key(&test_id)
    }

    pub(crate) fn upsert_catalog_test(&mut self, test: CatalogTest) {
        self.catalog.insert(test.test_id, test);
    }

    pub(crate) fn remove_catalog_test(&mut self, test_id: Uuid) -> bool {
        self.catalog.remove(&test_id).is_some()
    }
}

/// A registry store held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    latency: Option<Duration>,
    reads: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot. Later duplicates of an id win.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            tables: RwLock::new(Tables::from_snapshot(snapshot)),
            latency: None,
            reads: AtomicU64::new(0),
        }
    }

    /// Delay every call by `latency`, to exercise timeouts.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of entry reads (`list_entries` and `get_entry`) served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.tables.read().await.to_snapshot()
    }

    /// Add or replace a catalog row.
    pub async fn upsert_catalog_test(&self, test: CatalogTest) {
        self.tables.write().await.upsert_catalog_test(test);
    }

    /// Remove a catalog row. Returns whether it existed.
    pub async fn remove_catalog_test(&self, test_id: Uuid) -> bool {
        self.tables.write().await.remove_catalog_test(test_id)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn list_entries(
        &self,
        scope: Option<OrganizationId>,
    ) -> Result<Vec<RegistryEntry>, StoreError> {
        self.simulate_latency().await;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.tables.read().await.list_entries(scope))
    }

    async fn get_entry(&self, test_id: Uuid) -> Result<Option<RegistryEntry>, StoreError> {
        self.simulate_latency().await;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.tables.read().await.get_entry(test_id))
    }

    async fn create_entry(&self, entry: RegistryEntry) -> Result<RegistryEntry, StoreError> {
        self.simulate_latency().await;
        self.tables.write().await.create_entry(entry)
    }

    async fn update_entry(
        &self,
        test_id: Uuid,
        update: EntryUpdate,
    ) -> Result<RegistryEntry, StoreError> {
        self.simulate_latency().await;
        self.tables
            .write()
            .await
            .update_entry(test_id, &update, Utc::now())
    }

    async fn record_usage(
        &self,
        test_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<RegistryEntry>, StoreError> {
        self.simulate_latency().await;
        Ok(self.tables.write().await.record_usage(test_id, at))
    }

    async fn list_catalog(
        &self,
        scope: Option<OrganizationId>,
    ) -> Result<Vec<CatalogTest>, StoreError> {
        self.simulate_latency().await;
        Ok(self.tables.read().await.list_catalog(scope))
    }

    async fn catalog_contains(&self, test_id: Uuid) -> Result<bool, StoreError> {
        self.simulate_latency().await;
        Ok(self.tables.read().await.catalog_contains(test_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn catalog_test(n: u128, org: OrganizationId) -> CatalogTest {
        CatalogTest {
            test_id: Uuid::from_u128(n),
            test_name: format!("Test {n}"),
            organization_id: org,
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicates() {
        let store = MemoryStore::new();
        let entry = RegistryEntry::new(Uuid::from_u128(1), "T", 1);
        store.create_entry(entry.clone()).await.unwrap();
        let err = store.create_entry(entry).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEntry(_)));
    }

    #[tokio::test]
    async fn update_missing_entry_fails() {
        let store = MemoryStore::new();
        let err = store
            .update_entry(Uuid::from_u128(9), EntryUpdate::activate())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EntryNotFound(_)));
    }

    #[tokio::test]
    async fn list_filters_by_scope() {
        let store = MemoryStore::new();
        store
            .create_entry(RegistryEntry::new(Uuid::from_u128(1), "A", 1))
            .await
            .unwrap();
        store
            .create_entry(RegistryEntry::new(Uuid::from_u128(2), "B", 2))
            .await
            .unwrap();

        assert_eq!(store.list_entries(None).await.unwrap().len(), 2);
        let org2 = store.list_entries(Some(2)).await.unwrap();
        assert_eq!(org2.len(), 1);
        assert_eq!(org2[0].test_name, "B");
        assert_eq!(store.read_count(), 2);
    }

    #[tokio::test]
    async fn record_usage_skips_inactive_entries() {
        let store = MemoryStore::new();
        let id = Uuid::from_u128(1);
        store
            .create_entry(RegistryEntry::new(id, "A", 1))
            .await
            .unwrap();
        store
            .update_entry(id, EntryUpdate::deactivate("maintenance"))
            .await
            .unwrap();

        assert!(store.record_usage(id, Utc::now()).await.unwrap().is_none());
        assert_eq!(store.get_entry(id).await.unwrap().unwrap().usage_count, 0);
    }

    #[tokio::test]
    async fn concurrent_usage_is_never_lost() {
        let store = Arc::new(MemoryStore::new());
        let id = Uuid::from_u128(1);
        store
            .create_entry(RegistryEntry::new(id, "A", 1))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.record_usage(id, Utc::now()).await.unwrap()
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_some());
        }

        assert_eq!(store.get_entry(id).await.unwrap().unwrap().usage_count, 64);
    }

    #[tokio::test]
    async fn catalog_round_trip_through_snapshot() {
        let store = MemoryStore::new();
        store.upsert_catalog_test(catalog_test(1, 1)).await;
        store.upsert_catalog_test(catalog_test(2, 2)).await;
        assert!(store.catalog_contains(Uuid::from_u128(2)).await.unwrap());
        assert_eq!(store.list_catalog(Some(1)).await.unwrap().len(), 1);

        assert!(store.remove_catalog_test(Uuid::from_u128(2)).await);
        assert!(!store.remove_catalog_test(Uuid::from_u128(2)).await);

        let restored = MemoryStore::from_snapshot(store.snapshot().await);
        assert_eq!(
            restored.list_catalog_ids(None).await.unwrap(),
            vec![Uuid::from_u128(1)]
        );
    }

    #[test]
    fn tables_update_stamps_time() {
        let mut tables = Tables::default();
        let id = Uuid::from_u128(1);
        tables.create_entry(RegistryEntry::new(id, "A", 1)).unwrap();

        let now = Utc::now();
        let updated = tables
            .update_entry(id, &EntryUpdate::deactivate("retired"), now)
            .unwrap();
        assert!(!updated.is_active);
        assert_eq!(updated.updated_at, now);
    }
}
