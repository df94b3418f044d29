//! The persistence boundary of the registry.
//!
//! [`RegistryStore`] is implemented by the `testreg-store` crate. The core only
//! ever talks to it through this trait, usually wrapped in a [`TimedStore`] so
//! that no call can hang indefinitely.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{CatalogTest, EntryUpdate, OrganizationId, RegistryEntry};

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Registry persistence plus read access to the authoritative test catalog.
///
/// `scope` filters on exact `organization_id`; `None` means every organization.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// List registry entries, active or not.
    async fn list_entries(
        &self,
        scope: Option<OrganizationId>,
    ) -> Result<Vec<RegistryEntry>, StoreError>;

    /// Fetch a single entry.
    async fn get_entry(&self, test_id: Uuid) -> Result<Option<RegistryEntry>, StoreError>;

    /// Insert a new entry. Fails with [`StoreError::DuplicateEntry`] if the id exists.
    async fn create_entry(&self, entry: RegistryEntry) -> Result<RegistryEntry, StoreError>;

    /// Apply a partial update. Fails with [`StoreError::EntryNotFound`] if absent.
    async fn update_entry(
        &self,
        test_id: Uuid,
        update: EntryUpdate,
    ) -> Result<RegistryEntry, StoreError>;

    /// Atomically increment `usage_count` and stamp `last_used = at`, but only
    /// if the entry exists and is still active.
    ///
    /// Returns the updated entry, or `None` when the condition failed. Two
    /// concurrent calls for the same entry must both be counted.
    async fn record_usage(
        &self,
        test_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<RegistryEntry>, StoreError>;

    /// List catalog tests.
    async fn list_catalog(
        &self,
        scope: Option<OrganizationId>,
    ) -> Result<Vec<CatalogTest>, StoreError>;

    /// List catalog test ids.
    async fn list_catalog_ids(
        &self,
        scope: Option<OrganizationId>,
    ) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .list_catalog(scope)
            .await?
            .into_iter()
            .map(|t| t.test_id)
            .collect())
    }

    /// Whether the catalog still holds this test.
    async fn catalog_contains(&self, test_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.list_catalog_ids(None).await?.contains(&test_id))
    }
}

#[async_trait]
impl<T: RegistryStore + ?Sized> RegistryStore for Arc<T> {
    async fn list_entries(
        &self,
        scope: Option<OrganizationId>,
    ) -> Result<Vec<RegistryEntry>, StoreError> {
        (**self).list_entries(scope).await
    }

    async fn get_entry(&self, test_id: Uuid) -> Result<Option<RegistryEntry>, StoreError> {
        (**self).get_entry(test_id).await
    }

    async fn create_entry(&self, entry: RegistryEntry) -> Result<RegistryEntry, StoreError> {
        (**self).create_entry(entry).await
    }

    async fn update_entry(
        &self,
        test_id: Uuid,
        update: EntryUpdate,
    ) -> Result<RegistryEntry, StoreError> {
        (**self).update_entry(test_id, update).await
    }

    async fn record_usage(
        &self,
        test_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<RegistryEntry>, StoreError> {
        (**self).record_usage(test_id, at).await
    }

    async fn list_catalog(
        &self,
        scope: Option<OrganizationId>,
    ) -> Result<Vec<CatalogTest>, StoreError> {
        (**self).list_catalog(scope).await
    }

    async fn list_catalog_ids(
        &self,
        scope: Option<OrganizationId>,
    ) -> Result<Vec<Uuid>, StoreError> {
        (**self).list_catalog_ids(scope).await
    }

    async fn catalog_contains(&self, test_id: Uuid) -> Result<bool, StoreError> {
        (**self).catalog_contains(test_id).await
    }
}

// ---------------------------------------------------------------------------
// Timeout decorator
// ---------------------------------------------------------------------------

/// Default bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Wraps a store so every call completes or fails within `timeout`.
///
/// An elapsed call becomes [`StoreError::Timeout`], which is retryable.
/// Dropping a write does not undo it, so a timed-out mutation may have
/// landed anyway.
pub struct TimedStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: RegistryStore> TimedStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T: Send>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, StoreError>> + Send,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "store call timed out"
                );
                Err(StoreError::Timeout {
                    operation,
                    after_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[async_trait]
impl<S: RegistryStore> RegistryStore for TimedStore<S> {
    async fn list_entries(
        &self,
        scope: Option<OrganizationId>,
    ) -> Result<Vec<RegistryEntry>, StoreError> {
        self.bounded("list_entries", self.inner.list_entries(scope))
            .await
    }

    async fn get_entry(&self, test_id: Uuid) -> Result<Option<RegistryEntry>, StoreError> {
        self.bounded("get_entry", self.inner.get_entry(test_id)).await
    }

    async fn create_entry(&self, entry: RegistryEntry) -> Result<RegistryEntry, StoreError> {
        self.bounded("create_entry", self.inner.create_entry(entry))
            .await
    }

    async fn update_entry(
        &self,
        test_id: Uuid,
        update: EntryUpdate,
    ) -> Result<RegistryEntry, StoreError> {
        self.bounded("update_entry", self.inner.update_entry(test_id, update))
            .await
    }

    async fn record_usage(
        &self,
        test_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<RegistryEntry>, StoreError> {
        self.bounded("record_usage", self.inner.record_usage(test_id, at))
            .await
    }

    async fn list_catalog(
        &self,
        scope: Option<OrganizationId>,
    ) -> Result<Vec<CatalogTest>, StoreError> {
        self.bounded("list_catalog", self.inner.list_catalog(scope))
            .await
    }

    async fn list_catalog_ids(
        &self,
        scope: Option<OrganizationId>,
    ) -> Result<Vec<Uuid>, StoreError> {
        self.bounded("list_catalog_ids", self.inner.list_catalog_ids(scope))
            .await
    }

    async fn catalog_contains(&self, test_id: Uuid) -> Result<bool, StoreError> {
        self.bounded("catalog_contains", self.inner.catalog_contains(test_id))
            .await
    }
}
