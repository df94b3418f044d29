//! JSON-file registry store.
//!
//! The state file is the only copy of the data. Each mutation takes an
//! exclusive advisory lock on a sibling `.lock` file, re-reads the snapshot,
//! applies the change and replaces the file atomically through a temporary
//! file in the same directory. Independent processes sharing one state file
//! therefore serialize their writes and never lose an update.
//!
//! The whole lock-read-apply-write sequence runs on one blocking task, so a
//! caller that stops waiting (a store timeout) cannot release the lock early.
//! Such a mutation may still complete: a timed-out write is indeterminate.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use uuid::Uuid;

use testreg_core::error::StoreError;
use testreg_core::model::{CatalogTest, EntryUpdate, OrganizationId, RegistryEntry};
use testreg_core::store::RegistryStore;

use crate::memory::{StoreSnapshot, Tables};

/// A registry store persisted as one JSON document.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileStore {
    /// Open the state file at `path`. A missing file reads as empty and is
    /// created by the first mutation.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tables = load(&path)?;
        tracing::debug!(
            path = %path.display(),
            entries = tables.list_entries(None).len(),
            "opened registry state"
        );

        Ok(Self {
            lock_path: lock_path_for(&path),
            path,
        })
    }

    /// Write an empty state file at `path` unless one already exists.
    /// Returns whether a file was created.
    pub fn init(path: &Path) -> Result<bool> {
        let _lock = lock_exclusive(&lock_path_for(path))?;
        if path.exists() {
            return Ok(false);
        }
        write_snapshot(path, &StoreSnapshot::default())
            .with_context(|| format!("failed to create state: {}", path.display()))?;
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        self.read(|tables| tables.to_snapshot()).await
    }

    /// Add or replace a catalog row.
    pub async fn upsert_catalog_test(&self, test: CatalogTest) -> Result<(), StoreError> {
        self.mutate(move |tables| {
            tables.upsert_catalog_test(test);
            Ok(((), true))
        })
        .await
    }

    /// Remove a catalog row. Returns whether it existed.
    pub async fn remove_catalog_test(&self, test_id: Uuid) -> Result<bool, StoreError> {
        self.mutate(move |tables| {
            let removed = tables.remove_catalog_test(test_id);
            Ok((removed, removed))
        })
        .await
    }

    /// Run `f` over the current snapshot. Reads take no lock: the file is
    /// only ever replaced whole.
    async fn read<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Tables) -> T + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || load(&path).map(|tables| f(&tables)).map_err(io_error))
            .await
            .map_err(|e| StoreError::Io(format!("state read task failed: {e}")))?
    }

    /// Apply `f` to a fresh copy of the state under the exclusive lock.
    /// `f` returns its result and whether anything changed; unchanged state
    /// is not rewritten. Nothing reaches the file unless `f` succeeds.
    async fn mutate<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Tables) -> Result<(T, bool), StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        let lock_path = self.lock_path.clone();
        tokio::task::spawn_blocking(move || -> Result<T, StoreError> {
            let _lock = lock_exclusive(&lock_path).map_err(io_error)?;
            let mut tables = load(&path).map_err(io_error)?;
            let (out, changed) = f(&mut tables)?;
            if changed {
                write_snapshot(&path, &tables.to_snapshot()).map_err(io_error)?;
            }
            Ok(out)
        })
        .await
        .map_err(|e| StoreError::Io(format!("state write task failed: {e}")))?
    }
}

fn io_error(e: anyhow::Error) -> StoreError {
    StoreError::Io(format!("{e:#}"))
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "testreg-state".into());
    name.push(".lock");
    path.with_file_name(name)
}

/// Block until the exclusive lock is held. Released when the file drops.
fn lock_exclusive(lock_path: &Path) -> Result<File> {
    if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create state directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
        .with_context(|| format!("failed to open state lock {}", lock_path.display()))?;
    FileExt::lock_exclusive(&file)
        .with_context(|| format!("failed to lock {}", lock_path.display()))?;
    Ok(file)
}

fn load(path: &Path) -> Result<Tables> {
    if !path.exists() {
        return Ok(Tables::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read state: {}", path.display()))?;
    let snapshot = serde_json::from_str::<StoreSnapshot>(&content)
        .with_context(|| format!("failed to parse state: {}", path.display()))?;
    Ok(Tables::from_snapshot(snapshot))
}

fn write_snapshot(path: &Path, snapshot: &StoreSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot).context("failed to serialize state")?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(json.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("failed to write state to {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl RegistryStore for JsonFileStore {
    async fn list_entries(
        &self,
        scope: Option<OrganizationId>,
    ) -> Result<Vec<RegistryEntry>, StoreError> {
        self.read(move |tables| tables.list_entries(scope)).await
    }

    async fn get_entry(&self, test_id: Uuid) -> Result<Option<RegistryEntry>, StoreError> {
        self.read(move |tables| tables.get_entry(test_id)).await
    }

    async fn create_entry(&self, entry: RegistryEntry) -> Result<RegistryEntry, StoreError> {
        self.mutate(move |tables| Ok((tables.create_entry(entry)?, true)))
            .await
    }

    async fn update_entry(
        &self,
        test_id: Uuid,
        update: EntryUpdate,
    ) -> Result<RegistryEntry, StoreError> {
        self.mutate(move |tables| Ok((tables.update_entry(test_id, &update, Utc::now())?, true)))
            .await
    }

    async fn record_usage(
        &self,
        test_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<RegistryEntry>, StoreError> {
        self.mutate(move |tables| {
            let recorded = tables.record_usage(test_id, at);
            let changed = recorded.is_some();
            Ok((recorded, changed))
        })
        .await
    }

    async fn list_catalog(
        &self,
        scope: Option<OrganizationId>,
    ) -> Result<Vec<CatalogTest>, StoreError> {
        self.read(move |tables| tables.list_catalog(scope)).await
    }

    async fn catalog_contains(&self, test_id: Uuid) -> Result<bool, StoreError> {
        self.read(move |tables| tables.catalog_contains(test_id)).await
    }
}
