//! Registry error types.
//!
//! `RegistryError` is what callers of the selection, health and admin APIs
//! see. `StoreError` is what a [`RegistryStore`](crate::store::RegistryStore)
//! backend reports; the core never swallows it.

use thiserror::Error;
use uuid::Uuid;

use crate::model::{OrganizationId, Strategy};

/// Errors surfaced by the registry core.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// An unknown selection strategy name was supplied.
    #[error("invalid selection strategy '{0}' (expected balanced, round_robin or random)")]
    InvalidStrategy(String),

    /// The organization id is not a valid scope.
    #[error("invalid organization scope: {0}")]
    InvalidScope(OrganizationId),

    /// An entry failed validation before being written.
    #[error("invalid registry entry {test_id}: {reason}")]
    InvalidEntry { test_id: Uuid, reason: String },

    /// No eligible entry exists for the organization.
    #[error("no tests available for organization {organization_id} ({strategy} strategy)")]
    NotFound {
        organization_id: OrganizationId,
        strategy: Strategy,
    },

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RegistryError {
    /// Returns `true` for configuration errors that must not be retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RegistryError::InvalidStrategy(_)
                | RegistryError::InvalidScope(_)
                | RegistryError::InvalidEntry { .. }
        )
    }

    /// Returns `true` if the caller may reasonably retry the operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Errors reported by a registry store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store did not answer within the configured bound.
    ///
    /// For a mutation the outcome is unknown: the store may still apply it.
    #[error("store operation '{operation}' timed out after {after_ms}ms")]
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },

    /// The backend is unreachable or refused the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// An update targeted an entry that does not exist.
    #[error("registry entry not found: {0}")]
    EntryNotFound(Uuid),

    /// A create targeted an id that already exists.
    #[error("registry entry already exists: {0}")]
    DuplicateEntry(Uuid),

    /// Persisting or loading store state failed.
    #[error("store I/O error: {0}")]
    Io(String),
}

impl StoreError {
    /// Returns `true` if this error is transient and the call may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Timeout { .. } | StoreError::Unavailable(_))
    }
}
