//! Core data model types for testreg.
//!
//! These are the records the selection engine, the consistency checker and
//! the health scorer all operate on.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RegistryError;

/// Integer organization scope identifier.
pub type OrganizationId = i64;

/// One test's eligibility and usage state within the selection pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Identifier of the catalog test. Immutable once created.
    pub test_id: Uuid,
    /// Display label.
    pub test_name: String,
    /// Owning organization (or the configured global scope id).
    pub organization_id: OrganizationId,
    /// Inactive entries are never selectable but are kept for audit.
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Premium-tier flag.
    #[serde(default)]
    pub is_featured: bool,
    /// Number of successful selections. Only ever increases outside of an
    /// administrative reset.
    #[serde(default)]
    pub usage_count: u64,
    /// When the entry was last selected. `None` means never.
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    /// Descriptive metadata, passed through untouched.
    #[serde(default)]
    pub metadata: EntryMetadata,
    /// Tie-break hint reserved for future strategies.
    #[serde(default)]
    pub rotation_priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Why the entry was last deactivated.
    #[serde(default)]
    pub deactivation_reason: Option<String>,
    #[serde(default)]
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl RegistryEntry {
    /// Create a fresh, active, never-used entry with default metadata.
    pub fn new(test_id: Uuid, test_name: impl Into<String>, organization_id: OrganizationId) -> Self {
        let now = Utc::now();
        Self {
            test_id,
            test_name: test_name.into(),
            organization_id,
            is_active: true,
            is_featured: false,
            usage_count: 0,
            last_used: None,
            metadata: EntryMetadata::registration_defaults(),
            rotation_priority: 0,
            created_at: now,
            updated_at: now,
            deactivation_reason: None,
            deactivated_at: None,
        }
    }

    /// Build a registry entry for a catalog test.
    pub fn from_catalog(test: &CatalogTest) -> Self {
        Self::new(test.test_id, test.test_name.clone(), test.organization_id)
    }

    /// Validate the entry before it is written.
    ///
    /// `global_organization_id` is the one non-positive id allowed.
    pub fn validate(&self, global_organization_id: OrganizationId) -> Result<(), RegistryError> {
        if self.test_name.trim().is_empty() {
            return Err(RegistryError::InvalidEntry {
                test_id: self.test_id,
                reason: "test name is required".into(),
            });
        }
        if self.organization_id <= 0 && self.organization_id != global_organization_id {
            return Err(RegistryError::InvalidEntry {
                test_id: self.test_id,
                reason: format!(
                    "organization id must be positive, got {}",
                    self.organization_id
                ),
            });
        }
        Ok(())
    }

    /// When the entry last saw activity: its last use, or its creation.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_used.unwrap_or(self.created_at)
    }
}

impl fmt::Display for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) - Org {}",
            self.test_name, self.test_id, self.organization_id
        )
    }
}

fn default_true() -> bool {
    true
}

/// Optional descriptive metadata. None of it is consumed by selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    #[serde(default)]
    pub category: Option<TestCategory>,
    #[serde(default)]
    pub difficulty_level: Option<Difficulty>,
    /// Target band score, e.g. 7.0 or 8.5.
    #[serde(default)]
    pub target_band_score: Option<f32>,
}

impl EntryMetadata {
    /// Metadata applied to entries created by registration or healing.
    pub fn registration_defaults() -> Self {
        Self {
            category: Some(TestCategory::Academic),
            difficulty_level: Some(Difficulty::Medium),
            target_band_score: Some(7.0),
        }
    }
}

/// Test category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCategory {
    Academic,
    GeneralTraining,
}

/// Difficulty level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// A row of the authoritative test catalog, as far as the registry cares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogTest {
    pub test_id: Uuid,
    pub test_name: String,
    pub organization_id: OrganizationId,
}

/// The policy governing which eligible entry is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Least-used entry first.
    #[default]
    Balanced,
    /// Least-recently-used entry first.
    RoundRobin,
    /// Uniformly random entry.
    Random,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::Balanced, Strategy::RoundRobin, Strategy::Random];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Balanced => "balanced",
            Strategy::RoundRobin => "round_robin",
            Strategy::Random => "random",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "balanced" => Ok(Strategy::Balanced),
            "round_robin" | "round-robin" => Ok(Strategy::RoundRobin),
            "random" => Ok(Strategy::Random),
            _ => Err(RegistryError::InvalidStrategy(s.to_string())),
        }
    }
}

/// Partial update applied by [`RegistryStore::update_entry`](crate::store::RegistryStore::update_entry).
///
/// `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryUpdate {
    pub test_name: Option<String>,
    pub organization_id: Option<OrganizationId>,
    pub is_active: Option<bool>,
    pub is_featured: Option<bool>,
    pub metadata: Option<EntryMetadata>,
    pub rotation_priority: Option<i32>,
    /// Outer `Some` means "set"; inner `None` clears the reason.
    pub deactivation_reason: Option<Option<String>>,
    pub reset_usage: bool,
}

impl EntryUpdate {
    /// Mark inactive, recording why.
    pub fn deactivate(reason: impl Into<String>) -> Self {
        Self {
            is_active: Some(false),
            deactivation_reason: Some(Some(reason.into())),
            ..Default::default()
        }
    }

    /// Mark active again and clear any recorded reason.
    pub fn activate() -> Self {
        Self {
            is_active: Some(true),
            deactivation_reason: Some(None),
            ..Default::default()
        }
    }

    /// Apply the patch to an entry, stamping `updated_at` with `now`.
    pub fn apply(&self, entry: &mut RegistryEntry, now: DateTime<Utc>) {
        if let Some(name) = &self.test_name {
            entry.test_name = name.clone();
        }
        if let Some(org) = self.organization_id {
            entry.organization_id = org;
        }
        if let Some(active) = self.is_active {
            if entry.is_active && !active {
                entry.deactivated_at = Some(now);
            } else if active {
                entry.deactivated_at = None;
            }
            entry.is_active = active;
        }
        if let Some(featured) = self.is_featured {
            entry.is_featured = featured;
        }
        if let Some(metadata) = &self.metadata {
            entry.metadata = metadata.clone();
        }
        if let Some(priority) = self.rotation_priority {
            entry.rotation_priority = priority;
        }
        if let Some(reason) = &self.deactivation_reason {
            entry.deactivation_reason = reason.clone();
        }
        if self.reset_usage {
            entry.usage_count = 0;
        }
        entry.updated_at = now;
    }
}
