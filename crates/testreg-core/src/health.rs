//! Registry health scoring.
//!
//! The score starts at 100 and loses points for each condition that fired,
//! floored at 0. Anomalies never make scoring fail; they only cost points.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::consistency::{ConsistencyChecker, ConsistencyReport};
use crate::error::RegistryError;
use crate::model::OrganizationId;
use crate::statistics::RegistryStats;
use crate::store::RegistryStore;

/// Categorical health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl HealthStatus {
    pub fn from_score(score: u8) -> Self {
        match score {
            90.. => HealthStatus::Excellent,
            70..=89 => HealthStatus::Good,
            50..=69 => HealthStatus::Fair,
            _ => HealthStatus::Poor,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Excellent => "Excellent",
            HealthStatus::Good => "Good",
            HealthStatus::Fair => "Fair",
            HealthStatus::Poor => "Poor",
        };
        f.write_str(s)
    }
}

/// A scoring condition that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Penalty {
    NoActiveTests,
    LowRedundancy,
    OrphanedEntries,
    UnregisteredTests,
}

impl Penalty {
    pub fn points(&self) -> u8 {
        match self {
            Penalty::NoActiveTests => 50,
            Penalty::LowRedundancy => 20,
            Penalty::OrphanedEntries => 20,
            Penalty::UnregisteredTests => 10,
        }
    }
}

/// Operator-facing advice derived from the penalties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    RunConsistencyHeal,
    RegisterMissingTests,
    RegisterActiveTest,
    AddMoreTests,
    SystemHealthy,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Recommendation::RunConsistencyHeal => {
                "Run consistency heal to deactivate orphaned registry entries"
            }
            Recommendation::RegisterMissingTests => "Register missing catalog tests in the registry",
            Recommendation::RegisterActiveTest => {
                "CRITICAL: no active tests available, register at least one active test"
            }
            Recommendation::AddMoreTests => "Add more active tests to ensure availability",
            Recommendation::SystemHealthy => "System healthy, no action required",
        };
        f.write_str(s)
    }
}

/// How availability penalties are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPolicy {
    /// When true, an empty pool also takes the low-redundancy penalty.
    /// When false the two are exclusive tiers.
    pub stack_availability_penalties: bool,
    /// Active-entry count below which the low-redundancy penalty applies.
    pub low_redundancy_threshold: usize,
    /// Organization whose entries every organization can be served, when
    /// global scope is on. Counted in each scoped report.
    #[serde(default)]
    pub shared_organization_id: Option<OrganizationId>,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            stack_availability_penalties: true,
            low_redundancy_threshold: 3,
            shared_organization_id: None,
        }
    }
}

/// Score and the penalties behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub score: u8,
    pub status: HealthStatus,
    pub penalties: Vec<Penalty>,
    pub recommendations: Vec<Recommendation>,
}

/// Score a population. Pure; the order of `penalties` is fixed.
pub fn assess(
    active_tests: usize,
    consistency: &ConsistencyReport,
    policy: &HealthPolicy,
) -> Assessment {
    let mut penalties = Vec::new();

    if !consistency.orphaned.is_empty() {
        penalties.push(Penalty::OrphanedEntries);
    }
    if !consistency.unregistered.is_empty() {
        penalties.push(Penalty::UnregisteredTests);
    }
    if active_tests == 0 {
        penalties.push(Penalty::NoActiveTests);
    }
    let below_threshold = active_tests < policy.low_redundancy_threshold;
    if below_threshold && (active_tests > 0 || policy.stack_availability_penalties) {
        penalties.push(Penalty::LowRedundancy);
    }

    let lost: u32 = penalties.iter().map(|p| p.points() as u32).sum();
    let score = 100u32.saturating_sub(lost) as u8;

    let mut recommendations: Vec<Recommendation> = penalties
        .iter()
        .map(|p| match p {
            Penalty::OrphanedEntries => Recommendation::RunConsistencyHeal,
            Penalty::UnregisteredTests => Recommendation::RegisterMissingTests,
            Penalty::NoActiveTests => Recommendation::RegisterActiveTest,
            Penalty::LowRedundancy => Recommendation::AddMoreTests,
        })
        .collect();
    if recommendations.is_empty() {
        recommendations.push(Recommendation::SystemHealthy);
    }

    Assessment {
        score,
        status: HealthStatus::from_score(score),
        penalties,
        recommendations,
    }
}

/// A complete health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub score: u8,
    pub penalties: Vec<Penalty>,
    pub statistics: RegistryStats,
    pub consistency: ConsistencyReport,
    pub recommendations: Vec<Recommendation>,
    pub generated_at: DateTime<Utc>,
}

/// Builds health reports from the store and the consistency checker.
pub struct HealthScorer {
    store: Arc<dyn RegistryStore>,
    checker: ConsistencyChecker,
    policy: HealthPolicy,
}

impl HealthScorer {
    pub fn new(store: Arc<dyn RegistryStore>, checker: ConsistencyChecker, policy: HealthPolicy) -> Self {
        Self {
            store,
            checker,
            policy,
        }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Produce a report. Fails only if the store does.
    ///
    /// A scoped report's statistics cover the pool the organization is
    /// actually served from, shared entries included. Consistency stays
    /// limited to the entries the organization owns.
    #[instrument(skip(self))]
    pub async fn report(&self, scope: Option<OrganizationId>) -> Result<HealthReport, RegistryError> {
        let mut entries = self.store.list_entries(scope).await?;
        if let (Some(org), Some(shared)) = (scope, self.policy.shared_organization_id) {
            if org != shared {
                entries.extend(self.store.list_entries(Some(shared)).await?);
            }
        }
        let statistics = RegistryStats::from_entries(&entries);
        let consistency = self.checker.validate(scope).await?;

        let assessment = assess(statistics.active_tests, &consistency, &self.policy);
        tracing::info!(
            status = %assessment.status,
            score = assessment.score,
            "registry health report"
        );

        Ok(HealthReport {
            status: assessment.status,
            score: assessment.score,
            penalties: assessment.penalties,
            statistics,
            consistency,
            recommendations: assessment.recommendations,
            generated_at: Utc::now(),
        })
    }
}
