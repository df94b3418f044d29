//! Population statistics over registry entries.

use serde::{Deserialize, Serialize};

use crate::model::RegistryEntry;

/// Aggregate counts for a set of registry entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_tests: usize,
    pub active_tests: usize,
    pub inactive_tests: usize,
    pub featured_tests: usize,
    /// Mean `usage_count` over active entries; 0 when there are none.
    pub average_usage: f64,
    /// Sum of `usage_count` over every entry.
    pub total_usage: u64,
}

impl RegistryStats {
    pub fn from_entries(entries: &[RegistryEntry]) -> Self {
        let active: Vec<&RegistryEntry> = entries.iter().filter(|e| e.is_active).collect();
        let average_usage = if active.is_empty() {
            0.0
        } else {
            active.iter().map(|e| e.usage_count as f64).sum::<f64>() / active.len() as f64
        };

        Self {
            total_tests: entries.len(),
            active_tests: active.len(),
            inactive_tests: entries.len() - active.len(),
            featured_tests: entries.iter().filter(|e| e.is_featured).count(),
            average_usage,
            total_usage: entries.iter().map(|e| e.usage_count).sum(),
        }
    }
}
