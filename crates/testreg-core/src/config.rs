//! Registry configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::health::HealthPolicy;
use crate::model::{OrganizationId, Strategy};
use crate::selection::SelectionPolicy;

/// Top-level testreg configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Strategy used when a caller does not name one.
    #[serde(default)]
    pub default_strategy: Strategy,
    /// Let entries owned by the global scope serve every organization.
    #[serde(default)]
    pub global_scope_enabled: bool,
    /// Organization id that designates the global scope.
    #[serde(default)]
    pub global_organization_id: OrganizationId,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            default_strategy: Strategy::Balanced,
            global_scope_enabled: false,
            global_organization_id: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Time-to-live of a cached selection, in seconds.
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    /// Record a use at the store on every cache hit.
    #[serde(default)]
    pub count_hits: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl(),
            count_hits: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Apply both the empty-pool and low-redundancy penalties when nothing
    /// is active.
    #[serde(default = "default_true")]
    pub stack_availability_penalties: bool,
    #[serde(default = "default_redundancy_threshold")]
    pub low_redundancy_threshold: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stack_availability_penalties: true,
            low_redundancy_threshold: default_redundancy_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the JSON state file used by the CLI.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    /// Bound on every store call, in milliseconds.
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            timeout_ms: default_store_timeout(),
        }
    }
}

/// Thresholds for deactivating stale entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Days without use before an entry counts as stale.
    #[serde(default = "default_cleanup_days")]
    pub days_threshold: u32,
    /// Entries used at least this often are never cleaned up.
    #[serde(default = "default_cleanup_usage")]
    pub usage_threshold: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            days_threshold: default_cleanup_days(),
            usage_threshold: default_cleanup_usage(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_redundancy_threshold() -> usize {
    3
}
fn default_state_path() -> PathBuf {
    PathBuf::from("./testreg-state.json")
}
fn default_store_timeout() -> u64 {
    5000
}
fn default_cleanup_days() -> u32 {
    90
}
fn default_cleanup_usage() -> u64 {
    10
}

impl RegistryConfig {
    pub fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            global_scope_enabled: self.selection.global_scope_enabled,
            global_organization_id: self.selection.global_organization_id,
            count_cache_hits: self.cache.count_hits,
        }
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            stack_availability_penalties: self.health.stack_availability_penalties,
            low_redundancy_threshold: self.health.low_redundancy_threshold,
            shared_organization_id: self
                .selection
                .global_scope_enabled
                .then_some(self.selection.global_organization_id),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.timeout_ms)
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `testreg.toml` in the current directory
/// 2. `~/.config/testreg/config.toml`
///
/// Environment variable overrides: `TESTREG_STATE`, `TESTREG_STORE_TIMEOUT_MS`,
/// `TESTREG_GLOBAL_SCOPE`.
pub fn load_config() -> Result<RegistryConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<RegistryConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("testreg.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<RegistryConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => RegistryConfig::default(),
    };

    apply_env_overrides(&mut config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut RegistryConfig) -> Result<()> {
    if let Ok(state) = std::env::var("TESTREG_STATE") {
        config.store.state_path = PathBuf::from(state);
    }
    if let Ok(timeout) = std::env::var("TESTREG_STORE_TIMEOUT_MS") {
        config.store.timeout_ms = timeout
            .parse()
            .with_context(|| format!("invalid TESTREG_STORE_TIMEOUT_MS: {timeout}"))?;
    }
    if let Ok(global) = std::env::var("TESTREG_GLOBAL_SCOPE") {
        config.selection.global_scope_enabled = global
            .parse()
            .with_context(|| format!("invalid TESTREG_GLOBAL_SCOPE: {global}"))?;
    }
    Ok(())
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("testreg"))
}
