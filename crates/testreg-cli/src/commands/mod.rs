//! Subcommand implementations and the state they share.

pub mod admin;
pub mod catalog;
pub mod consistency;
pub mod health;
pub mod init;
pub mod register;
pub mod select;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use testreg_core::config::{load_config_from, RegistryConfig};
use testreg_core::RegistryService;
use testreg_store::JsonFileStore;

/// Options accepted by every subcommand.
pub struct Options {
    pub config: Option<PathBuf>,
    pub state: Option<PathBuf>,
}

impl Options {
    pub fn load_config(&self) -> Result<RegistryConfig> {
        let mut config = load_config_from(self.config.as_deref())?;
        if let Some(state) = &self.state {
            config.store.state_path = state.clone();
        }
        Ok(config)
    }
}

/// An opened state file and the registry built over it.
pub struct Session {
    pub store: Arc<JsonFileStore>,
    pub registry: RegistryService,
}

impl Session {
    pub fn open(opts: &Options) -> Result<Self> {
        let config = opts.load_config()?;
        let store = Arc::new(JsonFileStore::open(&config.store.state_path)?);
        tracing::debug!(state = %store.path().display(), "registry state loaded");
        let registry = RegistryService::new(store.clone(), config);
        Ok(Self { store, registry })
    }
}
