//! testreg-core: Test registry selection, consistency and health engine.
//!
//! This crate decides which test a caller receives, keeps the registry in
//! sync with the authoritative test catalog and scores the registry's health.
//! Persistence is abstracted behind [`store::RegistryStore`].

pub mod cache;
pub mod config;
pub mod consistency;
pub mod error;
pub mod health;
pub mod model;
pub mod selection;
pub mod service;
pub mod statistics;
pub mod store;

pub use config::{load_config, load_config_from, RegistryConfig};
pub use error::{RegistryError, StoreError};
pub use model::{CatalogTest, EntryUpdate, OrganizationId, RegistryEntry, Strategy};
pub use service::RegistryService;
pub use store::RegistryStore;
