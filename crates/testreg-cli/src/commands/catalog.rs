//! Catalog maintenance for the state file.
//!
//! The catalog normally belongs to the content system; these commands edit
//! the snapshot kept alongside the registry.

use anyhow::Result;
use uuid::Uuid;

use testreg_core::model::{CatalogTest, OrganizationId};

use super::{Options, Session};

pub async fn add(opts: &Options, test_id: Uuid, name: String, org: OrganizationId) -> Result<()> {
    anyhow::ensure!(!name.trim().is_empty(), "test name must not be empty");
    let session = Session::open(opts)?;
    session
        .store
        .upsert_catalog_test(CatalogTest {
            test_id,
            test_name: name,
            organization_id: org,
        })
        .await?;
    println!("Catalog test {test_id} saved");
    Ok(())
}

pub async fn remove(opts: &Options, test_id: Uuid) -> Result<()> {
    let session = Session::open(opts)?;
    if session.store.remove_catalog_test(test_id).await? {
        println!("Catalog test {test_id} removed");
    } else {
        anyhow::bail!("catalog test {test_id} not found");
    }
    Ok(())
}
