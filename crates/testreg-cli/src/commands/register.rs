//! The `testreg register` and `testreg reregister-all` commands.

use anyhow::Result;
use uuid::Uuid;

use testreg_core::model::{CatalogTest, OrganizationId};
use testreg_core::service::Registration;

use super::{Options, Session};

pub async fn register(opts: &Options, test_id: Uuid, name: String, org: OrganizationId) -> Result<()> {
    let session = Session::open(opts)?;
    let test = CatalogTest {
        test_id,
        test_name: name,
        organization_id: org,
    };

    match session.registry.register_test(&test).await? {
        Registration::Created => println!("Registered {test_id}"),
        Registration::Updated => println!("Updated {test_id}"),
    }
    Ok(())
}

pub async fn reregister_all(opts: &Options, org: Option<OrganizationId>) -> Result<()> {
    let session = Session::open(opts)?;
    let summary = session.registry.force_reregister_all(org).await?;

    println!(
        "Re-registration complete: {} created, {} updated, {} failed",
        summary.created, summary.updated, summary.failed
    );
    anyhow::ensure!(summary.failed == 0, "{} test(s) failed to register", summary.failed);
    Ok(())
}
