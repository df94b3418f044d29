//! The `testreg validate` and `testreg heal` commands.

use anyhow::Result;

use testreg_core::model::OrganizationId;

use super::{Options, Session};

pub async fn validate(opts: &Options, org: Option<OrganizationId>) -> Result<()> {
    let session = Session::open(opts)?;
    let report = session.registry.validate_only(org).await?;

    println!(
        "Registry: {} entries ({} active), catalog: {} tests",
        report.total_registry_count, report.active_count, report.total_catalog_count
    );
    for id in &report.orphaned {
        println!("  orphaned: {id}");
    }
    for id in &report.unregistered {
        println!("  unregistered: {id}");
    }
    if !report.inactive_orphans.is_empty() {
        println!("  {} inactive entries no longer in the catalog", report.inactive_orphans.len());
    }

    if report.is_consistent() {
        println!("Registry is consistent.");
    } else {
        println!(
            "\n{} orphaned, {} unregistered. Run `testreg heal` to fix.",
            report.orphaned.len(),
            report.unregistered.len()
        );
    }

    Ok(())
}

pub async fn heal(opts: &Options, org: Option<OrganizationId>) -> Result<()> {
    let session = Session::open(opts)?;
    let outcome = session.registry.heal(org).await?;

    if outcome.is_noop() {
        println!("Nothing to heal.");
    } else {
        println!(
            "Healed: {} deactivated, {} registered",
            outcome.deactivated, outcome.created
        );
    }
    if outcome.skipped > 0 {
        println!("{} catalog test(s) skipped, see log for details", outcome.skipped);
    }

    Ok(())
}
