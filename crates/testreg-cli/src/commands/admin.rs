//! Activation toggles and stale-entry cleanup.

use anyhow::Result;
use uuid::Uuid;

use testreg_core::config::CleanupConfig;

use super::{Options, Session};

pub async fn deactivate(opts: &Options, test_id: Uuid, reason: &str) -> Result<()> {
    let session = Session::open(opts)?;
    let entry = session.registry.deactivate(test_id, reason).await?;
    println!("Deactivated {entry}: {reason}");
    Ok(())
}

pub async fn activate(opts: &Options, test_id: Uuid, reason: &str) -> Result<()> {
    let session = Session::open(opts)?;
    let entry = session.registry.activate(test_id, reason).await?;
    println!("Activated {entry}");
    Ok(())
}

pub async fn cleanup(opts: &Options, days: Option<u32>, usage: Option<u64>) -> Result<()> {
    let session = Session::open(opts)?;
    let defaults = session.registry.config().cleanup;
    let policy = CleanupConfig {
        days_threshold: days.unwrap_or(defaults.days_threshold),
        usage_threshold: usage.unwrap_or(defaults.usage_threshold),
    };

    let deactivated = session.registry.cleanup_stale(policy).await?;
    println!(
        "Deactivated {deactivated} test(s) unused for {} days with fewer than {} uses",
        policy.days_threshold, policy.usage_threshold
    );
    Ok(())
}
