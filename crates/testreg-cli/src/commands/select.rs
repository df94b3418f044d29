//! The `testreg select` command.

use anyhow::Result;

use testreg_core::model::{OrganizationId, Strategy};

use super::{Options, Session};

pub async fn execute(
    opts: &Options,
    org: OrganizationId,
    strategy: Option<Strategy>,
    count: usize,
) -> Result<()> {
    let session = Session::open(opts)?;
    let strategy = strategy.unwrap_or(session.registry.config().selection.default_strategy);

    let selected = if count == 1 {
        vec![session.registry.select_test(org, strategy).await?]
    } else {
        session.registry.select_many(org, count, strategy).await?
    };
    session.registry.flush_pending_usage().await;

    for entry in &selected {
        println!("{}\t{}\t(used {} times)", entry.test_id, entry.test_name, entry.usage_count);
    }
    if selected.len() < count {
        eprintln!("Only {} of {count} requested tests available.", selected.len());
    }

    Ok(())
}
