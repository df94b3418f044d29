//! The `testreg health` command.

use anyhow::Result;
use comfy_table::{Cell, Table};

use testreg_core::health::HealthReport;
use testreg_core::model::OrganizationId;

use super::{Options, Session};

pub async fn execute(
    opts: &Options,
    org: Option<OrganizationId>,
    format: &str,
    fail_below: Option<u8>,
) -> Result<()> {
    let session = Session::open(opts)?;
    let report = session.registry.health_report(org).await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        "text" => print_report(&report),
        other => anyhow::bail!("unknown format '{other}' (expected text or json)"),
    }

    if let Some(threshold) = fail_below {
        anyhow::ensure!(
            report.score >= threshold,
            "health score {} is below {threshold}",
            report.score
        );
    }

    Ok(())
}

fn print_report(report: &HealthReport) {
    println!("Status: {} ({}/100)", report.status, report.score);

    let stats = &report.statistics;
    let consistency = &report.consistency;
    let mut table = Table::new();
    table.set_header(vec!["Metric", "Value"]);
    let rows: [(&str, String); 9] = [
        ("Total tests", stats.total_tests.to_string()),
        ("Active", stats.active_tests.to_string()),
        ("Inactive", stats.inactive_tests.to_string()),
        ("Featured", stats.featured_tests.to_string()),
        ("Average usage", format!("{:.2}", stats.average_usage)),
        ("Total usage", stats.total_usage.to_string()),
        ("Catalog tests", consistency.total_catalog_count.to_string()),
        ("Orphaned", consistency.orphaned.len().to_string()),
        ("Unregistered", consistency.unregistered.len().to_string()),
    ];
    for (metric, value) in rows {
        table.add_row(vec![Cell::new(metric), Cell::new(value)]);
    }
    println!("{table}");

    if !report.penalties.is_empty() {
        println!("\nPenalties:");
        for penalty in &report.penalties {
            println!("  -{:>2} {penalty:?}", penalty.points());
        }
    }

    println!("\nRecommendations:");
    for rec in &report.recommendations {
        println!("  {rec}");
    }
}
