//! testreg CLI: maintenance and inspection of a test registry state file.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use testreg_core::model::{OrganizationId, Strategy};

mod commands;

#[derive(Parser)]
#[command(name = "testreg", version, about = "Test registry selection, consistency and health")]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Registry state file (overrides config and TESTREG_STATE)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a starter config and an empty state file
    Init,

    /// Select tests for an organization and record their use
    Select {
        /// Organization to select for
        #[arg(long)]
        org: OrganizationId,

        /// Strategy: balanced, round_robin, random (default from config)
        #[arg(long)]
        strategy: Option<Strategy>,

        /// Number of distinct tests to select
        #[arg(long, default_value = "1")]
        count: usize,
    },

    /// Score registry health
    Health {
        /// Limit to one organization
        #[arg(long)]
        org: Option<OrganizationId>,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,

        /// Exit code 1 if the score is below this value
        #[arg(long)]
        fail_below: Option<u8>,
    },

    /// Report drift between registry and catalog without changing anything
    Validate {
        #[arg(long)]
        org: Option<OrganizationId>,
    },

    /// Deactivate orphaned entries and register missing catalog tests
    Heal {
        #[arg(long)]
        org: Option<OrganizationId>,
    },

    /// Register a test, or refresh an existing entry
    Register {
        #[arg(long)]
        test_id: Uuid,

        #[arg(long)]
        name: String,

        #[arg(long)]
        org: OrganizationId,
    },

    /// Register or refresh every catalog test
    ReregisterAll {
        #[arg(long)]
        org: Option<OrganizationId>,
    },

    /// Remove a test from selection
    Deactivate {
        #[arg(long)]
        test_id: Uuid,

        #[arg(long, default_value = "deactivated by operator")]
        reason: String,
    },

    /// Return a test to selection
    Activate {
        #[arg(long)]
        test_id: Uuid,

        #[arg(long, default_value = "activated by operator")]
        reason: String,
    },

    /// Deactivate tests unused for a long time
    Cleanup {
        /// Days without use (default from config)
        #[arg(long)]
        days: Option<u32>,

        /// Usage count below which a stale test is deactivated (default from config)
        #[arg(long)]
        usage: Option<u64>,
    },

    /// Add or replace a catalog test
    CatalogAdd {
        #[arg(long)]
        test_id: Uuid,

        #[arg(long)]
        name: String,

        #[arg(long)]
        org: OrganizationId,
    },

    /// Remove a test from the catalog
    CatalogRemove {
        #[arg(long)]
        test_id: Uuid,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("testreg=info")),
        )
        .init();

    let cli = Cli::parse();
    let opts = commands::Options {
        config: cli.config,
        state: cli.state,
    };

    let result = match cli.command {
        Commands::Init => commands::init::execute(&opts),
        Commands::Select {
            org,
            strategy,
            count,
        } => commands::select::execute(&opts, org, strategy, count).await,
        Commands::Health {
            org,
            format,
            fail_below,
        } => commands::health::execute(&opts, org, &format, fail_below).await,
        Commands::Validate { org } => commands::consistency::validate(&opts, org).await,
        Commands::Heal { org } => commands::consistency::heal(&opts, org).await,
        Commands::Register { test_id, name, org } => {
            commands::register::register(&opts, test_id, name, org).await
        }
        Commands::ReregisterAll { org } => commands::register::reregister_all(&opts, org).await,
        Commands::Deactivate { test_id, reason } => {
            commands::admin::deactivate(&opts, test_id, &reason).await
        }
        Commands::Activate { test_id, reason } => {
            commands::admin::activate(&opts, test_id, &reason).await
        }
        Commands::Cleanup { days, usage } => commands::admin::cleanup(&opts, days, usage).await,
        Commands::CatalogAdd { test_id, name, org } => {
            commands::catalog::add(&opts, test_id, name, org).await
        }
        Commands::CatalogRemove { test_id } => commands::catalog::remove(&opts, test_id).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
