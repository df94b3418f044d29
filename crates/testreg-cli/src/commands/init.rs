//! The `testreg init` command.

use std::path::Path;

use anyhow::Result;

use testreg_store::JsonFileStore;

use super::Options;

pub fn execute(opts: &Options) -> Result<()> {
    if Path::new("testreg.toml").exists() {
        println!("testreg.toml already exists, skipping.");
    } else {
        std::fs::write("testreg.toml", SAMPLE_CONFIG)?;
        println!("Created testreg.toml");
    }

    let config = opts.load_config()?;
    let state = &config.store.state_path;
    if JsonFileStore::init(state)? {
        println!("Created {}", state.display());
    } else {
        println!("{} already exists, skipping.", state.display());
    }

    println!("\nNext steps:");
    println!("  1. Add catalog tests: testreg catalog-add --test-id <UUID> --name <NAME> --org <ORG>");
    println!("  2. Register them:     testreg reregister-all");
    println!("  3. Check health:      testreg health");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# testreg configuration

[selection]
default_strategy = "balanced"
global_scope_enabled = false
global_organization_id = 0

[cache]
enabled = true
ttl_secs = 300
count_hits = false

[health]
stack_availability_penalties = true
low_redundancy_threshold = 3

[store]
state_path = "./testreg-state.json"
timeout_ms = 5000

[cleanup]
days_threshold = 90
usage_threshold = 10
"#;
