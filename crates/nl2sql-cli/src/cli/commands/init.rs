use crate::cli::args::InitArgs;
use crate::exit_codes;
use anyhow::Context;
use nl2sql_core::config::write_sample_config;
use std::path::Path;

const DEMO_SCHEMA: &str = include_str!("../../../../../demos/shop.sql");

pub fn run(args: InitArgs, config: &Path) -> anyhow::Result<i32> {
    if config.exists() && !args.force {
        println!("Skipped {} (exists; use --force to overwrite)", config.display());
    } else {
        write_sample_config(config)?;
        println!("Created {}", config.display());
    }

    if args.demo_db {
        let dir = config.parent().filter(|p| !p.as_os_str().is_empty());
        let db = dir.unwrap_or_else(|| Path::new(".")).join("shop.db");
        if db.exists() {
            println!("Skipped {} (exists)", db.display());
        } else {
            let conn = rusqlite::Connection::open(&db)
                .with_context(|| format!("failed to create {}", db.display()))?;
            conn.execute_batch(DEMO_SCHEMA)
                .context("failed to load demo schema")?;
            println!("Created {}", db.display());
        }
    }
    Ok(exit_codes::SUCCESS)
}
