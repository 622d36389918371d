//! Nested-Set Tree Doctor
//!
//! Standalone maintenance tool for one nested-set table in a libsql database
//! file. Prints the resulting report as pretty JSON on stdout; logs go to
//! stderr.
//!
//! # Usage
//!
//! ```bash
//! # Check a table without touching it
//! cargo run --bin tree-doctor -- ./data/app.db comment validate
//!
//! # Recompute every bound from parent links
//! cargo run --bin tree-doctor -- ./data/app.db menu_items rebuild
//!
//! # Aggregate shape
//! RUST_LOG=nestedset_core=debug cargo run --bin tree-doctor -- ./data/app.db taxonomy stats
//! ```
//!
//! `<kind>` accepts a kind name (`comment`, `menu_item`, ...) or its table
//! name. `validate` exits with status 1 when findings were reported. The tool
//! never creates tables; a missing table is reported as a storage error.
//!
//! # Configuration
//!
//! `RUST_LOG` filters log output (default `info`). Paging overrides
//! (`NESTED_SET_PAGE_SIZE`, `NESTED_SET_MAX_PAGE_SIZE`) are honored as in
//! the library.

use anyhow::{bail, Context};
use nestedset_core::{
    db::{DatabaseService, TursoTreeStore},
    models::TreeKind,
    services::{EngineConfig, NestedSetEngine},
};
use std::path::PathBuf;
use std::sync::Arc;

const USAGE: &str = "usage: tree-doctor <db-path> <kind> <validate|rebuild|stats>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [db_path, kind, command] = args.as_slice() else {
        bail!(USAGE);
    };

    let kind: TreeKind = kind
        .parse()
        .map_err(|e| anyhow::anyhow!("{}\n{}", e, USAGE))?;

    let db = DatabaseService::new(PathBuf::from(db_path))
        .await
        .with_context(|| format!("Failed to open database at {}", db_path))?;
    let store = Arc::new(TursoTreeStore::new(Arc::new(db)));
    let engine = NestedSetEngine::with_config(store, EngineConfig::from_env());

    tracing::info!("Running {} on {} tree in {}", command, kind, db_path);

    match command.as_str() {
        "validate" => {
            let report = engine.validate_tree(kind).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_valid() {
                tracing::warn!(
                    "{} finding(s) in {} tree; run `rebuild` to repair",
                    report.findings.len(),
                    kind
                );
                std::process::exit(1);
            }
        }
        "rebuild" => {
            let report = engine.rebuild_tree(kind).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "stats" => {
            let stats = engine.get_tree_statistics(kind).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }

    Ok(())
}
