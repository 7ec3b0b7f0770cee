//! `tardy show`: inspect persisted categories.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tardy_core::config::load_config;
use tardy_core::store::tenant_namespace;
use tardy_core::{Category, PositionId, Registry, SqliteStateStore};

use crate::output::{OutputMode, render};

/// Arguments for `tardy show`.
#[derive(Args, Debug)]
pub struct ShowArgs {
    #[arg(long)]
    pub tenant: String,

    /// SQLite state database.
    #[arg(long)]
    pub db: PathBuf,

    #[arg(long, default_value = "tardy.toml")]
    pub config: PathBuf,

    /// Emit JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ShowOutput {
    tenant: String,
    initialized: bool,
    positions: Vec<TrackedPosition>,
}

#[derive(Debug, Serialize)]
struct TrackedPosition {
    id: PositionId,
    categories: Vec<Category>,
}

/// Execute `tardy show`.
pub fn run_show(args: &ShowArgs) -> Result<()> {
    if !args.db.exists() {
        anyhow::bail!(
            "state database {} not found; run `tardy reconcile` first",
            args.db.display()
        );
    }
    let config = load_config(&args.config)?;
    let store = SqliteStateStore::open(&args.db)
        .with_context(|| format!("Failed to open state database {}", args.db.display()))?;

    let namespace = tenant_namespace(&args.tenant, &config.reconcile.namespace);
    let registry = Registry::load(&store, &namespace)?;
    let payload = ShowOutput {
        tenant: args.tenant.clone(),
        initialized: registry.is_initialized()?,
        positions: registry
            .tracked()
            .into_iter()
            .map(|(id, categories)| TrackedPosition {
                id,
                categories: categories.into_iter().collect(),
            })
            .collect(),
    };

    render(OutputMode::from_json_flag(args.json), &payload, render_text)
}

fn render_text(output: &ShowOutput, w: &mut dyn Write) -> std::io::Result<()> {
    if !output.initialized {
        return writeln!(w, "{}: not initialized", output.tenant);
    }
    writeln!(
        w,
        "{}: {} tracked positions",
        output.tenant,
        output.positions.len()
    )?;
    for position in &output.positions {
        let names: Vec<String> = position.categories.iter().map(ToString::to_string).collect();
        writeln!(w, "{:>8}  {}", position.id.0, names.join(", "))?;
    }
    Ok(())
}
