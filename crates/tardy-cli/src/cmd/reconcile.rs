//! `tardy reconcile`: one reconciliation run for one tenant.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::Args;
use tardy_core::config::load_config;
use tardy_core::lock::{RunLock, run_lock_path};
use tardy_core::{Reconciler, RunOutcome, RunReport, SqliteStateStore};

use crate::output::JsonLinesSink;
use crate::snapshot::Snapshot;

/// Arguments for `tardy reconcile`.
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Tenant whose state is reconciled.
    #[arg(long)]
    pub tenant: String,

    /// JSON snapshot of the tenant's delinquent positions.
    #[arg(long)]
    pub snapshot: PathBuf,

    /// SQLite state database (created on first use).
    #[arg(long)]
    pub db: PathBuf,

    /// Reference date for `since` computation. Defaults to today.
    #[arg(long)]
    pub today: Option<NaiveDate>,

    /// Configuration file; a missing file means defaults.
    #[arg(long, default_value = "tardy.toml")]
    pub config: PathBuf,

    /// Seconds to wait for a concurrent run to finish.
    #[arg(long, default_value_t = 30)]
    pub lock_timeout: u64,

    /// Also write the run report as JSON to this file.
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Execute `tardy reconcile`.
pub fn run_reconcile(args: &ReconcileArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let source = Snapshot::load(&args.snapshot)?.into_source();

    let lock_path = run_lock_path(&args.db);
    let _lock = RunLock::acquire(&lock_path, Duration::from_secs(args.lock_timeout))
        .with_context(|| format!("Failed to lock {}", lock_path.display()))?;
    let store = SqliteStateStore::open(&args.db)
        .with_context(|| format!("Failed to open state database {}", args.db.display()))?;

    let sink = JsonLinesSink::new(io::stdout(), config.events.listen.iter().copied());
    let today = args.today.unwrap_or_else(|| Local::now().date_naive());
    let result = Reconciler::new(&source, &store, &sink)
        .with_config(config.reconcile.clone())
        .reconcile(&args.tenant, today);
    sink.finish().context("Failed to write events")?;

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            if let Some(hint) = err.hint() {
                eprintln!("hint: {hint}");
            }
            return Err(err).with_context(|| format!("Reconciliation failed for {}", args.tenant));
        }
    };

    eprintln!("{}", summary_line(&report));
    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
    }
    Ok(())
}

fn summary_line(report: &RunReport) -> String {
    match report.outcome {
        RunOutcome::Skipped => format!("{}: skipped, no listeners", report.tenant),
        RunOutcome::Seeded => format!(
            "{}: seeded {} positions without events",
            report.tenant, report.live
        ),
        RunOutcome::Reconciled => {
            let unresolved = if report.unresolved > 0 {
                format!(", {} unresolved", report.unresolved)
            } else {
                String::new()
            };
            format!(
                "{}: {} live, {} promoted, {} defaulted, {} cured ({} repaid), {} events{}",
                report.tenant,
                report.live,
                report.promoted,
                report.defaulted,
                report.cured,
                report.repaid,
                report.commit.events_fired,
                unresolved
            )
        }
    }
}
