#![forbid(unsafe_code)]

mod cmd;
mod output;
mod snapshot;

use clap::{Parser, Subcommand, ValueEnum};
use std::env;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    name = "tardy",
    author,
    version,
    about = "tardy: delinquency lifecycle reconciliation",
    long_about = None
)]
struct Cli {
    /// Log line format on stderr. Falls back to `TARDY_LOG_FORMAT`.
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile one tenant's snapshot against persisted state and print
    /// fired events as JSON lines.
    Reconcile(cmd::reconcile::ReconcileArgs),

    /// Show tracked positions and their categories.
    Show(cmd::show::ShowArgs),
}

fn init_tracing(format: Option<LogFormat>) {
    let filter = EnvFilter::try_from_env("TARDY_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "tardy=debug,info"
        } else {
            "tardy=info,warn"
        })
    });

    let format = format.unwrap_or_else(|| match env::var("TARDY_LOG_FORMAT").as_deref() {
        Ok("json") => LogFormat::Json,
        _ => LogFormat::Text,
    });

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Reconcile(ref args) => cmd::reconcile::run_reconcile(args),
        Commands::Show(ref args) => cmd::show::run_show(args),
    }
}
