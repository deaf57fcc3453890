//! `herald` maintenance binary: read-only store inspection commands.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

mod reports;

use reports::{
    inspect_store, render_inspect_report, render_validate_report, validate_store,
};

#[derive(Debug, Parser)]
#[command(name = "herald", about = "Scheduled-announcement store maintenance")]
struct Cli {
    /// Directory holding events.json and overlay.json.
    #[arg(long, env = "HERALD_DATA_DIR", default_value = ".herald")]
    data_dir: PathBuf,

    /// Emit the report as pretty JSON instead of text.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Summarize events, anchors, and clock-in occupancy.
    Inspect,
    /// Check records and overlay for configuration problems.
    Validate,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Inspect => {
            let report = inspect_store(&cli.data_dir)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report)
                        .context("failed to render inspect json")?
                );
            } else {
                println!("{}", render_inspect_report(&report));
            }
        }
        Command::Validate => {
            let report = validate_store(&cli.data_dir)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report)
                        .context("failed to render validate json")?
                );
            } else {
                println!("{}", render_validate_report(&report));
            }
            if report.invalid_events > 0 {
                bail!(
                    "store validate failed: invalid_events={} diagnostics={}",
                    report.invalid_events,
                    report.diagnostics.len()
                );
            }
        }
    }
    Ok(())
}
