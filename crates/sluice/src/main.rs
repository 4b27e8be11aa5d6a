//! The `sluice` command line host.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use sluice_runtime::SluiceRuntime;

/// Runs a pluggable data pipeline described by a configuration file.
#[derive(Debug, Parser)]
#[command(name = "sluice", version, about)]
struct Args {
    /// Path to the configuration file.
    #[arg(long, short, default_value = "/etc/sluice/default.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let runtime = SluiceRuntime::builder()
        .config_file(&args.config)
        .build()
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    runtime.run().await?;
    Ok(())
}
