#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use anyhow::Context;
use clap::Parser;
use logpilot_core::runtime::DockerRuntime;
use logpilot_core::{Pilot, Settings};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Sidecar controller that keeps per-container log-shipper configurations
/// in sync with the containers running on this host.
#[derive(Parser)]
#[command(name = "logpilot")]
#[command(about = "Collect container log files from a docker host")]
struct Cli {
    /// Template file rendered into per-container shipper configuration.
    #[arg(long, short = 't')]
    template: PathBuf,

    /// Directory where the host root filesystem is mounted.
    #[arg(long, short = 'b', default_value = "/host")]
    base: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Parse the template and settings, then exit without watching.
    #[arg(long, short = 'd')]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = format!("hyper=off,{}", cli.log_level.to_lowercase());
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).context("could not parse log level")?,
        )
        .with_level(true)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let template = std::fs::read_to_string(&cli.template)
        .with_context(|| format!("reading template {}", cli.template.display()))?;

    let settings = Settings::from_env()?;
    info!(
        "starting logpilot: shipper={} base={} prefixes={:?}",
        settings.shipper.as_str(),
        cli.base,
        settings.log_prefixes
    );

    let runtime = Arc::new(DockerRuntime::connect()?);
    let pilot = Pilot::new(&template, cli.base.as_str(), runtime, settings)?;

    if cli.dry_run {
        info!("dry run: template parsed and settings valid");
        return Ok(());
    }

    pilot.watch().await?;
    info!("event stream closed, shutting down");
    Ok(())
}
