use anyhow::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};
use toxiwarden::{ControlSurface, LoggingConfig, SupervisorOptions, init_logging};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(&LoggingConfig::from_env())?;

    let options = SupervisorOptions::from_env().context("Invalid toxiproxy configuration")?;
    let args: Vec<String> = std::env::args().skip(1).collect();

    // `toxiwarden exec <args>` runs the CLI once and prints the outcome
    if args.first().map(String::as_str) == Some("exec") {
        let surface = ControlSurface::new(options)?;
        let outcome = surface.execute(&args[1..]).await;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        std::process::exit(if outcome.success { 0 } else { 1 });
    }

    let surface = ControlSurface::new(options)?;
    info!("Toxiproxy control API at {}", surface.options().base_url());

    let outcome = surface.start().await;
    if outcome.is_success() {
        info!("Tracking {} proxies", surface.proxies().len());
    } else {
        warn!("Toxiproxy server is not available: {outcome:?}");
    }

    shutdown_signal().await?;
    info!("Received shutdown signal");
    surface.shutdown().await;
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
