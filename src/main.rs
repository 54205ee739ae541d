//! netfault command-line entry point.

use netfault::config::Config;
use netfault::harness::{self, Mode};
use netfault::server::StopSignal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (config, command) = Config::load()?;

    // `version` is the only subcommand that starts no listeners
    let mode = match Mode::from_command(&command) {
        Some(mode) => mode,
        None => {
            println!("netfault {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let stop = StopSignal::new();
    tokio::spawn(stop_on_signal(stop.clone()));

    harness::run(config, mode, stop).await?;
    Ok(())
}

/// Set `stop` on Ctrl-C, or SIGTERM on unix.
async fn stop_on_signal(stop: StopSignal) {
    terminated().await;
    info!("Shutting down");
    stop.stop();
}

#[cfg(unix)]
async fn terminated() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminated() {
    let _ = tokio::signal::ctrl_c().await;
}
