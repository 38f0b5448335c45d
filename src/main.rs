//! echo-daemon: a multiplexed TCP echo server
//!
//! A single thread watches the listener and every client socket for
//! readiness. Clients get a greeting on connect and their input echoed
//! back, with two control commands:
//! - `#say <text>` broadcasts to every connected client
//! - `#quit` closes the sender's connection
//!
//! SIGINT or SIGTERM says goodbye to every client and exits cleanly.
//! Configuration via CLI arguments or TOML file.

mod config;
mod protocols;
mod runtime;

use config::Config;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        max_clients = config.max_clients,
        backlog = config.backlog,
        "Starting echo-daemon"
    );

    runtime::install_signal_handlers()?;

    if let Err(e) = runtime::run(&config) {
        error!(error = %e, "Server failed");
        return Err(e.into());
    }

    info!("Server stopped");
    Ok(())
}
