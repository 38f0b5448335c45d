//! Single-threaded runtime for the echo server.
//!
//! - `Connection` / `ConnectionRegistry`: fixed-slot client ownership
//! - `Server`: readiness multiplexer, acceptor and main loop
//! - `Shutdown`: signal-driven and programmatic stop

pub(crate) mod connection;
mod mio_impl;
mod shutdown;

pub(crate) use connection::{Connection, ConnectionRegistry};
pub use mio_impl::Server;
pub use shutdown::install_signal_handlers;

use crate::config::Config;

/// Bind the listener and serve until SIGINT/SIGTERM.
pub fn run(config: &Config) -> std::io::Result<()> {
    let server = Server::bind(config)?;
    server.run()
}
