//! Echo protocol command dispatch.
//!
//! Runs one classified chunk against the connection registry. Side effects
//! are limited to socket writes; the caller owns slot release.

use super::parser::{self, Command};
use super::UNKNOWN_COMMAND;
use crate::runtime::{Connection, ConnectionRegistry};
use tracing::{debug, warn};

/// What the event loop should do with the sender after a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep the connection open.
    Keep,
    /// Close the connection and free its slot.
    Release,
}

/// Handle one chunk received from the client in `slot`.
pub fn handle_chunk(slot: usize, input: &[u8], clients: &mut ConnectionRegistry) -> Disposition {
    let command = parser::parse(input);
    debug!(slot, ?command, "Processing command");

    match command {
        Command::Echo(data) => {
            if let Some(conn) = clients.get_mut(slot) {
                reply(slot, conn, data);
            }
            Disposition::Keep
        }
        Command::Quit => Disposition::Release,
        Command::Say(payload) => {
            let delivered = broadcast(clients, payload);
            debug!(slot, delivered, bytes = payload.len(), "Broadcast sent");
            Disposition::Keep
        }
        Command::Unknown => {
            if let Some(conn) = clients.get_mut(slot) {
                reply(slot, conn, UNKNOWN_COMMAND);
            }
            Disposition::Keep
        }
    }
}

/// Send `payload` to every live connection in slot order.
///
/// Returns how many connections took the full payload.
pub fn broadcast(clients: &mut ConnectionRegistry, payload: &[u8]) -> usize {
    let mut delivered = 0;
    for (slot, conn) in clients.iter_mut() {
        if reply(slot, conn, payload) {
            delivered += 1;
        }
    }
    delivered
}

/// Best-effort write, logging short or failed sends. Never retried.
pub(crate) fn reply(slot: usize, conn: &mut Connection, payload: &[u8]) -> bool {
    match conn.send(payload) {
        Ok(n) if n == payload.len() => true,
        Ok(n) => {
            warn!(slot, written = n, expected = payload.len(), "Short write");
            false
        }
        Err(e) => {
            warn!(slot, error = %e, "Send failed");
            false
        }
    }
}
