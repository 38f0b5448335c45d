//! Echo protocol implementation.
//!
//! Plain text over a stream socket, one connection per client:
//! - Server sends a greeting on connect.
//! - Anything not starting with `#` is echoed back verbatim.
//! - Lines starting with `#` are control commands.
//!
//! ## Protocol Format
//!
//! ```text
//! Server:  ECHO Daemon v1.0 \r\n        (on connect)
//! Client:  hello\n                     -> hello\n
//! Client:  #say hi all\n               -> hi all\n to every client
//! Client:  #quit\n  or  #quit\r\n      -> connection closed, no reply
//! Client:  #anything-else\n            -> unknown control command\n
//! Server:  shutting down, goodbye\n    (to every client on shutdown)
//! ```
//!
//! Each read of at most [`READ_CHUNK`] bytes is classified on its own;
//! there is no reassembly of lines split across reads.

pub mod handler;
pub mod parser;

pub use handler::{handle_chunk, Disposition};

/// Sent to every client right after it is accepted.
pub const GREETING: &[u8] = b"ECHO Daemon v1.0 \r\n";

/// Sent to every client when the server shuts down.
pub const FAREWELL: &[u8] = b"shutting down, goodbye\n";

/// Reply to a `#` command that is neither `#quit` nor `#say`.
pub const UNKNOWN_COMMAND: &[u8] = b"unknown control command\n";

/// Largest single read handed to the parser.
pub const READ_CHUNK: usize = 1024;
