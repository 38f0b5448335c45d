//! Protocol implementations.
//!
//! Each protocol has a parser module used by the runtime event loop.
//!
//! - `echo`: newline-terminated text echo with `#quit` and `#say` controls

pub mod echo;
