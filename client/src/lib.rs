//! Client adapter library for the relay protocol.
//!
//! A conforming client authenticates with role `client`, issues commands,
//! consumes `output`/`status`/`error` frames, tracks the agent-connected
//! flag from broadcasts, and reconnects with its own backoff. The terminal
//! and chat helpers are purely presentational.

mod chat;
mod connection;
mod sessions;
mod terminal;

pub use chat::ChatBuffer;
pub use connection::{ClientEvent, RelayClient};
pub use sessions::{CachedSession, SessionCache, STALE_AFTER_MS};
pub use terminal::TerminalScreen;
