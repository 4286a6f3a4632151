//! WebSocket message boundary for the cellrun engine.
//!
//! Provides:
//! - Wire protocol (`cmd`-tagged commands in, `type`-tagged messages out)
//! - Per-connection dispatch onto a shared [`Engine`](cellrun_engine::Engine)
//! - WebSocket transport and health route (feature: websocket)

pub mod connection;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use connection::Connection;
pub use protocol::{ClientCommand, ProtocolError, ServerMessage};
