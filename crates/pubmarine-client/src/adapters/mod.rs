//! Transport adapters.
//!
//! - `ws`: production WebSocket connection (tokio-tungstenite)
//! - `memory`: in-process pair used to play the remote side in tests

pub mod memory;
pub mod ws;

pub use memory::{MemoryTransport, RemoteEnd};
pub use ws::WsTransport;
