//! Pubmarine client - correlated request/response over one WebSocket connection.
//!
//! The transport only moves independent messages in both directions. This
//! crate pairs replies with requests by the `Id` each envelope carries,
//! supports fire-and-forget sends next to awaited requests, and tolerates
//! malformed or unsolicited input.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Client handles (cloneable)                                  │
//! │    notify / request / request_with / call                    │
//! └──────────────────────────┬───────────────────────────────────┘
//!                            │ mpsc commands
//! ┌──────────────────────────┴───────────────────────────────────┐
//! │  Dispatcher task                                             │
//! │   ┌──────────────────────┐   ┌────────────────────────────┐  │
//! │   │ Pending-Call Registry│   │ Envelope Codec             │  │
//! │   │ id → continuation    │   │ {Id, Type, Msg} <-> JSON   │  │
//! │   └──────────────────────┘   └────────────────────────────┘  │
//! └──────────────────────────┬───────────────────────────────────┘
//!                            │ Transport port
//!                ┌───────────┴────────────┐
//!                ▼                        ▼
//!          WsTransport              MemoryTransport
//!        (tokio-tungstenite)          (tests)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use pubmarine_client::{Client, ClientConfig};
//! use serde_json::json;
//!
//! let config = ClientConfig::from_env();
//! let (client, _task) = Client::connect(&config).await?;
//!
//! client.notify("schema-set", json!({ "SchemaId": "test", "Schema": { "Fields": { "A": 1 } } })).await?;
//! let reply = client.call("inst", json!({ "SchemaId": "test" })).await?;
//! println!("instance {}", reply.msg["InstanceId"]);
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapters;
pub mod client;
pub mod codec;
mod dispatcher;
pub mod domain;
pub mod pending;
pub mod ports;
pub mod telemetry;

// Re-exports for public API
pub use client::{Client, PendingReply};
pub use dispatcher::RegistrySnapshot;
pub use domain::config::{ClientConfig, TelemetryConfig};
pub use domain::correlation::EnvelopeId;
pub use domain::envelope::Envelope;
pub use domain::error::{
    CallError, ClientError, ClientResult, CodecError, RegistryError, TransportError,
};
pub use pending::{CallResult, Continuation, PendingCallRegistry, PendingStats, Resolution};
pub use ports::transport::{Transport, TransportEvent, TransportState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
