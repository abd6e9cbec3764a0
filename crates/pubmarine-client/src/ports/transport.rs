//! Outbound port for the message transport.

use crate::domain::error::TransportError;
use async_trait::async_trait;

/// Lifecycle of a single connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Open,
    Closed,
}

/// Notifications produced by a transport, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is ready for `send`
    Opened,
    /// One raw inbound message
    Message(Vec<u8>),
    /// The connection ended, with an optional cause. Delivered at most once.
    Closed(Option<String>),
}

/// A single bidirectional, message-oriented connection.
///
/// Implementations never retry or reconnect.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Current lifecycle state
    fn state(&self) -> TransportState;

    /// Transmit one pre-serialized message.
    ///
    /// Fails with [`TransportError::NotOpen`] outside the open window.
    async fn send(&mut self, payload: String) -> Result<(), TransportError>;

    /// Wait for the next event.
    ///
    /// Must be cancel-safe: the dispatcher polls it inside `select!`. After
    /// `Closed` has been returned the future never completes.
    async fn next_event(&mut self) -> TransportEvent;

    /// Close the connection. Idempotent.
    async fn close(&mut self) -> Result<(), TransportError>;
}
