//! In-memory transport.
//!
//! [`pair`] returns the client-side [`MemoryTransport`] and a [`RemoteEnd`]
//! that plays the server: it decides when the connection opens, pushes raw
//! payloads, observes what the client sent, and closes with a cause.

use crate::codec;
use crate::domain::envelope::Envelope;
use crate::domain::error::{CodecError, TransportError};
use crate::ports::transport::{Transport, TransportEvent, TransportState};
use async_trait::async_trait;
use tokio::sync::mpsc;

enum Inbound {
    Open,
    Message(Vec<u8>),
    Close(Option<String>),
}

/// Create a connected transport/remote pair in the `Connecting` state.
pub fn pair() -> (MemoryTransport, RemoteEnd) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let transport = MemoryTransport {
        inbound: inbound_rx,
        outbound: outbound_tx,
        state: TransportState::Connecting,
    };
    let remote = RemoteEnd {
        inbound: inbound_tx,
        outbound: outbound_rx,
    };
    (transport, remote)
}

/// Client side of an in-memory connection
pub struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<String>,
    state: TransportState,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn state(&self) -> TransportState {
        self.state
    }

    async fn send(&mut self, payload: String) -> Result<(), TransportError> {
        if self.state != TransportState::Open {
            return Err(TransportError::NotOpen);
        }
        self.outbound
            .send(payload)
            .map_err(|_| TransportError::Io("remote end dropped".into()))
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            if self.state == TransportState::Closed {
                return std::future::pending().await;
            }

            match self.inbound.recv().await {
                Some(Inbound::Open) if self.state == TransportState::Connecting => {
                    self.state = TransportState::Open;
                    return TransportEvent::Opened;
                }
                Some(Inbound::Open) => {}
                Some(Inbound::Message(raw)) if self.state == TransportState::Open => {
                    return TransportEvent::Message(raw);
                }
                Some(Inbound::Message(_)) => {}
                Some(Inbound::Close(cause)) => {
                    self.state = TransportState::Closed;
                    return TransportEvent::Closed(cause);
                }
                None => {
                    self.state = TransportState::Closed;
                    return TransportEvent::Closed(Some("remote end dropped".into()));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state = TransportState::Closed;
        self.inbound.close();
        Ok(())
    }
}

/// Remote side of an in-memory connection
pub struct RemoteEnd {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl RemoteEnd {
    /// Complete the connection; the client sees `Opened`.
    pub fn open(&self) {
        let _ = self.inbound.send(Inbound::Open);
    }

    /// Deliver a raw payload to the client.
    ///
    /// Payloads pushed before `open` are discarded, like bytes on a socket
    /// that never finished connecting.
    pub fn push(&self, raw: impl Into<Vec<u8>>) {
        let _ = self.inbound.send(Inbound::Message(raw.into()));
    }

    /// Encode and deliver an envelope.
    pub fn push_envelope(&self, envelope: &Envelope) -> Result<(), CodecError> {
        self.push(codec::encode(envelope)?);
        Ok(())
    }

    /// Close the connection from the remote side.
    pub fn close(&self, cause: Option<&str>) {
        let _ = self.inbound.send(Inbound::Close(cause.map(str::to_string)));
    }

    /// Next payload the client transmitted, or `None` once the client is gone.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Next transmitted payload decoded as an envelope.
    pub async fn next_sent_envelope(&mut self) -> Option<Result<Envelope, CodecError>> {
        let raw = self.outbound.recv().await?;
        Some(codec::decode(raw.as_bytes()))
    }

    /// A payload already transmitted, without waiting.
    pub fn try_next_sent(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let (mut transport, mut remote) = pair();
        assert_eq!(transport.state(), TransportState::Connecting);

        let err = transport.send("{}".into()).await.unwrap_err();
        assert_eq!(err, TransportError::NotOpen);
        assert!(remote.try_next_sent().is_none());
    }

    #[tokio::test]
    async fn test_open_then_exchange() {
        let (mut transport, mut remote) = pair();
        remote.open();
        assert_eq!(transport.next_event().await, TransportEvent::Opened);

        transport.send("hello".into()).await.unwrap();
        assert_eq!(remote.next_sent().await.as_deref(), Some("hello"));

        remote.push("world");
        assert_eq!(
            transport.next_event().await,
            TransportEvent::Message(b"world".to_vec())
        );
    }

    #[tokio::test]
    async fn test_closed_is_terminal() {
        let (mut transport, remote) = pair();
        remote.open();
        remote.close(Some("bye"));
        remote.push("late");

        assert_eq!(transport.next_event().await, TransportEvent::Opened);
        assert_eq!(
            transport.next_event().await,
            TransportEvent::Closed(Some("bye".into()))
        );
        assert_eq!(transport.state(), TransportState::Closed);
        assert_eq!(
            transport.send("x".into()).await,
            Err(TransportError::NotOpen)
        );

        let next = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            transport.next_event(),
        )
        .await;
        assert!(next.is_err(), "no event may follow Closed");
    }

    #[tokio::test]
    async fn test_dropping_remote_closes() {
        let (mut transport, remote) = pair();
        remote.open();
        drop(remote);

        assert_eq!(transport.next_event().await, TransportEvent::Opened);
        assert!(matches!(
            transport.next_event().await,
            TransportEvent::Closed(Some(_))
        ));
    }
}
