//! WebSocket transport over tokio-tungstenite.

use crate::domain::error::TransportError;
use crate::ports::transport::{Transport, TransportEvent, TransportState};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// A single WebSocket connection.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    url: String,
    state: TransportState,
    /// Whether `Opened` has been handed out yet
    announced: bool,
    max_message_size: usize,
}

impl WsTransport {
    /// Open a connection to `url`.
    pub async fn connect(url: &str, max_message_size: usize) -> Result<Self, TransportError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        info!(url = url, "WebSocket connected");

        Ok(Self {
            stream,
            url: url.to_string(),
            state: TransportState::Open,
            announced: false,
            max_message_size,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn mark_closed(&mut self, cause: Option<String>) -> TransportEvent {
        self.state = TransportState::Closed;
        info!(url = %self.url, cause = ?cause, "WebSocket connection closed");
        TransportEvent::Closed(cause)
    }

    fn check_size(&self, size: usize) -> bool {
        if size > self.max_message_size {
            warn!(
                url = %self.url,
                size = size,
                max = self.max_message_size,
                "Dropping message over size limit"
            );
            return false;
        }
        true
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn state(&self) -> TransportState {
        self.state
    }

    async fn send(&mut self, payload: String) -> Result<(), TransportError> {
        if self.state != TransportState::Open {
            return Err(TransportError::NotOpen);
        }

        self.stream
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                    TransportError::NotOpen
                }
                other => TransportError::Io(other.to_string()),
            })
    }

    async fn next_event(&mut self) -> TransportEvent {
        if self.state == TransportState::Closed {
            return std::future::pending().await;
        }

        if !self.announced {
            self.announced = true;
            return TransportEvent::Opened;
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if self.check_size(text.len()) {
                        return TransportEvent::Message(text.as_bytes().to_vec());
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if self.check_size(data.len()) {
                        return TransportEvent::Message(data.to_vec());
                    }
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // tungstenite queues the pong reply itself
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(url = %self.url, "WebSocket close received");
                    let cause = frame.map(|f| format!("{}: {}", u16::from(f.code), f.reason.as_str()));
                    return self.mark_closed(cause);
                }
                Some(Err(e)) => {
                    warn!(url = %self.url, error = %e, "WebSocket error");
                    return self.mark_closed(Some(e.to_string()));
                }
                None => return self.mark_closed(None),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.state == TransportState::Closed {
            return Ok(());
        }
        self.state = TransportState::Closed;

        match self.stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Io(e.to_string())),
        }
    }
}
