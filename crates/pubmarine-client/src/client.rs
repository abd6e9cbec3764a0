//! Public call surface.
//!
//! A [`Client`] is a cheap, cloneable handle to the dispatcher task that owns
//! the connection. Every call is forwarded over a channel and answered once
//! the dispatcher has acted on it, so transmission errors come back to the
//! caller directly.

use crate::adapters::ws::WsTransport;
use crate::dispatcher::{Command, Dispatcher, RegistrySnapshot};
use crate::domain::config::ClientConfig;
use crate::domain::correlation::EnvelopeId;
use crate::domain::envelope::Envelope;
use crate::domain::error::{CallError, ClientError, ClientResult, CodecError, TransportError};
use crate::pending::{CallResult, Continuation, PendingCallRegistry};
use crate::ports::transport::{Transport, TransportState};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Handle to a running connection.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<TransportState>,
}

impl Client {
    /// Connect to `config.url` over WebSocket and start the dispatcher.
    pub async fn connect(config: &ClientConfig) -> ClientResult<(Self, JoinHandle<()>)> {
        config.validate()?;
        let transport = WsTransport::connect(&config.url, config.max_message_size).await?;
        Ok(Self::spawn(transport, config))
    }

    /// Start a dispatcher task over an existing transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<T: Transport>(transport: T, config: &ClientConfig) -> (Self, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (state_tx, state_rx) = watch::channel(transport.state());
        let (unsolicited_tx, _) = broadcast::channel(config.unsolicited_buffer.max(1));

        let dispatcher = Dispatcher::new(
            transport,
            PendingCallRegistry::new(config.request_timeout),
            command_rx,
            state_tx,
            unsolicited_tx,
            config.sweep_interval,
        );
        let handle = tokio::spawn(dispatcher.run());

        let client = Self {
            commands: command_tx,
            state: state_rx,
        };
        (client, handle)
    }

    /// Current connection state
    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    /// Wait for the open notification.
    ///
    /// Fails with `NotOpen` if the connection closes first.
    pub async fn opened(&self) -> ClientResult<()> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|s| *s != TransportState::Connecting)
            .await
            .map(|s| *s)
            .unwrap_or(TransportState::Closed);

        match reached {
            TransportState::Open => Ok(()),
            _ => Err(TransportError::NotOpen.into()),
        }
    }

    /// Send without registering interest in a reply.
    ///
    /// Only transmission is reported; returns the id the envelope carried.
    pub async fn notify(
        &self,
        kind: impl Into<String>,
        msg: impl Serialize,
    ) -> ClientResult<EnvelopeId> {
        let kind = kind.into();
        let msg = to_value(msg)?;
        self.roundtrip(|ack| Command::Notify { kind, msg, ack })
            .await?
    }

    /// Send a request and get a future for its single reply.
    pub async fn request(
        &self,
        kind: impl Into<String>,
        msg: impl Serialize,
    ) -> ClientResult<PendingReply> {
        let (tx, rx) = oneshot::channel();
        let id = self
            .send_request(kind.into(), msg, Continuation::Reply(tx))
            .await?;
        Ok(PendingReply { id, rx })
    }

    /// Send a request whose reply is handed to `callback`.
    ///
    /// The callback runs on the dispatcher task, exactly once, unless this
    /// call itself returns an error.
    pub async fn request_with<F>(
        &self,
        kind: impl Into<String>,
        msg: impl Serialize,
        callback: F,
    ) -> ClientResult<EnvelopeId>
    where
        F: FnOnce(CallResult) + Send + 'static,
    {
        self.send_request(kind.into(), msg, Continuation::callback(callback))
            .await
    }

    /// Send a request and wait for its reply.
    pub async fn call(&self, kind: impl Into<String>, msg: impl Serialize) -> ClientResult<Envelope> {
        self.request(kind, msg).await?.await
    }

    /// Subscribe to envelopes that matched no pending call.
    ///
    /// Only envelopes dispatched after this returns are seen. The receiver
    /// reports `RecvError::Closed` once the dispatcher stops.
    pub async fn unsolicited(&self) -> broadcast::Receiver<Envelope> {
        match self.roundtrip(|ack| Command::Subscribe { ack }).await {
            Ok(rx) => rx,
            Err(_) => {
                // Already stopped: hand out a receiver that is closed from the start
                let (_, rx) = broadcast::channel(1);
                rx
            }
        }
    }

    pub async fn is_pending(&self, id: &EnvelopeId) -> ClientResult<bool> {
        let id = id.clone();
        self.roundtrip(|ack| Command::IsPending { id, ack }).await
    }

    pub async fn pending_count(&self) -> ClientResult<usize> {
        Ok(self.snapshot().await?.pending)
    }

    /// Pending count and lifetime counters
    pub async fn snapshot(&self) -> ClientResult<RegistrySnapshot> {
        self.roundtrip(|ack| Command::Snapshot { ack }).await
    }

    /// Close the connection. Pending calls fail with `ConnectionClosed`.
    pub async fn close(&self) -> ClientResult<()> {
        match self.roundtrip(|ack| Command::Close { ack }).await {
            Ok(result) => result,
            // Already stopped
            Err(e) if e.is_not_open() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn send_request(
        &self,
        kind: String,
        msg: impl Serialize,
        continuation: Continuation,
    ) -> ClientResult<EnvelopeId> {
        let msg = to_value(msg)?;
        self.roundtrip(|ack| Command::Request {
            kind,
            msg,
            continuation,
            ack,
        })
        .await?
    }

    /// Hand a command to the dispatcher and wait for its answer.
    ///
    /// A stopped dispatcher means the transport is outside its open window.
    async fn roundtrip<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> ClientResult<R> {
        let (ack, rx) = oneshot::channel();
        self.commands
            .send(command(ack))
            .await
            .map_err(|_| TransportError::NotOpen)?;
        rx.await.map_err(|_| TransportError::NotOpen.into())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn to_value(msg: impl Serialize) -> Result<serde_json::Value, CodecError> {
    serde_json::to_value(msg).map_err(CodecError::Encode)
}

/// The eventual reply to a [`Client::request`].
///
/// Dropping it abandons interest; a late reply is then discarded.
#[derive(Debug)]
pub struct PendingReply {
    id: EnvelopeId,
    rx: oneshot::Receiver<CallResult>,
}

impl PendingReply {
    /// Id the request was sent with
    pub fn id(&self) -> &EnvelopeId {
        &self.id
    }
}

impl Future for PendingReply {
    type Output = ClientResult<Envelope>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| match result {
            Ok(Ok(envelope)) => Ok(envelope),
            Ok(Err(e)) => Err(e.into()),
            // Dispatcher stopped without reaching this call
            Err(_) => Err(CallError::ConnectionClosed(None).into()),
        })
    }
}
