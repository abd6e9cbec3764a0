//! Request dispatcher task.
//!
//! Owns the transport and the pending-call registry. Transport events,
//! caller commands and expiry sweeps are all handled on this one task, so
//! registration always completes before the envelope that could trigger its
//! reply is transmitted.

use crate::codec;
use crate::domain::correlation::EnvelopeId;
use crate::domain::envelope::Envelope;
use crate::domain::error::{ClientError, CodecError, TransportError};
use crate::pending::{Continuation, PendingCallRegistry, PendingStats, Resolution};
use crate::ports::transport::{Transport, TransportEvent, TransportState};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Registry state as seen from a [`crate::Client`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub pending: usize,
    pub stats: PendingStats,
}

/// Requests from client handles to the dispatcher task
pub(crate) enum Command {
    Notify {
        kind: String,
        msg: serde_json::Value,
        ack: oneshot::Sender<Result<EnvelopeId, ClientError>>,
    },
    Request {
        kind: String,
        msg: serde_json::Value,
        continuation: Continuation,
        ack: oneshot::Sender<Result<EnvelopeId, ClientError>>,
    },
    IsPending {
        id: EnvelopeId,
        ack: oneshot::Sender<bool>,
    },
    Snapshot {
        ack: oneshot::Sender<RegistrySnapshot>,
    },
    Subscribe {
        ack: oneshot::Sender<broadcast::Receiver<Envelope>>,
    },
    Close {
        ack: oneshot::Sender<Result<(), ClientError>>,
    },
}

pub(crate) struct Dispatcher<T: Transport> {
    transport: T,
    registry: PendingCallRegistry,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<TransportState>,
    /// Sole sender; subscribers see `Closed` once the dispatcher is dropped.
    unsolicited: broadcast::Sender<Envelope>,
    sweep_interval: Duration,
}

impl<T: Transport> Dispatcher<T> {
    pub(crate) fn new(
        transport: T,
        registry: PendingCallRegistry,
        commands: mpsc::Receiver<Command>,
        state: watch::Sender<TransportState>,
        unsolicited: broadcast::Sender<Envelope>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            transport,
            registry,
            commands,
            state,
            unsolicited,
            sweep_interval,
        }
    }

    /// Drive the connection until it closes or every client handle is gone.
    pub(crate) async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                // Transport first: an open or a reply that is already queued
                // is observed before the next caller command.
                biased;

                event = self.transport.next_event() => {
                    if !self.handle_event(event) {
                        break;
                    }
                }
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    None => {
                        debug!("All client handles dropped");
                        self.shutdown(Some("client dropped".into())).await;
                        break;
                    }
                },
                _ = sweep.tick() => {
                    let expired = self.registry.remove_expired(Instant::now());
                    if expired > 0 {
                        debug!(removed = expired, "Swept expired pending calls");
                    }
                }
            }
        }

        let stats = self.registry.stats();
        info!(
            registered = stats.registered,
            resolved = stats.resolved,
            unmatched = stats.unmatched,
            expired = stats.expired,
            abandoned = stats.abandoned,
            "Dispatcher stopped"
        );
    }

    /// Returns false once the connection is finished.
    fn handle_event(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Opened => {
                info!("Connection open");
                self.state.send_replace(TransportState::Open);
                true
            }
            TransportEvent::Message(raw) => {
                self.dispatch_inbound(&raw);
                true
            }
            TransportEvent::Closed(cause) => {
                let abandoned = self.registry.abandon_all(cause.clone());
                if abandoned > 0 {
                    warn!(
                        cause = ?cause,
                        abandoned = abandoned,
                        "Connection closed with calls pending"
                    );
                } else {
                    info!(cause = ?cause, "Connection closed");
                }
                self.state.send_replace(TransportState::Closed);
                false
            }
        }
    }

    /// Returns false once the connection is finished.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Notify { kind, msg, ack } => {
                let id = self.registry.next_id(&kind);
                let result = self.transmit(&id, kind, msg).await.map(|()| id);
                let _ = ack.send(result);
            }
            Command::Request {
                kind,
                msg,
                continuation,
                ack,
            } => {
                let result = self.send_request(kind, msg, continuation).await;
                let _ = ack.send(result);
            }
            Command::IsPending { id, ack } => {
                let _ = ack.send(self.registry.is_pending(&id));
            }
            Command::Snapshot { ack } => {
                let _ = ack.send(RegistrySnapshot {
                    pending: self.registry.pending_count(),
                    stats: self.registry.stats(),
                });
            }
            Command::Subscribe { ack } => {
                let _ = ack.send(self.unsolicited.subscribe());
            }
            Command::Close { ack } => {
                let result = self.shutdown(Some("closed by client".into())).await;
                let _ = ack.send(result.map_err(ClientError::from));
                return false;
            }
        }
        true
    }

    async fn send_request(
        &mut self,
        kind: String,
        msg: serde_json::Value,
        continuation: Continuation,
    ) -> Result<EnvelopeId, ClientError> {
        // Without an open transport nothing is registered; the caller gets the
        // error instead of a continuation that could only be abandoned.
        if self.transport.state() != TransportState::Open {
            return Err(TransportError::NotOpen.into());
        }

        let id = self.registry.next_id(&kind);
        self.registry.register(id.clone(), &kind, continuation)?;

        if let Err(e) = self.transmit(&id, kind, msg).await {
            self.registry.cancel(&id);
            return Err(e);
        }
        Ok(id)
    }

    async fn transmit(
        &mut self,
        id: &EnvelopeId,
        kind: String,
        msg: serde_json::Value,
    ) -> Result<(), ClientError> {
        let envelope = Envelope::new(id.clone(), kind, msg);
        let payload = codec::encode(&envelope)?;

        if let Err(e) = self.transport.send(payload).await {
            warn!(id = %id, kind = %envelope.kind, error = %e, "Send failed");
            return Err(e.into());
        }

        trace!(id = %id, kind = %envelope.kind, "Envelope sent");
        Ok(())
    }

    fn dispatch_inbound(&mut self, raw: &[u8]) {
        let envelope = match codec::decode(raw) {
            Ok(envelope) => envelope,
            Err(CodecError::Decode(e)) => {
                warn!(error = %e, len = raw.len(), "Discarding malformed message");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Discarding invalid envelope");
                return;
            }
        };

        let id = envelope.id.clone();
        match self.registry.resolve(&id, envelope) {
            Resolution::Matched => {}
            Resolution::Unmatched(envelope) => {
                // Locally shaped ids are echoes of fire-and-forget sends;
                // anything else was pushed by the remote side.
                debug!(
                    id = %id,
                    kind = %envelope.kind,
                    echo = id.kind_prefix().is_some(),
                    "Unsolicited envelope"
                );
                // No subscribers is fine.
                let _ = self.unsolicited.send(envelope);
            }
        }
    }

    async fn shutdown(&mut self, cause: Option<String>) -> Result<(), TransportError> {
        let result = self.transport.close().await;
        if let Err(e) = &result {
            warn!(error = %e, "Error closing transport");
        }

        let abandoned = self.registry.abandon_all(cause);
        if abandoned > 0 {
            debug!(abandoned = abandoned, "Abandoned pending calls on shutdown");
        }
        self.state.send_replace(TransportState::Closed);
        result
    }
}
