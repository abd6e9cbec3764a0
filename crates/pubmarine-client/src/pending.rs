//! Pending-call registry.
//!
//! Maps correlation ids to the continuation waiting for the reply. The
//! registry is owned by the dispatcher task and only ever touched from it,
//! so it is a plain `HashMap` behind `&mut self`.
//!
//! Flow:
//! 1. Dispatcher calls `next_id()` for the outgoing request
//! 2. Dispatcher calls `register()` with the caller's continuation
//! 3. Envelope is transmitted
//! 4. Inbound envelope arrives and the dispatcher calls `resolve()`
//! 5. Continuation fires once and the entry is gone
//!
//! Entries that never see a reply are failed by `remove_expired()` (deadline)
//! or `abandon_all()` (connection closed), so every continuation fires
//! exactly once.

use crate::domain::correlation::EnvelopeId;
use crate::domain::envelope::Envelope;
use crate::domain::error::{CallError, RegistryError};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// What a continuation receives
pub type CallResult = Result<Envelope, CallError>;

/// Where a reply is delivered
pub enum Continuation {
    /// Completes a [`crate::PendingReply`] future
    Reply(oneshot::Sender<CallResult>),
    /// Runs on the dispatcher task
    Callback(Box<dyn FnOnce(CallResult) + Send>),
}

impl Continuation {
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(CallResult) + Send + 'static,
    {
        Continuation::Callback(Box::new(f))
    }

    /// Deliver the result. Returns false if the receiving side was dropped.
    fn invoke(self, result: CallResult) -> bool {
        match self {
            Continuation::Reply(tx) => tx.send(result).is_ok(),
            Continuation::Callback(f) => {
                f(result);
                true
            }
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Continuation::Reply(tx) => f
                .debug_struct("Reply")
                .field("closed", &tx.is_closed())
                .finish(),
            Continuation::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// A call waiting for its reply
#[derive(Debug)]
struct PendingCall {
    continuation: Continuation,
    /// Request type (for logging)
    kind: String,
    created_at: Instant,
    timeout: Option<Duration>,
}

impl PendingCall {
    fn is_expired(&self, now: Instant) -> bool {
        self.timeout
            .is_some_and(|t| now.saturating_duration_since(self.created_at) > t)
    }
}

/// Counters for the registry's lifetime
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PendingStats {
    /// Calls registered
    pub registered: u64,
    /// Calls resolved by a matching reply
    pub resolved: u64,
    /// Inbound envelopes that matched no pending call
    pub unmatched: u64,
    /// Calls failed by their deadline
    pub expired: u64,
    /// Calls failed because the connection closed
    pub abandoned: u64,
    /// Calls withdrawn before a reply (e.g. transmission failed)
    pub cancelled: u64,
    /// Terminal outcomes whose receiver had already been dropped
    pub dropped: u64,
}

/// Outcome of [`PendingCallRegistry::resolve`]
#[derive(Debug)]
pub enum Resolution {
    /// The reply completed a pending call
    Matched,
    /// No call was waiting for this id; the envelope is handed back untouched
    Unmatched(Envelope),
}

impl Resolution {
    pub fn is_matched(&self) -> bool {
        matches!(self, Resolution::Matched)
    }
}

/// Registry of in-flight requests keyed by correlation id.
pub struct PendingCallRegistry {
    pending: HashMap<EnvelopeId, PendingCall>,
    /// Deadline applied to every registered call
    default_timeout: Option<Duration>,
    stats: PendingStats,
}

impl PendingCallRegistry {
    pub fn new(default_timeout: Option<Duration>) -> Self {
        Self {
            pending: HashMap::new(),
            default_timeout,
            stats: PendingStats::default(),
        }
    }

    /// Produce an id not shared with any currently pending call.
    pub fn next_id(&self, kind: &str) -> EnvelopeId {
        loop {
            let id = EnvelopeId::generate(kind, self.pending.len());
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    /// Store a continuation under `id`.
    ///
    /// Fails without touching the existing entry if `id` is already pending.
    pub fn register(
        &mut self,
        id: EnvelopeId,
        kind: &str,
        continuation: Continuation,
    ) -> Result<(), RegistryError> {
        if self.pending.contains_key(&id) {
            warn!(id = %id, kind = kind, "Refusing duplicate pending id");
            return Err(RegistryError::DuplicateId(id));
        }

        debug!(id = %id, kind = kind, "Registered pending call");

        self.pending.insert(
            id,
            PendingCall {
                continuation,
                kind: kind.to_string(),
                created_at: Instant::now(),
                timeout: self.default_timeout,
            },
        );
        self.stats.registered += 1;
        Ok(())
    }

    /// Complete the call pending under `id` with `reply`.
    pub fn resolve(&mut self, id: &EnvelopeId, reply: Envelope) -> Resolution {
        let Some(call) = self.pending.remove(id) else {
            self.stats.unmatched += 1;
            return Resolution::Unmatched(reply);
        };

        let elapsed = call.created_at.elapsed();
        self.stats.resolved += 1;
        if !call.continuation.invoke(Ok(reply)) {
            self.stats.dropped += 1;
            debug!(id = %id, kind = %call.kind, "Reply arrived after caller went away");
        } else {
            debug!(
                id = %id,
                kind = %call.kind,
                response_time_ms = elapsed.as_millis(),
                "Resolved pending call"
            );
        }

        Resolution::Matched
    }

    /// Remove a call without invoking its continuation.
    pub fn cancel(&mut self, id: &EnvelopeId) -> bool {
        if self.pending.remove(id).is_some() {
            self.stats.cancelled += 1;
            true
        } else {
            false
        }
    }

    /// Fail calls whose deadline passed before `now`.
    ///
    /// Returns the number of calls removed.
    pub fn remove_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<EnvelopeId> = self
            .pending
            .iter()
            .filter(|(_, call)| call.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            let Some(call) = self.pending.remove(id) else {
                continue;
            };
            let timeout = call.timeout.unwrap_or_default();
            warn!(
                id = %id,
                kind = %call.kind,
                timeout_ms = timeout.as_millis(),
                "Pending call timed out"
            );
            self.stats.expired += 1;
            if !call.continuation.invoke(Err(CallError::TimedOut(timeout))) {
                self.stats.dropped += 1;
            }
        }

        expired.len()
    }

    /// Fail every pending call because the connection is gone.
    ///
    /// Returns the number of calls failed.
    pub fn abandon_all(&mut self, cause: Option<String>) -> usize {
        let count = self.pending.len();
        for (id, call) in self.pending.drain() {
            debug!(id = %id, kind = %call.kind, "Abandoning pending call");
            self.stats.abandoned += 1;
            if !call
                .continuation
                .invoke(Err(CallError::ConnectionClosed(cause.clone())))
            {
                self.stats.dropped += 1;
            }
        }
        count
    }

    /// Number of calls currently pending
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: &EnvelopeId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn stats(&self) -> PendingStats {
        self.stats
    }
}

impl fmt::Debug for PendingCallRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCallRegistry")
            .field("pending", &self.pending.len())
            .field("default_timeout", &self.default_timeout)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn reply(id: &EnvelopeId, msg: serde_json::Value) -> Envelope {
        Envelope::new(id.clone(), "inst", msg)
    }

    fn register_channel(
        registry: &mut PendingCallRegistry,
        kind: &str,
    ) -> (EnvelopeId, oneshot::Receiver<CallResult>) {
        let id = registry.next_id(kind);
        let (tx, rx) = oneshot::channel();
        registry
            .register(id.clone(), kind, Continuation::Reply(tx))
            .unwrap();
        (id, rx)
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = PendingCallRegistry::new(None);

        let (id, mut rx) = register_channel(&mut registry, "inst");
        assert!(registry.is_pending(&id));
        assert_eq!(registry.pending_count(), 1);

        let resolution = registry.resolve(&id, reply(&id, json!({ "InstanceId": "abc123" })));
        assert!(resolution.is_matched());

        let env = rx.try_recv().unwrap().unwrap();
        assert_eq!(env.id, id);
        assert_eq!(env.msg["InstanceId"], "abc123");
        assert!(!registry.is_pending(&id));
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_resolve_unknown_id() {
        let mut registry = PendingCallRegistry::new(None);
        let (pending_id, _rx) = register_channel(&mut registry, "inst");

        let stray = EnvelopeId::new("");
        match registry.resolve(&stray, reply(&stray, json!({ "Id": "abc123" }))) {
            Resolution::Unmatched(env) => assert_eq!(env.msg["Id"], "abc123"),
            Resolution::Matched => panic!("stray reply must not match"),
        }

        assert!(registry.is_pending(&pending_id));
        assert_eq!(registry.stats().unmatched, 1);
        assert_eq!(registry.stats().resolved, 0);
    }

    #[test]
    fn test_second_reply_is_unmatched() {
        let mut registry = PendingCallRegistry::new(None);
        let calls = Arc::new(AtomicUsize::new(0));

        let id = registry.next_id("inst");
        let counter = calls.clone();
        registry
            .register(
                id.clone(),
                "inst",
                Continuation::callback(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert!(registry.resolve(&id, reply(&id, json!(1))).is_matched());
        assert!(!registry.resolve(&id, reply(&id, json!(2))).is_matched());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_register_keeps_original() {
        let mut registry = PendingCallRegistry::new(None);
        let (id, mut rx) = register_channel(&mut registry, "inst");

        let (tx2, _rx2) = oneshot::channel();
        let err = registry
            .register(id.clone(), "inst", Continuation::Reply(tx2))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId(id.clone()));

        registry.resolve(&id, reply(&id, json!("first")));
        assert_eq!(rx.try_recv().unwrap().unwrap().msg, json!("first"));
    }

    #[test]
    fn test_next_id_unique_among_pending() {
        let mut registry = PendingCallRegistry::new(None);
        let mut ids = std::collections::HashSet::new();
        for _ in 0..200 {
            let (id, _rx) = register_channel(&mut registry, "sub");
            assert!(ids.insert(id));
        }
        assert_eq!(registry.pending_count(), 200);
    }

    #[test]
    fn test_next_id_encodes_pending_count() {
        let mut registry = PendingCallRegistry::new(None);
        let first = registry.next_id("mut");
        assert!(first.as_str().starts_with("mut:0:"));

        let (_id, _rx) = register_channel(&mut registry, "inst");
        let second = registry.next_id("mut");
        assert!(second.as_str().starts_with("mut:1:"));
    }

    #[test]
    fn test_dropped_receiver_counts_as_dropped() {
        let mut registry = PendingCallRegistry::new(None);
        let (id, rx) = register_channel(&mut registry, "inst");
        drop(rx);

        assert!(registry.resolve(&id, reply(&id, json!(null))).is_matched());
        assert_eq!(registry.stats().resolved, 1);
        assert_eq!(registry.stats().dropped, 1);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_expired() {
        let mut registry = PendingCallRegistry::new(Some(Duration::from_millis(10)));
        let (id1, mut rx1) = register_channel(&mut registry, "inst");
        let (id2, mut rx2) = register_channel(&mut registry, "inst");

        assert_eq!(registry.remove_expired(Instant::now()), 0);

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(registry.remove_expired(later), 2);
        assert!(!registry.is_pending(&id1));
        assert!(!registry.is_pending(&id2));

        assert_eq!(
            rx1.try_recv().unwrap(),
            Err(CallError::TimedOut(Duration::from_millis(10)))
        );
        assert!(matches!(rx2.try_recv().unwrap(), Err(CallError::TimedOut(_))));
        assert_eq!(registry.stats().expired, 2);
    }

    #[tokio::test]
    async fn test_no_timeout_never_expires() {
        let mut registry = PendingCallRegistry::new(None);
        let (id, _rx) = register_channel(&mut registry, "inst");

        let much_later = Instant::now() + Duration::from_secs(3600);
        assert_eq!(registry.remove_expired(much_later), 0);
        assert!(registry.is_pending(&id));
    }

    #[test]
    fn test_abandon_all() {
        let mut registry = PendingCallRegistry::new(None);
        let (_id1, mut rx1) = register_channel(&mut registry, "inst");
        let (_id2, mut rx2) = register_channel(&mut registry, "schema-get");

        assert_eq!(registry.abandon_all(Some("going away".into())), 2);
        assert_eq!(registry.pending_count(), 0);

        let expected = Err(CallError::ConnectionClosed(Some("going away".into())));
        assert_eq!(rx1.try_recv().unwrap(), expected);
        assert_eq!(rx2.try_recv().unwrap(), expected);
        assert_eq!(registry.stats().abandoned, 2);
    }

    #[test]
    fn test_cancel() {
        let mut registry = PendingCallRegistry::new(None);
        let (id, _rx) = register_channel(&mut registry, "inst");

        assert!(registry.cancel(&id));
        assert!(!registry.is_pending(&id));
        assert!(!registry.cancel(&id));
        assert_eq!(registry.stats().cancelled, 1);
    }

    proptest! {
        #[test]
        fn replies_in_any_order_reach_their_callers(
            order in Just((0..8usize).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let mut registry = PendingCallRegistry::new(None);
            let mut calls = Vec::new();
            for _ in 0..8 {
                calls.push(register_channel(&mut registry, "inst"));
            }

            for &i in &order {
                let id = calls[i].0.clone();
                let resolution = registry.resolve(&id, reply(&id, json!({ "n": i })));
                prop_assert!(resolution.is_matched());
            }

            for (i, (id, mut rx)) in calls.into_iter().enumerate() {
                let env = rx.try_recv().unwrap().unwrap();
                prop_assert_eq!(&env.id, &id);
                prop_assert_eq!(env.msg["n"].as_u64(), Some(i as u64));
            }
            prop_assert_eq!(registry.pending_count(), 0);
        }
    }
}
