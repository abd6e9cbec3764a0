//! Correlation ID carried in the `Id` field of every envelope.
//!
//! Generated ids have the shape `{type}:{pending}:{uuid}`, where the trailing
//! UUID v7 supplies the entropy and keeps ids roughly time-ordered in logs.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Correlation ID matching a reply to the request that caused it.
///
/// The remote side treats the value as opaque and echoes it back verbatim,
/// so any string received on the wire is a valid `EnvelopeId`, including
/// the empty string used on some unsolicited pushes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeId(String);

impl EnvelopeId {
    /// Wrap an id received from (or destined for) the wire.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh id for a request of the given type.
    ///
    /// `pending` is the number of calls currently in flight. Uniqueness among
    /// pending calls is enforced by the registry, which regenerates on clash.
    pub fn generate(kind: &str, pending: usize) -> Self {
        Self(format!("{}:{}:{}", kind, pending, Uuid::now_v7().simple()))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Operation type prefix for ids produced by [`EnvelopeId::generate`].
    ///
    /// Returns `None` for ids that were not generated locally.
    pub fn kind_prefix(&self) -> Option<&str> {
        let mut parts = self.0.rsplitn(3, ':');
        let _entropy = parts.next()?;
        let _pending = parts.next()?.parse::<usize>().ok()?;
        parts.next()
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EnvelopeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for EnvelopeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<EnvelopeId> for String {
    fn from(id: EnvelopeId) -> Self {
        id.0
    }
}

impl AsRef<str> for EnvelopeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_differ() {
        let id1 = EnvelopeId::generate("inst", 0);
        let id2 = EnvelopeId::generate("inst", 0);
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_generated_id_shape() {
        let id = EnvelopeId::generate("schema-set", 3);
        let parts: Vec<&str> = id.as_str().split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "schema-set");
        assert_eq!(parts[1], "3");
        assert_eq!(parts[2].len(), 32); // simple UUID: 32 hex digits
    }

    #[test]
    fn test_kind_prefix_with_colons_in_type() {
        let id = EnvelopeId::generate("ns:inst", 1);
        assert_eq!(id.kind_prefix(), Some("ns:inst"));

        assert_eq!(EnvelopeId::new("").kind_prefix(), None);
        assert_eq!(EnvelopeId::new("push-42").kind_prefix(), None);
    }

    #[test]
    fn test_envelope_id_serialization() {
        let id = EnvelopeId::new("sub:0:abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"sub:0:abc\"");
        let parsed: EnvelopeId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
