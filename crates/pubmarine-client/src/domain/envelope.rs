//! The three-field envelope exchanged over the transport.

use crate::domain::correlation::EnvelopeId;
use serde::{Deserialize, Serialize};

/// One message on the wire: `{"Id": .., "Type": .., "Msg": ..}`.
///
/// `Type` and `Msg` are opaque to the correlation layer. Replies from the
/// remote side may also carry an `Error` string when a request was rejected;
/// it is never written on outgoing envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id, echoed back by the remote side on replies
    #[serde(rename = "Id")]
    pub id: EnvelopeId,
    /// Remote operation name (`schema-set`, `inst`, `sub`, `mut`, ...)
    #[serde(rename = "Type")]
    pub kind: String,
    /// Uninterpreted payload
    #[serde(rename = "Msg", default)]
    pub msg: serde_json::Value,
    /// Rejection reason reported by the remote side
    #[serde(rename = "Error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn new(id: EnvelopeId, kind: impl Into<String>, msg: serde_json::Value) -> Self {
        Self {
            id,
            kind: kind.into(),
            msg,
            error: None,
        }
    }

    /// Whether the remote side flagged this envelope as a failed request.
    pub fn is_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}
