//! Relay protocol message definitions.
//!
//! The relay speaks a JSON-over-WebSocket protocol. Signaling envelopes
//! are opaque to the relay: it reads `type`, `callId` and `to`, overwrites
//! `from`, and carries every other field through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Envelopes ─────────────────────────────────────────────────────────────────

/// The kinds of signaling envelope the relay will route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeKind {
    Offer,
    Answer,
    IceCandidate,
    CallEnd,
    CallReject,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Offer => "offer",
            EnvelopeKind::Answer => "answer",
            EnvelopeKind::IceCandidate => "ice-candidate",
            EnvelopeKind::CallEnd => "call-end",
            EnvelopeKind::CallReject => "call-reject",
        }
    }
}

/// A signaling envelope addressed to one user.
///
/// `payload` holds whatever kind-specific fields the client sent (`sdp`,
/// `candidate`, `video`, ...). The relay never looks inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub call_id: String,
    pub to: String,
    /// Filled in by the router from the sender's registered identity.
    #[serde(default)]
    pub from: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

// ── Client → Relay ────────────────────────────────────────────────────────────

/// Connection-level messages that are not routed anywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ControlMessage {
    /// Bind this connection to a user identity.
    /// Must be sent before any envelope.
    Register { user_id: String },

    /// Keepalive.
    Ping,
}

/// Anything a client may send to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Control(ControlMessage),
    Envelope(Envelope),
}

impl ClientMessage {
    /// Parse a text frame. The `type` field decides whether the frame is a
    /// control message or an envelope, so errors name the right shape.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        match value.get("type").and_then(Value::as_str) {
            Some("register") | Some("ping") => {
                serde_json::from_value(value).map(ClientMessage::Control)
            }
            _ => serde_json::from_value(value).map(ClientMessage::Envelope),
        }
    }
}

// ── Relay → Client ────────────────────────────────────────────────────────────

/// Notices generated by the relay itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Notice {
    /// Registration accepted.
    Registered { user_id: String },

    /// The addressed user has no live connection; the envelope was dropped.
    PeerUnavailable {
        call_id: String,
        to: String,
        kind: EnvelopeKind,
    },

    /// A newer connection registered the same user; this one is stale.
    Superseded { user_id: String },

    /// A user came online or went offline.
    Presence { user_id: String, online: bool },

    /// Protocol violation by this client.
    Error { message: String },

    /// Keepalive response.
    Pong,
}

/// Anything the relay pushes down a client socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Envelope(Envelope),
    Notice(Notice),
}

impl From<Notice> for ServerMessage {
    fn from(notice: Notice) -> Self {
        ServerMessage::Notice(notice)
    }
}

impl From<Envelope> for ServerMessage {
    fn from(envelope: Envelope) -> Self {
        ServerMessage::Envelope(envelope)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
