//! Relay wire protocol, client side.
//!
//! Mirrors the frames `parley-relay` accepts and emits. Control frames
//! (`register`, `ping`) and relay notices are tagged by `type`; signaling
//! envelopes carry `callId`, `to`, `from` and a kind-specific body that the
//! relay forwards untouched.

use serde::{Deserialize, Serialize};

use crate::call::CallId;

/// One trickle ICE candidate (`RTCIceCandidateInit`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// The `candidate:` attribute line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the m-line this candidate belongs to
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
    /// ICE username fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Kind-specific body of a signaling envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Signal {
    /// Caller's SDP offer
    Offer {
        /// SDP text
        sdp: String,
        /// Whether the caller wants a video call
        #[serde(default)]
        video: bool,
    },

    /// Callee's SDP answer
    Answer {
        /// SDP text
        sdp: String,
    },

    /// One trickle ICE candidate
    IceCandidate {
        /// The candidate
        candidate: IceCandidate,
    },

    /// The sender tore the call down
    CallEnd {
        /// Why, as an end-reason string
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// The callee declined the call
    CallReject,
}

impl Signal {
    /// The envelope `type` string.
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Offer { .. } => "offer",
            Signal::Answer { .. } => "answer",
            Signal::IceCandidate { .. } => "ice-candidate",
            Signal::CallEnd { .. } => "call-end",
            Signal::CallReject => "call-reject",
        }
    }
}

/// A signaling message addressed to one user.
///
/// `from` is left empty on the way out; the relay stamps it with the
/// sender's registered identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope {
    /// Call this envelope belongs to
    pub call_id: CallId,
    /// Recipient user id
    pub to: String,
    /// Sender user id, as stamped by the relay
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from: String,
    /// Kind and body
    #[serde(flatten)]
    pub signal: Signal,
}

impl SignalEnvelope {
    /// An outbound envelope (no `from`).
    pub fn new(call_id: CallId, to: impl Into<String>, signal: Signal) -> Self {
        Self {
            call_id,
            to: to.into(),
            from: String::new(),
            signal,
        }
    }
}

/// Connection-level frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ControlFrame {
    /// Bind this socket to a user id
    Register {
        /// Our user id
        user_id: String,
    },
    /// Keepalive
    Ping,
}

/// Anything the client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientFrame {
    /// Register / ping
    Control(ControlFrame),
    /// Routed envelope
    Signal(SignalEnvelope),
}

/// Notices generated by the relay itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum RelayNotice {
    /// Registration accepted
    Registered {
        /// The identity now bound to this socket
        user_id: String,
    },

    /// The addressee was not connected; the envelope was dropped
    PeerUnavailable {
        /// Call of the dropped envelope
        call_id: CallId,
        /// The unreachable user
        to: String,
        /// Envelope kind that was dropped
        kind: String,
    },

    /// Another connection registered our user id; this socket is stale
    Superseded {
        /// Our user id
        user_id: String,
    },

    /// A user came online or went offline
    Presence {
        /// Whose presence changed
        user_id: String,
        /// New status
        online: bool,
    },

    /// We violated the protocol
    Error {
        /// Human-readable detail
        message: String,
    },

    /// Keepalive response
    Pong,
}

/// Anything the relay pushes to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// Relay-generated notice
    Notice(RelayNotice),
    /// Envelope forwarded from another user
    Signal(SignalEnvelope),
}

impl ServerFrame {
    /// Parse one text frame.
    pub fn parse(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl From<RelayNotice> for ServerFrame {
    fn from(notice: RelayNotice) -> Self {
        ServerFrame::Notice(notice)
    }
}

impl From<SignalEnvelope> for ServerFrame {
    fn from(envelope: SignalEnvelope) -> Self {
        ServerFrame::Signal(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_offer_wire_shape() {
        let env = SignalEnvelope::new(
            CallId::from("c1"),
            "bob",
            Signal::Offer {
                sdp: "v=0".into(),
                video: true,
            },
        );
        let value = serde_json::to_value(&ClientFrame::Signal(env)).unwrap();
        assert_eq!(
            value,
            json!({"type": "offer", "callId": "c1", "to": "bob", "sdp": "v=0", "video": true})
        );
    }

    #[test]
    fn test_register_wire_shape() {
        let frame = ClientFrame::Control(ControlFrame::Register {
            user_id: "alice".into(),
        });
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "register", "userId": "alice"})
        );
        assert_eq!(
            serde_json::to_value(ClientFrame::Control(ControlFrame::Ping)).unwrap(),
            json!({"type": "ping"})
        );
    }

    #[test]
    fn test_parse_forwarded_candidate() {
        let text = json!({
            "type": "ice-candidate",
            "callId": "c1",
            "to": "alice",
            "from": "bob",
            "candidate": {"candidate": "candidate:0 1 udp 1 10.0.0.1 5000 typ host", "sdpMid": "0", "sdpMLineIndex": 0}
        })
        .to_string();

        let ServerFrame::Signal(env) = ServerFrame::parse(&text).unwrap() else {
            panic!("Wrong variant");
        };
        assert_eq!(env.from, "bob");
        assert_eq!(env.call_id, CallId::from("c1"));
        let Signal::IceCandidate { candidate } = env.signal else {
            panic!("Wrong signal");
        };
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_m_line_index, Some(0));
        assert_eq!(candidate.username_fragment, None);
    }

    #[test]
    fn test_parse_notices() {
        let frame = ServerFrame::parse(
            r#"{"type":"peer-unavailable","callId":"c7","to":"bob","kind":"offer"}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            ServerFrame::Notice(RelayNotice::PeerUnavailable {
                call_id: CallId::from("c7"),
                to: "bob".into(),
                kind: "offer".into(),
            })
        );

        assert_eq!(
            ServerFrame::parse(r#"{"type":"pong"}"#).unwrap(),
            ServerFrame::Notice(RelayNotice::Pong)
        );
        assert_eq!(
            ServerFrame::parse(r#"{"type":"presence","userId":"bob","online":false}"#).unwrap(),
            ServerFrame::Notice(RelayNotice::Presence {
                user_id: "bob".into(),
                online: false
            })
        );
    }

    #[test]
    fn test_offer_without_video_defaults_to_audio() {
        let frame = ServerFrame::parse(
            r#"{"type":"offer","callId":"c1","to":"bob","from":"alice","sdp":"v=0"}"#,
        )
        .unwrap();
        let ServerFrame::Signal(env) = frame else {
            panic!("Wrong variant");
        };
        assert_eq!(
            env.signal,
            Signal::Offer {
                sdp: "v=0".into(),
                video: false
            }
        );
    }

    #[test]
    fn test_call_end_reason_is_optional() {
        let frame = ServerFrame::parse(r#"{"type":"call-end","callId":"c1","to":"bob","from":"alice"}"#)
            .unwrap();
        let ServerFrame::Signal(env) = frame else {
            panic!("Wrong variant");
        };
        assert_eq!(env.signal, Signal::CallEnd { reason: None });
        assert_eq!(env.signal.kind(), "call-end");
    }

    #[test]
    fn test_unknown_frame_is_an_error() {
        assert!(ServerFrame::parse(r#"{"type":"teleport","callId":"c1"}"#).is_err());
        assert!(ServerFrame::parse("not json").is_err());
    }
}
