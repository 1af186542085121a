//! Call engine inputs and the lifecycle events it publishes.

use serde::{Deserialize, Serialize};

use super::state::{CallOutcome, CallRole, CallState, EndReason};
use super::CallId;
use crate::media::{LocalStream, MediaError, TrackKind};
use crate::peer::PeerEvent;
use crate::signaling::ServerFrame;

/// Everything that can move a call forward, in one queue.
#[derive(Debug)]
pub enum CallInput {
    /// UI: place a call
    Dial {
        /// Id returned to the UI
        call_id: CallId,
        /// Who to call
        peer: String,
        /// Request a camera track too
        video: bool,
    },
    /// UI: accept an incoming call
    Accept {
        /// Which call
        call_id: CallId,
    },
    /// UI: decline an incoming call
    Reject {
        /// Which call
        call_id: CallId,
    },
    /// UI: end or cancel a call
    HangUp {
        /// Which call
        call_id: CallId,
    },
    /// UI: mute or unmute the microphone
    SetMuted {
        /// Which call
        call_id: CallId,
        /// `true` to mute
        muted: bool,
    },
    /// UI: turn the camera on or off
    SetCameraEnabled {
        /// Which call
        call_id: CallId,
        /// `true` to send video
        enabled: bool,
    },
    /// Local media acquisition finished
    MediaAcquired {
        /// Which call asked for it
        call_id: CallId,
        /// The stream, or why there is none
        result: Result<LocalStream, MediaError>,
    },
    /// A frame from the relay
    Relay(ServerFrame),
    /// The relay socket dropped
    RelayDisconnected,
    /// A peer connection callback
    Peer {
        /// Which call's connection
        call_id: CallId,
        /// What happened
        event: PeerEvent,
    },
    /// The setup timer for a call fired
    SetupTimeout {
        /// Which call
        call_id: CallId,
    },
    /// End every call and stop the engine
    Shutdown,
}

/// Lifecycle notifications for the UI and history consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum CallEvent {
    /// A session moved between states
    StateChanged {
        /// Which call
        call_id: CallId,
        /// The other party
        peer: String,
        /// Previous state
        from: CallState,
        /// New state
        to: CallState,
    },
    /// Someone is calling us; accept or reject it
    IncomingCall {
        /// Which call
        call_id: CallId,
        /// Caller's user id
        peer: String,
        /// Caller asked for video
        video: bool,
    },
    /// Local tracks are open
    LocalMediaReady {
        /// Which call
        call_id: CallId,
        /// A camera track is included
        video: bool,
    },
    /// The peer's media arrived
    RemoteTrack {
        /// Which call
        call_id: CallId,
        /// Platform track id
        track_id: String,
        /// Audio or video
        kind: TrackKind,
    },
    /// The call became active (sent once per call)
    Connected {
        /// Which call
        call_id: CallId,
    },
    /// Mute or camera state changed
    MediaToggled {
        /// Which call
        call_id: CallId,
        /// Which tracks
        kind: TrackKind,
        /// New enabled flag
        enabled: bool,
    },
    /// The call is over; sent once per call, after `Ended`
    Ended {
        /// The call record
        summary: CallSummary,
    },
}

impl CallEvent {
    /// The call this event is about
    pub fn call_id(&self) -> &CallId {
        match self {
            CallEvent::StateChanged { call_id, .. }
            | CallEvent::IncomingCall { call_id, .. }
            | CallEvent::LocalMediaReady { call_id, .. }
            | CallEvent::RemoteTrack { call_id, .. }
            | CallEvent::Connected { call_id }
            | CallEvent::MediaToggled { call_id, .. } => call_id,
            CallEvent::Ended { summary } => &summary.call_id,
        }
    }
}

/// Record of a finished call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSummary {
    /// Which call
    pub call_id: CallId,
    /// The other party
    pub peer: String,
    /// Our side
    pub role: CallRole,
    /// Video call
    pub video: bool,
    /// Session created (Unix ms)
    pub started_at: i64,
    /// Reached `Active` (Unix ms)
    pub connected_at: Option<i64>,
    /// Teardown finished (Unix ms)
    pub ended_at: i64,
    /// Time spent active
    pub duration_ms: Option<u64>,
    /// Why it ended
    pub reason: EndReason,
    /// History classification
    pub outcome: CallOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = CallEvent::IncomingCall {
            call_id: CallId::from("c1"),
            peer: "alice".into(),
            video: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "incoming-call", "callId": "c1", "peer": "alice", "video": true})
        );

        let event = CallEvent::StateChanged {
            call_id: CallId::from("c1"),
            peer: "alice".into(),
            from: CallState::Connecting,
            to: CallState::Active,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "state-changed");
        assert_eq!(json["to"], "active");
    }

    #[test]
    fn test_ended_event_carries_summary() {
        let summary = CallSummary {
            call_id: CallId::from("c9"),
            peer: "bob".into(),
            role: CallRole::Caller,
            video: false,
            started_at: 1_000,
            connected_at: None,
            ended_at: 2_000,
            duration_ms: None,
            reason: EndReason::Timeout,
            outcome: CallOutcome::Missed,
        };
        let event = CallEvent::Ended { summary };
        assert_eq!(event.call_id(), &CallId::from("c9"));

        let json = serde_json::to_string(&event).unwrap();
        let parsed: CallEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
        assert!(json.contains("\"endedAt\":2000"));
    }
}
