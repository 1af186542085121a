//! Call states, roles and end reasons.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::media::MediaError;

/// Lifecycle state of one call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallState {
    /// Created, nothing started yet
    Idle,
    /// Waiting for local media (callee: ringing)
    RequestingMedia,
    /// Caller: offer sent, waiting for the answer
    Offering,
    /// Callee: applying the offer and producing the answer
    Answering,
    /// Descriptions exchanged, waiting for media to flow
    Connecting,
    /// Media is flowing
    Active,
    /// Teardown in progress
    Ending,
    /// Terminal
    Ended,
}

impl CallState {
    /// Wire/UI name
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::RequestingMedia => "requesting-media",
            CallState::Offering => "offering",
            CallState::Answering => "answering",
            CallState::Connecting => "connecting",
            CallState::Active => "active",
            CallState::Ending => "ending",
            CallState::Ended => "ended",
        }
    }

    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended)
    }

    /// Whether `self → next` is a legal edge.
    pub fn can_transition_to(&self, next: CallState) -> bool {
        use CallState::*;
        match (self, next) {
            (Ended, _) => false,
            (_, Ended) => true,
            (Ending, _) => false,
            (_, Ending) => !matches!(self, Idle),
            (Idle, RequestingMedia) => true,
            (RequestingMedia, Offering) | (RequestingMedia, Answering) => true,
            (Offering, Connecting) | (Answering, Connecting) => true,
            (Connecting, Active) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the call this client is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallRole {
    /// Sent the offer
    Caller,
    /// Received the offer
    Callee,
}

/// Why a call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    /// We hung up
    LocalHangup,
    /// The peer sent `call-end`
    RemoteEnded,
    /// We declined an incoming call
    LocalReject,
    /// The peer sent `call-reject`
    RemoteReject,
    /// Local media could not be acquired
    MediaError(MediaError),
    /// The relay had no connection for the peer
    PeerUnavailable,
    /// The relay reported the peer offline mid-call
    PeerDisconnected,
    /// Not active within the setup timeout
    Timeout,
    /// ICE reported `failed`
    IceFailed,
    /// An SDP or candidate step failed
    NegotiationFailed(String),
    /// Replaced by a newer offer from the same peer
    Collision,
    /// Our relay connection went away before the call was active
    SignalingLost,
    /// A call with this peer is already in progress
    AlreadyInCall,
}

impl EndReason {
    /// Short reason string, also sent in `call-end`
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::LocalHangup => "local-hangup",
            EndReason::RemoteEnded => "remote-ended",
            EndReason::LocalReject => "local-reject",
            EndReason::RemoteReject => "remote-reject",
            EndReason::MediaError(_) => "media-error",
            EndReason::PeerUnavailable => "peer-unavailable",
            EndReason::PeerDisconnected => "peer-disconnected",
            EndReason::Timeout => "timeout",
            EndReason::IceFailed => "ice-failed",
            EndReason::NegotiationFailed(_) => "negotiation-failed",
            EndReason::Collision => "collision",
            EndReason::SignalingLost => "signaling-lost",
            EndReason::AlreadyInCall => "already-in-call",
        }
    }

    /// The peer already knows (or cannot be told) the call is over, so no
    /// `call-end` is sent.
    pub fn peer_is_informed(&self) -> bool {
        matches!(
            self,
            EndReason::RemoteEnded
                | EndReason::RemoteReject
                | EndReason::PeerUnavailable
                | EndReason::PeerDisconnected
                | EndReason::SignalingLost
        )
    }

    pub(crate) fn negotiation(err: impl fmt::Display) -> Self {
        EndReason::NegotiationFailed(err.to_string())
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::MediaError(e) => write!(f, "media-error: {}", e),
            EndReason::NegotiationFailed(detail) => write!(f, "negotiation-failed: {}", detail),
            other => f.write_str(other.as_str()),
        }
    }
}

/// How a call is recorded in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallOutcome {
    /// Reached `Active`
    Completed,
    /// Never answered (rang out, or the caller gave up)
    Missed,
    /// Declined by either side
    Rejected,
    /// Ended by an error before connecting
    Failed,
}

impl CallOutcome {
    /// Classify a finished call.
    pub fn classify(was_connected: bool, reason: &EndReason) -> Self {
        if was_connected {
            return CallOutcome::Completed;
        }
        match reason {
            EndReason::LocalReject | EndReason::RemoteReject => CallOutcome::Rejected,
            EndReason::Timeout | EndReason::LocalHangup | EndReason::RemoteEnded => CallOutcome::Missed,
            _ => CallOutcome::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_paths_are_legal() {
        use CallState::*;
        for path in [
            [Idle, RequestingMedia, Offering, Connecting, Active],
            [Idle, RequestingMedia, Answering, Connecting, Active],
        ] {
            for pair in path.windows(2) {
                assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
            }
        }
    }

    #[test]
    fn test_every_live_state_can_end() {
        use CallState::*;
        for state in [Idle, RequestingMedia, Offering, Answering, Connecting, Active, Ending] {
            assert!(state.can_transition_to(Ended));
        }
        assert!(!Idle.can_transition_to(Ending));
        assert!(Offering.can_transition_to(Ending));
    }

    #[test]
    fn test_illegal_edges() {
        use CallState::*;
        assert!(!Ended.can_transition_to(Ended));
        assert!(!Ended.can_transition_to(Idle));
        assert!(!Offering.can_transition_to(Active));
        assert!(!Offering.can_transition_to(Answering));
        assert!(!Active.can_transition_to(Connecting));
        assert!(!Ending.can_transition_to(Active));
        assert!(Ended.is_terminal());
        assert!(!Ending.is_terminal());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(CallState::RequestingMedia.to_string(), "requesting-media");
        assert_eq!(
            serde_json::to_string(&CallState::RequestingMedia).unwrap(),
            "\"requesting-media\""
        );
    }

    #[test]
    fn test_reasons() {
        assert_eq!(EndReason::RemoteReject.as_str(), "remote-reject");
        assert_eq!(
            EndReason::MediaError(MediaError::PermissionDenied).to_string(),
            "media-error: Permission to use the camera or microphone was denied"
        );
        assert!(EndReason::RemoteEnded.peer_is_informed());
        assert!(!EndReason::Timeout.peer_is_informed());
        assert!(!EndReason::LocalHangup.peer_is_informed());
    }

    #[test]
    fn test_outcomes() {
        assert_eq!(CallOutcome::classify(true, &EndReason::IceFailed), CallOutcome::Completed);
        assert_eq!(CallOutcome::classify(false, &EndReason::RemoteReject), CallOutcome::Rejected);
        assert_eq!(CallOutcome::classify(false, &EndReason::Timeout), CallOutcome::Missed);
        assert_eq!(
            CallOutcome::classify(false, &EndReason::MediaError(MediaError::DeviceInUse)),
            CallOutcome::Failed
        );
    }
}
