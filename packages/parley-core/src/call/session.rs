//! Per-call state owned by the call manager.

use std::fmt;

use futures::future::AbortHandle;

use super::events::CallSummary;
use super::ice::CandidateBuffer;
use super::state::{CallOutcome, CallRole, CallState, EndReason};
use super::CallId;
use crate::media::{LocalStream, TrackKind};
use crate::peer::PeerConnection;
use crate::time::now_timestamp_millis;

/// One call attempt.
///
/// Owns the peer connection and local stream outright; both are taken out
/// exactly once by the manager's teardown.
pub struct CallSession {
    pub(super) call_id: CallId,
    pub(super) peer: String,
    pub(super) role: CallRole,
    pub(super) video: bool,
    pub(super) state: CallState,
    pub(super) peer_connection: Option<Box<dyn PeerConnection>>,
    pub(super) local_stream: Option<LocalStream>,
    pub(super) remote_tracks: Vec<(String, TrackKind)>,
    /// Callee only: the SDP from the offer, applied on accept
    pub(super) remote_offer: Option<String>,
    pub(super) candidates: CandidateBuffer,
    /// Callee only: the user accepted (media may still be pending)
    pub(super) accepted: bool,
    /// Callee only: our answer went out
    pub(super) answered: bool,
    /// The peer has heard of this call (offer sent, or offer received)
    pub(super) peer_aware: bool,
    pub(super) muted: bool,
    pub(super) camera_off: bool,
    /// Cancels the pending setup timeout
    pub(super) setup_timer: Option<AbortHandle>,
    pub(super) started_at: i64,
    pub(super) connected_at: Option<i64>,
}

impl CallSession {
    fn new(call_id: CallId, peer: String, role: CallRole, video: bool) -> Self {
        Self {
            call_id,
            peer,
            role,
            video,
            state: CallState::Idle,
            peer_connection: None,
            local_stream: None,
            remote_tracks: Vec::new(),
            remote_offer: None,
            candidates: CandidateBuffer::new(),
            accepted: false,
            answered: false,
            peer_aware: false,
            muted: false,
            camera_off: false,
            setup_timer: None,
            started_at: now_timestamp_millis(),
            connected_at: None,
        }
    }

    /// A call we are placing.
    pub fn outgoing(call_id: CallId, peer: impl Into<String>, video: bool) -> Self {
        Self::new(call_id, peer.into(), CallRole::Caller, video)
    }

    /// A call offered to us.
    pub fn incoming(call_id: CallId, peer: impl Into<String>, video: bool, offer_sdp: String) -> Self {
        let mut session = Self::new(call_id, peer.into(), CallRole::Callee, video);
        session.remote_offer = Some(offer_sdp);
        session.peer_aware = true;
        session
    }

    /// Call id
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// The other party's user id
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Caller or callee
    pub fn role(&self) -> CallRole {
        self.role
    }

    /// Current state
    pub fn state(&self) -> CallState {
        self.state
    }

    /// Video call
    pub fn is_video(&self) -> bool {
        self.video
    }

    /// Move to `to` if the edge is legal. Returns the `(from, to)` pair
    /// that was applied.
    pub fn transition(&mut self, to: CallState) -> Option<(CallState, CallState)> {
        let from = self.state;
        if !from.can_transition_to(to) {
            tracing::warn!(
                call_id = %self.call_id,
                from = from.as_str(),
                to = to.as_str(),
                "Ignoring illegal call transition"
            );
            return None;
        }
        self.state = to;
        if to == CallState::Active {
            self.connected_at = Some(now_timestamp_millis());
        }
        tracing::debug!(call_id = %self.call_id, from = from.as_str(), to = to.as_str(), "Call state changed");
        Some((from, to))
    }

    /// Whether teardown has anything to release
    pub(super) fn holds_resources(&self) -> bool {
        self.peer_connection.is_some() || self.local_stream.is_some()
    }

    /// The record handed to history consumers.
    pub fn summary(&self, reason: EndReason) -> CallSummary {
        let ended_at = now_timestamp_millis();
        CallSummary {
            call_id: self.call_id.clone(),
            peer: self.peer.clone(),
            role: self.role,
            video: self.video,
            started_at: self.started_at,
            connected_at: self.connected_at,
            ended_at,
            duration_ms: self.connected_at.map(|at| (ended_at - at).max(0) as u64),
            outcome: CallOutcome::classify(self.connected_at.is_some(), &reason),
            reason,
        }
    }
}

impl fmt::Debug for CallSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSession")
            .field("call_id", &self.call_id)
            .field("peer", &self.peer)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("has_peer_connection", &self.peer_connection.is_some())
            .field("local_stream", &self.local_stream)
            .field("buffered_candidates", &self.candidates.len())
            .finish()
    }
}
