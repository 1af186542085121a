//! # Peer Connection
//!
//! The seam between the call state machine and the platform's WebRTC
//! implementation. Codec negotiation and ICE gathering stay inside the
//! platform; this crate only drives the offer/answer/candidate sequence.
//!
//! Asynchronous platform callbacks (trickle ICE, remote tracks, ICE state)
//! are pushed into the call engine's queue through a [`PeerEventSink`], so
//! they are handled in order with relay messages and UI actions.

#[cfg(target_arch = "wasm32")]
pub mod browser;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::call::{CallId, CallInput};
use crate::error::Result;
use crate::media::{LocalStream, TrackKind};
use crate::signaling::IceCandidate;

/// Which half of the offer/answer exchange a description is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Sent by the caller
    Offer,
    /// Sent by the callee
    Answer,
}

/// A remote SDP blob and its role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// Offer or answer
    pub kind: SdpKind,
    /// Raw SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// A remote offer.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// A remote answer.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// `RTCIceConnectionState`, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    /// Gathering has not started
    New,
    /// Candidate pairs are being checked
    Checking,
    /// A usable pair was found
    Connected,
    /// Checking finished with a usable pair
    Completed,
    /// Connectivity was lost; may recover
    Disconnected,
    /// No usable pair; terminal
    Failed,
    /// The connection was closed
    Closed,
}

impl IceConnectionState {
    /// Media can flow in this state.
    pub fn is_connected(&self) -> bool {
        matches!(self, IceConnectionState::Connected | IceConnectionState::Completed)
    }
}

/// Something the platform reported about a live peer connection.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Trickle ICE produced a local candidate to send to the peer
    LocalCandidate(IceCandidate),

    /// The first (or another) remote track arrived
    RemoteTrack {
        /// Platform track id
        track_id: String,
        /// Audio or video
        kind: TrackKind,
    },

    /// ICE connectivity changed
    IceStateChanged(IceConnectionState),
}

/// Where a peer connection reports its [`PeerEvent`]s.
///
/// Holds only a weak reference to the engine queue, so an abandoned peer
/// connection cannot keep a stopped engine alive.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    call_id: CallId,
    inputs: mpsc::WeakUnboundedSender<CallInput>,
}

impl PeerEventSink {
    pub(crate) fn new(call_id: CallId, inputs: mpsc::WeakUnboundedSender<CallInput>) -> Self {
        Self { call_id, inputs }
    }

    /// The call this peer connection belongs to
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Queue an event for the engine. Returns `false` once the engine has
    /// stopped.
    pub fn emit(&self, event: PeerEvent) -> bool {
        match self.inputs.upgrade() {
            Some(tx) => tx
                .send(CallInput::Peer {
                    call_id: self.call_id.clone(),
                    event,
                })
                .is_ok(),
            None => false,
        }
    }
}

/// One platform peer connection, exclusively owned by a call session.
#[async_trait]
pub trait PeerConnection: Send {
    /// Attach every track of the local stream.
    fn add_local_stream(&mut self, stream: &LocalStream) -> Result<()>;

    /// Create an offer, set it as the local description and return its SDP.
    async fn create_offer(&mut self) -> Result<String>;

    /// Create an answer to the applied remote offer, set it as the local
    /// description and return its SDP.
    async fn create_answer(&mut self) -> Result<String>;

    /// Apply the peer's offer or answer.
    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<()>;

    /// Apply one remote ICE candidate. Only valid after the remote
    /// description.
    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()>;

    /// Close the connection and detach its callbacks.
    fn close(&mut self);
}

/// Builds peer connections for new call sessions.
pub trait PeerFactory: Send + Sync {
    /// Create a connection using `ice_servers` (STUN/TURN URLs) that reports
    /// to `events`.
    fn create(&self, ice_servers: &[String], events: PeerEventSink) -> Result<Box<dyn PeerConnection>>;
}

// ============================================================================
// TEST DOUBLES
// ============================================================================
