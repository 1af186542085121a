//! The call state machine's transition function.
//!
//! `CallManager::handle` applies one [`CallInput`] to the session table.
//! Peer connection steps are awaited inline, so a single input is applied
//! atomically with respect to every other input. Work that can take
//! arbitrarily long (media prompts, setup timers) is parked in `pending`
//! and comes back through the same queue as a new input.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{AbortHandle, Abortable, BoxFuture};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;

use super::config::{CallConfig, CollisionPolicy};
use super::events::{CallEvent, CallInput};
use super::session::CallSession;
use super::state::{CallRole, CallState, EndReason};
use super::CallId;
use crate::media::{LocalStream, MediaAdapter, MediaError, TrackKind};
use crate::peer::{PeerEvent, PeerEventSink, PeerFactory, SessionDescription};
use crate::signaling::{IceCandidate, RelayNotice, ServerFrame, Signal, SignalEnvelope, SignalSink};
use crate::time;

/// In-flight media acquisitions and timers. A cancelled timer yields `None`.
pub(crate) type Pending = FuturesUnordered<BoxFuture<'static, Option<CallInput>>>;

/// Owns every live call session of one local user.
pub(crate) struct CallManager {
    local_user: String,
    config: CallConfig,
    media: MediaAdapter,
    peers: Arc<dyn PeerFactory>,
    signals: Arc<dyn SignalSink>,
    sessions: HashMap<CallId, CallSession>,
    inputs: mpsc::WeakUnboundedSender<CallInput>,
    events: mpsc::UnboundedSender<CallEvent>,
    pub(crate) pending: Pending,
}

impl CallManager {
    pub(crate) fn new(
        local_user: String,
        config: CallConfig,
        media: MediaAdapter,
        peers: Arc<dyn PeerFactory>,
        signals: Arc<dyn SignalSink>,
        inputs: mpsc::WeakUnboundedSender<CallInput>,
        events: mpsc::UnboundedSender<CallEvent>,
    ) -> Self {
        Self {
            local_user,
            config,
            media,
            peers,
            signals,
            sessions: HashMap::new(),
            inputs,
            events,
            pending: FuturesUnordered::new(),
        }
    }

    pub(crate) fn state_of(&self, call_id: &CallId) -> Option<CallState> {
        self.sessions.get(call_id).map(|s| s.state)
    }

    pub(crate) fn live_calls(&self) -> usize {
        self.sessions.len()
    }

    /// Apply one input. Returns `false` once the engine should stop.
    pub(crate) async fn handle(&mut self, input: CallInput) -> bool {
        match input {
            CallInput::Dial { call_id, peer, video } => self.dial(call_id, peer, video),
            CallInput::Accept { call_id } => self.accept(call_id).await,
            CallInput::Reject { call_id } => self.reject(call_id),
            CallInput::HangUp { call_id } => self.finish(&call_id, EndReason::LocalHangup),
            CallInput::SetMuted { call_id, muted } => {
                self.toggle_media(&call_id, TrackKind::Audio, !muted)
            }
            CallInput::SetCameraEnabled { call_id, enabled } => {
                self.toggle_media(&call_id, TrackKind::Video, enabled)
            }
            CallInput::MediaAcquired { call_id, result } => self.media_acquired(call_id, result).await,
            CallInput::Relay(frame) => self.relay_frame(frame).await,
            CallInput::RelayDisconnected => self.relay_disconnected(),
            CallInput::Peer { call_id, event } => self.peer_event(call_id, event).await,
            CallInput::SetupTimeout { call_id } => self.setup_timeout(call_id),
            CallInput::Shutdown => {
                let ids: Vec<CallId> = self.sessions.keys().cloned().collect();
                for call_id in ids {
                    self.finish(&call_id, EndReason::LocalHangup);
                }
                tracing::info!("Call engine shutting down");
                return false;
            }
        }
        true
    }

    // ========================================================================
    // SESSION CREATION
    // ========================================================================

    fn dial(&mut self, call_id: CallId, peer: String, video: bool) {
        let mut session = CallSession::outgoing(call_id.clone(), peer, video);

        if self.session_with(&session.peer).is_some() {
            tracing::info!(call_id = %call_id, peer = session.peer.as_str(), "Already in a call with peer");
            self.teardown(session, EndReason::AlreadyInCall);
            return;
        }

        tracing::info!(call_id = %call_id, peer = session.peer.as_str(), video, "Placing call");
        let moved = session.transition(CallState::RequestingMedia);
        self.emit_transition(&session, moved);
        self.sessions.insert(call_id.clone(), session);
        self.start_setup(call_id, video);
    }

    fn incoming_offer(&mut self, call_id: CallId, from: String, sdp: String, video: bool) {
        if self.sessions.contains_key(&call_id) {
            tracing::debug!(call_id = %call_id, "Duplicate offer ignored");
            return;
        }
        if from.is_empty() || from == self.local_user {
            tracing::warn!(call_id = %call_id, from = from.as_str(), "Offer with unusable sender ignored");
            return;
        }

        if let Some(existing) = self.session_with(&from).cloned() {
            // Both sides dialed each other: the offer from the lower user id
            // wins on both ends, whatever the policy.
            let glare = self.is_unanswered_dial(&existing);
            let replace = if glare {
                from.as_str() < self.local_user.as_str()
            } else {
                self.config.collision_policy == CollisionPolicy::ReplaceExisting
            };
            if !replace {
                tracing::info!(
                    call_id = %call_id,
                    existing = %existing,
                    peer = from.as_str(),
                    glare,
                    "Rejecting offer: call with peer already in progress"
                );
                self.send(SignalEnvelope::new(call_id, from, Signal::CallReject));
                return;
            }
            tracing::info!(
                call_id = %call_id,
                existing = %existing,
                peer = from.as_str(),
                glare,
                "New offer replaces existing call"
            );
            self.finish(&existing, EndReason::Collision);
        }

        tracing::info!(call_id = %call_id, peer = from.as_str(), video, "Incoming call");
        let mut session = CallSession::incoming(call_id.clone(), from.clone(), video, sdp);
        let moved = session.transition(CallState::RequestingMedia);
        self.emit_transition(&session, moved);
        self.sessions.insert(call_id.clone(), session);
        self.emit(CallEvent::IncomingCall {
            call_id: call_id.clone(),
            peer: from,
            video,
        });
        self.start_setup(call_id, video);
    }

    /// Queue media acquisition and arm the setup timer.
    fn start_setup(&mut self, call_id: CallId, video: bool) {
        let media = self.media.clone();
        let media_call = call_id.clone();
        self.pending.push(
            async move {
                let result = media.acquire(video).await;
                Some(CallInput::MediaAcquired {
                    call_id: media_call,
                    result,
                })
            }
            .boxed(),
        );

        let (abort, registration) = AbortHandle::new_pair();
        let timer = Abortable::new(time::sleep(self.config.setup_timeout()), registration);
        if let Some(session) = self.sessions.get_mut(&call_id) {
            session.setup_timer = Some(abort);
        }
        self.pending.push(
            async move {
                timer.await.ok()?;
                Some(CallInput::SetupTimeout { call_id })
            }
            .boxed(),
        );
    }

    /// Wait out media requests still in flight after shutdown and release
    /// whatever they produce. An open capture prompt cannot be cancelled.
    pub(crate) async fn release_pending(&mut self) {
        while let Some(input) = self.pending.next().await {
            if let Some(CallInput::MediaAcquired {
                call_id,
                result: Ok(mut stream),
            }) = input
            {
                tracing::debug!(call_id = %call_id, "Releasing media that arrived after shutdown");
                self.media.release(&mut stream);
            }
        }
    }

    // ========================================================================
    // LOCAL ACTIONS
    // ========================================================================

    async fn accept(&mut self, call_id: CallId) {
        let Some(session) = self.sessions.get_mut(&call_id) else {
            tracing::debug!(call_id = %call_id, "Accept for unknown call ignored");
            return;
        };
        if session.role != CallRole::Callee || session.state != CallState::RequestingMedia || session.accepted {
            tracing::debug!(call_id = %call_id, state = session.state.as_str(), "Accept ignored");
            return;
        }
        session.accepted = true;
        if session.local_stream.is_some() {
            self.answer(&call_id).await;
        }
    }

    fn reject(&mut self, call_id: CallId) {
        let Some(session) = self.sessions.get(&call_id) else {
            return;
        };
        let reason = if session.role == CallRole::Callee && !session.answered {
            EndReason::LocalReject
        } else {
            EndReason::LocalHangup
        };
        self.finish(&call_id, reason);
    }

    fn toggle_media(&mut self, call_id: &CallId, kind: TrackKind, enabled: bool) {
        let Some(session) = self.sessions.get_mut(call_id) else {
            return;
        };
        match kind {
            TrackKind::Audio => session.muted = !enabled,
            TrackKind::Video => session.camera_off = !enabled,
        }
        if let Some(stream) = session.local_stream.as_mut() {
            stream.set_enabled(kind, enabled);
        }
        self.emit(CallEvent::MediaToggled {
            call_id: call_id.clone(),
            kind,
            enabled,
        });
    }

    // ========================================================================
    // MEDIA
    // ========================================================================

    async fn media_acquired(&mut self, call_id: CallId, result: Result<LocalStream, MediaError>) {
        let waiting = self
            .sessions
            .get(&call_id)
            .map(|s| s.state == CallState::RequestingMedia && s.local_stream.is_none())
            .unwrap_or(false);

        if !waiting {
            // The call ended (or moved on) while the device prompt was open.
            if let Ok(mut stream) = result {
                tracing::debug!(call_id = %call_id, "Releasing media that arrived after the call ended");
                self.media.release(&mut stream);
            }
            return;
        }

        let mut stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(call_id = %call_id, error = %e, "Local media unavailable");
                self.finish(&call_id, EndReason::MediaError(e));
                return;
            }
        };

        let Some(session) = self.sessions.get_mut(&call_id) else {
            return;
        };
        if session.muted {
            stream.set_enabled(TrackKind::Audio, false);
        }
        if session.camera_off {
            stream.set_enabled(TrackKind::Video, false);
        }
        let video = stream.has(TrackKind::Video);
        session.local_stream = Some(stream);
        let role = session.role;
        let accepted = session.accepted;
        self.emit(CallEvent::LocalMediaReady {
            call_id: call_id.clone(),
            video,
        });

        match role {
            CallRole::Caller => self.offer(&call_id).await,
            CallRole::Callee if accepted => self.answer(&call_id).await,
            CallRole::Callee => {}
        }
    }

    // ========================================================================
    // NEGOTIATION
    // ========================================================================

    async fn offer(&mut self, call_id: &CallId) {
        if let Err(reason) = self.try_offer(call_id).await {
            self.finish(call_id, reason);
        }
    }

    async fn try_offer(&mut self, call_id: &CallId) -> Result<(), EndReason> {
        let sink = PeerEventSink::new(call_id.clone(), self.inputs.clone());
        let Some(session) = self.sessions.get_mut(call_id) else {
            return Ok(());
        };
        let moved = session.transition(CallState::Offering);
        emit_transition(&self.events, session, moved);

        let peer = self
            .peers
            .create(&self.config.ice_servers, sink)
            .map_err(EndReason::negotiation)?;
        let peer = session.peer_connection.insert(peer);
        if let Some(stream) = session.local_stream.as_ref() {
            peer.add_local_stream(stream).map_err(EndReason::negotiation)?;
        }
        let sdp = peer.create_offer().await.map_err(EndReason::negotiation)?;

        let envelope = SignalEnvelope::new(
            call_id.clone(),
            session.peer.clone(),
            Signal::Offer {
                sdp,
                video: session.video,
            },
        );
        self.signals.send(envelope).map_err(|e| {
            tracing::warn!(call_id = %call_id, error = %e, "Could not send offer");
            EndReason::SignalingLost
        })?;
        session.peer_aware = true;
        tracing::info!(call_id = %call_id, peer = session.peer.as_str(), "Offer sent");
        Ok(())
    }

    async fn answer(&mut self, call_id: &CallId) {
        if let Err(reason) = self.try_answer(call_id).await {
            self.finish(call_id, reason);
        }
    }

    async fn try_answer(&mut self, call_id: &CallId) -> Result<(), EndReason> {
        let sink = PeerEventSink::new(call_id.clone(), self.inputs.clone());
        let Some(session) = self.sessions.get_mut(call_id) else {
            return Ok(());
        };
        let Some(offer_sdp) = session.remote_offer.take() else {
            return Err(EndReason::negotiation("no remote offer to answer"));
        };
        let moved = session.transition(CallState::Answering);
        emit_transition(&self.events, session, moved);

        let peer = self
            .peers
            .create(&self.config.ice_servers, sink)
            .map_err(EndReason::negotiation)?;
        let peer = session.peer_connection.insert(peer);
        if let Some(stream) = session.local_stream.as_ref() {
            peer.add_local_stream(stream).map_err(EndReason::negotiation)?;
        }
        peer.set_remote_description(SessionDescription::offer(offer_sdp))
            .await
            .map_err(EndReason::negotiation)?;
        for candidate in session.candidates.mark_remote_applied() {
            peer.add_ice_candidate(candidate)
                .await
                .map_err(EndReason::negotiation)?;
        }
        let sdp = peer.create_answer().await.map_err(EndReason::negotiation)?;

        self.signals
            .send(SignalEnvelope::new(
                call_id.clone(),
                session.peer.clone(),
                Signal::Answer { sdp },
            ))
            .map_err(|e| {
                tracing::warn!(call_id = %call_id, error = %e, "Could not send answer");
                EndReason::SignalingLost
            })?;
        session.answered = true;

        let moved = session.transition(CallState::Connecting);
        emit_transition(&self.events, session, moved);
        tracing::info!(call_id = %call_id, peer = session.peer.as_str(), "Answer sent");
        Ok(())
    }

    async fn remote_answer(&mut self, call_id: &CallId, sdp: String) -> Result<(), EndReason> {
        let Some(session) = self.sessions.get_mut(call_id) else {
            return Ok(());
        };
        if session.role != CallRole::Caller || session.state != CallState::Offering {
            tracing::debug!(call_id = %call_id, state = session.state.as_str(), "Unexpected answer ignored");
            return Ok(());
        }
        let Some(peer) = session.peer_connection.as_mut() else {
            return Err(EndReason::negotiation("answer before peer connection"));
        };
        peer.set_remote_description(SessionDescription::answer(sdp))
            .await
            .map_err(EndReason::negotiation)?;
        for candidate in session.candidates.mark_remote_applied() {
            peer.add_ice_candidate(candidate)
                .await
                .map_err(EndReason::negotiation)?;
        }
        let moved = session.transition(CallState::Connecting);
        emit_transition(&self.events, session, moved);
        Ok(())
    }

    async fn remote_candidate(&mut self, call_id: &CallId, candidate: IceCandidate) -> Result<(), EndReason> {
        let Some(session) = self.sessions.get_mut(call_id) else {
            return Ok(());
        };
        let Some(candidate) = session.candidates.accept(candidate) else {
            tracing::trace!(call_id = %call_id, buffered = session.candidates.len(), "Buffered remote candidate");
            return Ok(());
        };
        let Some(peer) = session.peer_connection.as_mut() else {
            return Err(EndReason::negotiation("candidate without peer connection"));
        };
        peer.add_ice_candidate(candidate)
            .await
            .map_err(EndReason::negotiation)
    }

    // ========================================================================
    // RELAY INPUT
    // ========================================================================

    async fn relay_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Signal(envelope) => self.envelope(envelope).await,
            ServerFrame::Notice(notice) => self.notice(notice),
        }
    }

    async fn envelope(&mut self, envelope: SignalEnvelope) {
        let SignalEnvelope {
            call_id,
            from,
            signal,
            ..
        } = envelope;

        if let Signal::Offer { sdp, video } = signal {
            self.incoming_offer(call_id, from, sdp, video);
            return;
        }

        match self.sessions.get(&call_id) {
            Some(session) if session.peer == from => {}
            Some(_) => {
                tracing::warn!(call_id = %call_id, from = from.as_str(), "Envelope from wrong peer ignored");
                return;
            }
            None => {
                tracing::debug!(call_id = %call_id, kind = signal.kind(), "Envelope for unknown call ignored");
                return;
            }
        }

        let result = match signal {
            Signal::Offer { .. } => Ok(()),
            Signal::Answer { sdp } => self.remote_answer(&call_id, sdp).await,
            Signal::IceCandidate { candidate } => self.remote_candidate(&call_id, candidate).await,
            Signal::CallEnd { reason } => {
                tracing::info!(call_id = %call_id, reason = reason.as_deref().unwrap_or(""), "Peer ended call");
                Err(EndReason::RemoteEnded)
            }
            Signal::CallReject => {
                tracing::info!(call_id = %call_id, "Peer rejected call");
                Err(EndReason::RemoteReject)
            }
        };
        if let Err(reason) = result {
            self.finish(&call_id, reason);
        }
    }

    fn notice(&mut self, notice: RelayNotice) {
        match notice {
            RelayNotice::Registered { user_id } => {
                tracing::debug!(user_id = user_id.as_str(), "Relay registration confirmed");
            }
            RelayNotice::PeerUnavailable { call_id, to, kind } => {
                let ours = self
                    .sessions
                    .get(&call_id)
                    .map(|s| s.peer == to)
                    .unwrap_or(false);
                if ours {
                    tracing::info!(call_id = %call_id, peer = to.as_str(), kind = kind.as_str(), "Peer unavailable");
                    self.finish(&call_id, EndReason::PeerUnavailable);
                }
            }
            RelayNotice::Superseded { user_id } => {
                tracing::warn!(user_id = user_id.as_str(), "Relay session superseded by another login");
                let ids: Vec<CallId> = self.sessions.keys().cloned().collect();
                for call_id in ids {
                    self.finish(&call_id, EndReason::SignalingLost);
                }
            }
            RelayNotice::Presence { user_id, online } => {
                if online {
                    return;
                }
                if let Some(call_id) = self.session_with(&user_id).cloned() {
                    tracing::info!(call_id = %call_id, peer = user_id.as_str(), "Peer went offline");
                    self.finish(&call_id, EndReason::PeerDisconnected);
                }
            }
            RelayNotice::Error { message } => {
                tracing::warn!(message = message.as_str(), "Relay reported a protocol error");
            }
            RelayNotice::Pong => {}
        }
    }

    fn relay_disconnected(&mut self) {
        let stalled: Vec<CallId> = self
            .sessions
            .values()
            .filter(|s| s.state != CallState::Active)
            .map(|s| s.call_id.clone())
            .collect();
        if !stalled.is_empty() {
            tracing::warn!(calls = stalled.len(), "Relay lost; ending calls still in setup");
        }
        for call_id in stalled {
            self.finish(&call_id, EndReason::SignalingLost);
        }
    }

    // ========================================================================
    // PEER CONNECTION EVENTS
    // ========================================================================

    async fn peer_event(&mut self, call_id: CallId, event: PeerEvent) {
        let Some(session) = self.sessions.get_mut(&call_id) else {
            return;
        };
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let envelope = SignalEnvelope::new(
                    call_id.clone(),
                    session.peer.clone(),
                    Signal::IceCandidate { candidate },
                );
                if let Err(e) = self.signals.send(envelope) {
                    tracing::debug!(call_id = %call_id, error = %e, "Local candidate not sent");
                }
            }
            PeerEvent::RemoteTrack { track_id, kind } => {
                session.remote_tracks.push((track_id.clone(), kind));
                self.emit(CallEvent::RemoteTrack {
                    call_id: call_id.clone(),
                    track_id,
                    kind,
                });
                self.mark_active(&call_id);
            }
            PeerEvent::IceStateChanged(state) => {
                tracing::debug!(call_id = %call_id, ?state, "ICE state changed");
                if state.is_connected() {
                    self.mark_active(&call_id);
                } else if state == crate::peer::IceConnectionState::Failed {
                    self.finish(&call_id, EndReason::IceFailed);
                }
            }
        }
    }

    fn mark_active(&mut self, call_id: &CallId) {
        let Some(session) = self.sessions.get_mut(call_id) else {
            return;
        };
        if session.state != CallState::Connecting {
            return;
        }
        let moved = session.transition(CallState::Active);
        emit_transition(&self.events, session, moved);
        if let Some(timer) = session.setup_timer.take() {
            timer.abort();
        }
        tracing::info!(call_id = %call_id, peer = session.peer.as_str(), "Call connected");
        self.emit(CallEvent::Connected {
            call_id: call_id.clone(),
        });
    }

    fn setup_timeout(&mut self, call_id: CallId) {
        let Some(session) = self.sessions.get(&call_id) else {
            return;
        };
        if session.state == CallState::Active {
            return;
        }
        tracing::info!(call_id = %call_id, state = session.state.as_str(), "Call setup timed out");
        self.finish(&call_id, EndReason::Timeout);
    }

    // ========================================================================
    // TEARDOWN
    // ========================================================================

    /// End a call. Safe to call for calls that already ended.
    fn finish(&mut self, call_id: &CallId, reason: EndReason) {
        if let Some(session) = self.sessions.remove(call_id) {
            self.teardown(session, reason);
        }
    }

    /// The single teardown path: close the peer connection, release media,
    /// tell the peer if it does not already know, publish the summary.
    fn teardown(&mut self, mut session: CallSession, reason: EndReason) {
        let notify = session.peer_aware && !reason.peer_is_informed();

        if session.holds_resources() || notify {
            let moved = session.transition(CallState::Ending);
            self.emit_transition(&session, moved);
        }

        if let Some(timer) = session.setup_timer.take() {
            timer.abort();
        }
        if let Some(mut peer) = session.peer_connection.take() {
            peer.close();
        }
        if let Some(mut stream) = session.local_stream.take() {
            self.media.release(&mut stream);
        }

        if notify {
            let signal = if session.role == CallRole::Callee && !session.answered {
                Signal::CallReject
            } else {
                Signal::CallEnd {
                    reason: Some(reason.as_str().to_string()),
                }
            };
            let envelope = SignalEnvelope::new(session.call_id.clone(), session.peer.clone(), signal);
            if let Err(e) = self.signals.send(envelope) {
                tracing::debug!(call_id = %session.call_id, error = %e, "Peer not notified of call end");
            }
        }

        let moved = session.transition(CallState::Ended);
        self.emit_transition(&session, moved);
        tracing::info!(
            call_id = %session.call_id,
            peer = session.peer.as_str(),
            reason = %reason,
            "Call ended"
        );
        self.emit(CallEvent::Ended {
            summary: session.summary(reason),
        });
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    /// Our own outgoing call that the peer has not answered yet.
    fn is_unanswered_dial(&self, call_id: &CallId) -> bool {
        self.sessions
            .get(call_id)
            .map(|s| {
                s.role == CallRole::Caller
                    && matches!(s.state, CallState::RequestingMedia | CallState::Offering)
            })
            .unwrap_or(false)
    }

    /// The live call with `peer`, if any.
    fn session_with(&self, peer: &str) -> Option<&CallId> {
        self.sessions
            .values()
            .find(|s| s.peer == peer)
            .map(|s| &s.call_id)
    }

    fn send(&self, envelope: SignalEnvelope) {
        if let Err(e) = self.signals.send(envelope) {
            tracing::debug!(error = %e, "Envelope not sent");
        }
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }

    fn emit_transition(&self, session: &CallSession, moved: Option<(CallState, CallState)>) {
        emit_transition(&self.events, session, moved);
    }
}

/// Free-standing so it can be used while a session is mutably borrowed
/// out of the session table.
fn emit_transition(
    events: &mpsc::UnboundedSender<CallEvent>,
    session: &CallSession,
    moved: Option<(CallState, CallState)>,
) {
    if let Some((from, to)) = moved {
        let _ = events.send(CallEvent::StateChanged {
            call_id: session.call_id.clone(),
            peer: session.peer.clone(),
            from,
            to,
        });
    }
}
