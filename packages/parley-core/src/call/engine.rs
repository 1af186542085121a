//! The call engine's event loop and its cloneable handle.

use std::sync::Arc;
use std::task::Poll;

use futures::StreamExt;
use tokio::sync::mpsc;

use super::config::CallConfig;
use super::events::{CallEvent, CallInput};
use super::manager::CallManager;
use super::state::CallState;
use super::CallId;
use crate::error::{Error, Result};
use crate::media::MediaAdapter;
use crate::peer::PeerFactory;
use crate::signaling::{ServerFrame, SignalSink};

/// Drives every call of one local user.
///
/// Inputs arrive through [`CallHandle`]s (UI, relay transport) and from the
/// engine's own peer connections, media requests and timers; they are
/// applied one at a time, in order.
pub struct CallEngine {
    manager: CallManager,
    inbox: mpsc::UnboundedReceiver<CallInput>,
}

impl CallEngine {
    /// Build an engine for `local_user`.
    ///
    /// Returns the engine (to be driven with [`run`](Self::run)), a handle
    /// for issuing commands and the lifecycle event stream.
    pub fn new(
        local_user: impl Into<String>,
        config: CallConfig,
        media: MediaAdapter,
        peers: Arc<dyn PeerFactory>,
        signals: Arc<dyn SignalSink>,
    ) -> (Self, CallHandle, mpsc::UnboundedReceiver<CallEvent>) {
        let local_user = local_user.into();
        let (inputs, inbox) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();

        let manager = CallManager::new(
            local_user.clone(),
            config,
            media,
            peers,
            signals,
            inputs.downgrade(),
            events_tx,
        );
        let handle = CallHandle {
            local_user,
            inputs,
        };
        (Self { manager, inbox }, handle, events)
    }

    /// Process inputs until shutdown or until every handle is dropped.
    ///
    /// Dropping all handles ends live calls as local hang-ups. Returns once
    /// media requests still in flight have completed and been released.
    pub async fn run(mut self) {
        loop {
            let input = tokio::select! {
                input = self.inbox.recv() => match input {
                    Some(input) => input,
                    None => CallInput::Shutdown,
                },
                Some(input) = self.manager.pending.next(), if !self.manager.pending.is_empty() => match input {
                    Some(input) => input,
                    None => continue,
                },
            };
            if !self.manager.handle(input).await {
                break;
            }
        }
        self.inbox.close();
        self.manager.release_pending().await;
    }

    /// Apply every input that is ready right now without waiting for more.
    ///
    /// Returns how many inputs were applied.
    pub async fn run_until_stalled(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let input = match self.inbox.try_recv() {
                Ok(input) => input,
                Err(_) if self.manager.pending.is_empty() => return applied,
                Err(_) => match futures::poll!(self.manager.pending.next()) {
                    Poll::Ready(Some(Some(input))) => input,
                    Poll::Ready(Some(None)) => continue,
                    _ => return applied,
                },
            };
            applied += 1;
            if !self.manager.handle(input).await {
                return applied;
            }
        }
    }

    /// State of a live call; `None` once it has ended or if unknown.
    pub fn state_of(&self, call_id: &CallId) -> Option<CallState> {
        self.manager.state_of(call_id)
    }

    /// Number of calls that have not ended
    pub fn live_calls(&self) -> usize {
        self.manager.live_calls()
    }
}

/// Cloneable command side of a [`CallEngine`].
#[derive(Debug, Clone)]
pub struct CallHandle {
    local_user: String,
    inputs: mpsc::UnboundedSender<CallInput>,
}

impl CallHandle {
    fn submit(&self, input: CallInput) -> Result<()> {
        self.inputs.send(input).map_err(|_| Error::EngineStopped)
    }

    /// Our user id
    pub fn local_user(&self) -> &str {
        &self.local_user
    }

    /// Start a call to `peer`. Returns the new call's id.
    pub fn dial(&self, peer: &str, video: bool) -> Result<CallId> {
        let peer = peer.trim();
        if peer.is_empty() {
            return Err(Error::InvalidPeer("empty user id".into()));
        }
        if peer == self.local_user {
            return Err(Error::InvalidPeer("cannot call yourself".into()));
        }
        let call_id = CallId::new();
        self.submit(CallInput::Dial {
            call_id: call_id.clone(),
            peer: peer.to_string(),
            video,
        })?;
        Ok(call_id)
    }

    /// Accept an incoming call.
    pub fn accept(&self, call_id: &CallId) -> Result<()> {
        self.submit(CallInput::Accept {
            call_id: call_id.clone(),
        })
    }

    /// Decline an incoming call.
    pub fn reject(&self, call_id: &CallId) -> Result<()> {
        self.submit(CallInput::Reject {
            call_id: call_id.clone(),
        })
    }

    /// End or cancel a call.
    pub fn hang_up(&self, call_id: &CallId) -> Result<()> {
        self.submit(CallInput::HangUp {
            call_id: call_id.clone(),
        })
    }

    /// Mute or unmute the microphone for a call.
    pub fn set_muted(&self, call_id: &CallId, muted: bool) -> Result<()> {
        self.submit(CallInput::SetMuted {
            call_id: call_id.clone(),
            muted,
        })
    }

    /// Turn the camera on or off for a call.
    pub fn set_camera_enabled(&self, call_id: &CallId, enabled: bool) -> Result<()> {
        self.submit(CallInput::SetCameraEnabled {
            call_id: call_id.clone(),
            enabled,
        })
    }

    /// Feed a frame received from the relay.
    pub fn relay(&self, frame: ServerFrame) -> Result<()> {
        self.submit(CallInput::Relay(frame))
    }

    /// Report that the relay socket went away.
    pub fn relay_disconnected(&self) -> Result<()> {
        self.submit(CallInput::RelayDisconnected)
    }

    /// End every call and stop the engine.
    pub fn shutdown(&self) -> Result<()> {
        self.submit(CallInput::Shutdown)
    }
}
