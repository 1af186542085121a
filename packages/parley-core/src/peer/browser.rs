//! `RTCPeerConnection` backend.
//!
//! Trickle ICE: every gathered candidate is emitted as soon as the browser
//! reports it instead of waiting for gathering to complete.
//!
//! The page renders media itself, so the local and remote `MediaStream`s of
//! each live connection are kept in a per-thread table it can query with
//! [`local_stream`] and [`remote_stream`].

use std::cell::RefCell;
use std::collections::HashMap;

use async_trait::async_trait;
use send_wrapper::SendWrapper;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

use super::{IceConnectionState, PeerConnection, PeerEvent, PeerEventSink, PeerFactory, SdpKind, SessionDescription};
use crate::call::CallId;
use crate::error::{Error, Result};
use crate::media::browser::BrowserTrack;
use crate::media::{LocalStream, TrackKind};
use crate::signaling::IceCandidate;

#[derive(Default)]
struct CallStreams {
    local: Option<web_sys::MediaStream>,
    remote: Option<web_sys::MediaStream>,
}

thread_local! {
    static STREAMS: RefCell<HashMap<CallId, CallStreams>> = RefCell::new(HashMap::new());
}

/// The local stream attached to a call's connection.
pub fn local_stream(call_id: &CallId) -> Option<web_sys::MediaStream> {
    STREAMS.with(|s| s.borrow().get(call_id).and_then(|c| c.local.clone()))
}

/// The stream carrying the peer's media for a call.
pub fn remote_stream(call_id: &CallId) -> Option<web_sys::MediaStream> {
    STREAMS.with(|s| s.borrow().get(call_id).and_then(|c| c.remote.clone()))
}

/// Builds browser peer connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserPeerFactory;

impl PeerFactory for BrowserPeerFactory {
    fn create(&self, ice_servers: &[String], events: PeerEventSink) -> Result<Box<dyn PeerConnection>> {
        let pc = new_rtc_peer_connection(ice_servers)
            .map_err(|e| Error::PeerConnectionFailed(format!("{:?}", e)))?;
        Ok(Box::new(BrowserPeerConnection::attach(pc, events)))
    }
}

/// Create an RTCPeerConnection with the given STUN/TURN URLs
fn new_rtc_peer_connection(ice_servers: &[String]) -> std::result::Result<web_sys::RtcPeerConnection, JsValue> {
    let servers = js_sys::Array::new();

    let server = js_sys::Object::new();
    let urls = js_sys::Array::new();
    for url in ice_servers {
        urls.push(&JsValue::from_str(url));
    }
    js_sys::Reflect::set(&server, &"urls".into(), &urls)?;
    servers.push(&server);

    let config = web_sys::RtcConfiguration::new();
    config.set_ice_servers(&servers);

    web_sys::RtcPeerConnection::new_with_configuration(&config)
}

/// One browser peer connection with its event callbacks installed.
pub struct BrowserPeerConnection {
    call_id: CallId,
    pc: SendWrapper<web_sys::RtcPeerConnection>,
    _onicecandidate: SendWrapper<Closure<dyn FnMut(web_sys::RtcPeerConnectionIceEvent)>>,
    _ontrack: SendWrapper<Closure<dyn FnMut(web_sys::RtcTrackEvent)>>,
    _oniceconnectionstatechange: SendWrapper<Closure<dyn FnMut(web_sys::Event)>>,
    closed: bool,
}

impl BrowserPeerConnection {
    fn attach(pc: web_sys::RtcPeerConnection, events: PeerEventSink) -> Self {
        let call_id = events.call_id().clone();
        let candidate_events = events.clone();
        let onicecandidate = Closure::wrap(Box::new(move |event: web_sys::RtcPeerConnectionIceEvent| {
            // A null candidate marks the end of gathering; trickle has
            // nothing to send for it.
            if let Some(candidate) = event.candidate() {
                candidate_events.emit(PeerEvent::LocalCandidate(IceCandidate {
                    candidate: candidate.candidate(),
                    sdp_mid: candidate.sdp_mid(),
                    sdp_m_line_index: candidate.sdp_m_line_index(),
                    username_fragment: None,
                }));
            }
        }) as Box<dyn FnMut(web_sys::RtcPeerConnectionIceEvent)>);
        pc.set_onicecandidate(Some(onicecandidate.as_ref().unchecked_ref()));

        let track_events = events.clone();
        let ontrack = Closure::wrap(Box::new(move |event: web_sys::RtcTrackEvent| {
            let track = event.track();
            let stream = event
                .streams()
                .get(0)
                .dyn_into::<web_sys::MediaStream>()
                .ok()
                .or_else(|| {
                    let stream = web_sys::MediaStream::new().ok()?;
                    stream.add_track(&track);
                    Some(stream)
                });
            STREAMS.with(|s| {
                s.borrow_mut()
                    .entry(track_events.call_id().clone())
                    .or_default()
                    .remote = stream;
            });
            if let Some(kind) = TrackKind::parse(&track.kind()) {
                track_events.emit(PeerEvent::RemoteTrack {
                    track_id: track.id(),
                    kind,
                });
            }
        }) as Box<dyn FnMut(web_sys::RtcTrackEvent)>);
        pc.set_ontrack(Some(ontrack.as_ref().unchecked_ref()));

        let state_pc = pc.clone();
        let onstate = Closure::wrap(Box::new(move |_: web_sys::Event| {
            let state = match state_pc.ice_connection_state() {
                web_sys::RtcIceConnectionState::New => IceConnectionState::New,
                web_sys::RtcIceConnectionState::Checking => IceConnectionState::Checking,
                web_sys::RtcIceConnectionState::Connected => IceConnectionState::Connected,
                web_sys::RtcIceConnectionState::Completed => IceConnectionState::Completed,
                web_sys::RtcIceConnectionState::Disconnected => IceConnectionState::Disconnected,
                web_sys::RtcIceConnectionState::Failed => IceConnectionState::Failed,
                web_sys::RtcIceConnectionState::Closed => IceConnectionState::Closed,
                _ => return,
            };
            events.emit(PeerEvent::IceStateChanged(state));
        }) as Box<dyn FnMut(web_sys::Event)>);
        pc.set_oniceconnectionstatechange(Some(onstate.as_ref().unchecked_ref()));

        Self {
            call_id,
            pc: SendWrapper::new(pc),
            _onicecandidate: SendWrapper::new(onicecandidate),
            _ontrack: SendWrapper::new(ontrack),
            _oniceconnectionstatechange: SendWrapper::new(onstate),
            closed: false,
        }
    }

    fn handle(&self) -> web_sys::RtcPeerConnection {
        (*self.pc).clone()
    }
}

fn negotiation(step: &str, err: JsValue) -> Error {
    Error::NegotiationFailed(format!("{}: {:?}", step, err))
}

#[async_trait]
impl PeerConnection for BrowserPeerConnection {
    fn add_local_stream(&mut self, stream: &LocalStream) -> Result<()> {
        for track in stream.tracks() {
            let Some(browser) = track.as_any().downcast_ref::<BrowserTrack>() else {
                return Err(Error::PeerConnectionFailed(format!(
                    "track {} was not captured by the browser",
                    track.id()
                )));
            };
            self.pc
                .add_track(browser.track(), browser.stream(), &js_sys::Array::new());
            STREAMS.with(|s| {
                s.borrow_mut().entry(self.call_id.clone()).or_default().local =
                    Some(browser.stream().clone());
            });
        }
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<String> {
        let pc = self.handle();
        SendWrapper::new(async move {
            let offer = JsFuture::from(pc.create_offer())
                .await
                .map_err(|e| negotiation("createOffer", e))?;
            let offer = offer.unchecked_into::<web_sys::RtcSessionDescriptionInit>();
            JsFuture::from(pc.set_local_description(&offer))
                .await
                .map_err(|e| negotiation("setLocalDescription", e))?;
            pc.local_description()
                .map(|d| d.sdp())
                .ok_or_else(|| Error::NegotiationFailed("no local description".into()))
        })
        .await
    }

    async fn create_answer(&mut self) -> Result<String> {
        let pc = self.handle();
        SendWrapper::new(async move {
            let answer = JsFuture::from(pc.create_answer())
                .await
                .map_err(|e| negotiation("createAnswer", e))?;
            let answer = answer.unchecked_into::<web_sys::RtcSessionDescriptionInit>();
            JsFuture::from(pc.set_local_description(&answer))
                .await
                .map_err(|e| negotiation("setLocalDescription", e))?;
            pc.local_description()
                .map(|d| d.sdp())
                .ok_or_else(|| Error::NegotiationFailed("no local description".into()))
        })
        .await
    }

    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        let pc = self.handle();
        SendWrapper::new(async move {
            let sdp_type = match description.kind {
                SdpKind::Offer => web_sys::RtcSdpType::Offer,
                SdpKind::Answer => web_sys::RtcSdpType::Answer,
            };
            let remote = web_sys::RtcSessionDescriptionInit::new(sdp_type);
            remote.set_sdp(&description.sdp);
            JsFuture::from(pc.set_remote_description(&remote))
                .await
                .map(|_| ())
                .map_err(|e| negotiation("setRemoteDescription", e))
        })
        .await
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        let pc = self.handle();
        SendWrapper::new(async move {
            let init = web_sys::RtcIceCandidateInit::new(&candidate.candidate);
            init.set_sdp_mid(candidate.sdp_mid.as_deref());
            init.set_sdp_m_line_index(candidate.sdp_m_line_index);
            let ice = web_sys::RtcIceCandidate::new(&init)
                .map_err(|e| Error::InvalidCandidate(format!("{:?}", e)))?;
            JsFuture::from(pc.add_ice_candidate_with_opt_rtc_ice_candidate(Some(&ice)))
                .await
                .map(|_| ())
                .map_err(|e| Error::InvalidCandidate(format!("{:?}", e)))
        })
        .await
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pc.set_onicecandidate(None);
        self.pc.set_ontrack(None);
        self.pc.set_oniceconnectionstatechange(None);
        self.pc.close();
        STREAMS.with(|s| s.borrow_mut().remove(&self.call_id));
    }
}

impl Drop for BrowserPeerConnection {
    fn drop(&mut self) {
        self.close();
    }
}
