//! `navigator.mediaDevices.getUserMedia` backend.

use std::any::Any;

use async_trait::async_trait;
use send_wrapper::SendWrapper;
use wasm_bindgen::JsCast;
use wasm_bindgen::JsValue;
use wasm_bindgen_futures::JsFuture;

use super::{MediaConstraints, MediaDevices, MediaError, MediaTrack, TrackKind};

/// Capture through the page's `MediaDevices`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserMediaDevices;

impl BrowserMediaDevices {
    /// Create the backend.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaDevices for BrowserMediaDevices {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Vec<Box<dyn MediaTrack>>, MediaError> {
        SendWrapper::new(capture(constraints)).await
    }
}

async fn capture(constraints: MediaConstraints) -> Result<Vec<Box<dyn MediaTrack>>, MediaError> {
    let devices = web_sys::window()
        .ok_or_else(|| MediaError::Unknown("no window".into()))?
        .navigator()
        .media_devices()
        .map_err(map_dom_error)?;

    let request = web_sys::MediaStreamConstraints::new();
    request.set_audio(&JsValue::from_bool(constraints.audio));
    request.set_video(&JsValue::from_bool(constraints.video));

    let promise = devices
        .get_user_media_with_constraints(&request)
        .map_err(map_dom_error)?;
    let stream: web_sys::MediaStream = JsFuture::from(promise)
        .await
        .map_err(map_dom_error)?
        .unchecked_into();

    let tracks = stream
        .get_tracks()
        .iter()
        .filter_map(|value| {
            let track: web_sys::MediaStreamTrack = value.unchecked_into();
            let kind = TrackKind::parse(&track.kind())?;
            Some(Box::new(BrowserTrack {
                kind,
                track: SendWrapper::new(track),
                stream: SendWrapper::new(stream.clone()),
            }) as Box<dyn MediaTrack>)
        })
        .collect();
    Ok(tracks)
}

/// Map a `getUserMedia` rejection to the variant the UI distinguishes.
fn map_dom_error(err: JsValue) -> MediaError {
    let name = err
        .dyn_ref::<web_sys::DomException>()
        .map(|e| e.name())
        .unwrap_or_default();
    match name.as_str() {
        "NotAllowedError" | "SecurityError" => MediaError::PermissionDenied,
        "NotFoundError" | "OverconstrainedError" => MediaError::NoDeviceFound,
        "NotReadableError" | "AbortError" => MediaError::DeviceInUse,
        "" => MediaError::Unknown(format!("{:?}", err)),
        other => MediaError::Unknown(other.to_string()),
    }
}

/// One captured `MediaStreamTrack`.
pub struct BrowserTrack {
    kind: TrackKind,
    track: SendWrapper<web_sys::MediaStreamTrack>,
    stream: SendWrapper<web_sys::MediaStream>,
}

impl BrowserTrack {
    /// The underlying track, for `RTCPeerConnection.addTrack`
    pub fn track(&self) -> &web_sys::MediaStreamTrack {
        &self.track
    }

    /// The stream the track was captured in
    pub fn stream(&self) -> &web_sys::MediaStream {
        &self.stream
    }
}

impl MediaTrack for BrowserTrack {
    fn id(&self) -> String {
        self.track.id()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.track.set_enabled(enabled);
    }

    fn stop(&mut self) {
        self.track.stop();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
