//! # WASM Bindings
//!
//! Browser entry points for the call client.
//!
//! ## Available Functions
//!
//! - Setup: init, version, subscribe_events
//! - Session: start, stop
//! - Calls: dial, accept, reject, hang_up, set_muted, set_camera_enabled
//! - Media: local_stream, remote_stream
//!
//! Events are pushed to the subscribed callback as JSON strings, one
//! [`CallEvent`](crate::CallEvent) per call.

use std::cell::RefCell;
use std::sync::Arc;

use wasm_bindgen::prelude::*;

use crate::call::{CallConfig, CallEngine, CallHandle, CallId};
use crate::media::browser::BrowserMediaDevices;
use crate::media::MediaAdapter;
use crate::peer::browser::{self as browser_peer, BrowserPeerFactory};
use crate::signaling::browser::BrowserRelaySocket;
use crate::signaling::outbound_channel;

// ============================================================================
// STATE
// ============================================================================

// js_sys::Function and the socket are !Send; WASM is single-threaded.
thread_local! {
    static EVENT_CALLBACK: RefCell<Option<js_sys::Function>> = RefCell::new(None);
    static CLIENT: RefCell<Option<Client>> = RefCell::new(None);
    static INITIALIZED: RefCell<bool> = RefCell::new(false);
}

struct Client {
    calls: CallHandle,
    socket: BrowserRelaySocket,
}

fn with_calls<T>(f: impl FnOnce(&CallHandle) -> crate::Result<T>) -> Result<T, JsValue> {
    CLIENT.with(|client| {
        let client = client.borrow();
        let client = client
            .as_ref()
            .ok_or_else(|| JsValue::from_str("Not started"))?;
        f(&client.calls).map_err(to_js)
    })
}

fn to_js(err: crate::Error) -> JsValue {
    JsValue::from_str(&err.to_string())
}

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Initialize Parley for web
///
/// Sets up panic hook and tracing. Must be called before any other function.
#[wasm_bindgen]
pub fn parley_wasm_init() -> Result<(), JsValue> {
    let first = INITIALIZED.with(|init| !init.replace(true));
    if !first {
        return Err(JsValue::from_str("Already initialized"));
    }

    console_error_panic_hook::set_once();
    tracing_wasm::set_as_global_default();
    Ok(())
}

/// Get version
#[wasm_bindgen]
pub fn parley_wasm_version() -> String {
    crate::VERSION.to_string()
}

/// Register the callback that receives call events as JSON strings.
#[wasm_bindgen]
pub fn parley_wasm_subscribe_events(callback: js_sys::Function) {
    EVENT_CALLBACK.with(|cb| {
        *cb.borrow_mut() = Some(callback);
    });
}

fn emit_event(json: &str) {
    EVENT_CALLBACK.with(|cb| {
        if let Some(ref callback) = *cb.borrow() {
            let _ = callback.call1(&JsValue::NULL, &JsValue::from_str(json));
        }
    });
}

// ============================================================================
// SESSION
// ============================================================================

/// Connect to the relay as `user_id` and start the call engine.
///
/// `config_json` is an optional JSON call config, e.g.
/// `{"setupTimeoutMs": 30000, "collisionPolicy": "replace-existing"}`.
#[wasm_bindgen]
pub fn parley_wasm_start(relay_url: &str, user_id: &str, config_json: Option<String>) -> Result<(), JsValue> {
    if CLIENT.with(|c| c.borrow().is_some()) {
        return Err(JsValue::from_str("Already started"));
    }

    let config = match config_json {
        Some(json) => serde_json::from_str::<CallConfig>(&json)
            .map_err(|e| JsValue::from_str(&format!("Invalid config: {}", e)))?,
        None => CallConfig::default(),
    };

    let (sink, outbox) = outbound_channel();
    let (engine, calls, mut events) = CallEngine::new(
        user_id,
        config,
        MediaAdapter::new(Arc::new(BrowserMediaDevices::new())),
        Arc::new(BrowserPeerFactory),
        Arc::new(sink),
    );

    wasm_bindgen_futures::spawn_local(engine.run());
    wasm_bindgen_futures::spawn_local(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => emit_event(&json),
                Err(e) => tracing::error!("Failed to serialize call event: {}", e),
            }
        }
    });

    let socket = BrowserRelaySocket::open(relay_url, user_id, calls.clone(), outbox).map_err(to_js)?;
    tracing::info!(user_id, relay_url, "Parley client started");

    CLIENT.with(|c| *c.borrow_mut() = Some(Client { calls, socket }));
    Ok(())
}

/// End every call, close the relay socket and stop the engine.
#[wasm_bindgen]
pub fn parley_wasm_stop() {
    if let Some(client) = CLIENT.with(|c| c.borrow_mut().take()) {
        let _ = client.calls.shutdown();
        client.socket.close();
    }
}

// ============================================================================
// CALLS
// ============================================================================

/// Call `peer`. Returns the call id.
#[wasm_bindgen]
pub fn parley_wasm_dial(peer: &str, video: bool) -> Result<String, JsValue> {
    with_calls(|calls| calls.dial(peer, video)).map(|id| id.to_string())
}

/// Accept an incoming call
#[wasm_bindgen]
pub fn parley_wasm_accept(call_id: &str) -> Result<(), JsValue> {
    with_calls(|calls| calls.accept(&CallId::from(call_id)))
}

/// Decline an incoming call
#[wasm_bindgen]
pub fn parley_wasm_reject(call_id: &str) -> Result<(), JsValue> {
    with_calls(|calls| calls.reject(&CallId::from(call_id)))
}

/// End or cancel a call
#[wasm_bindgen]
pub fn parley_wasm_hang_up(call_id: &str) -> Result<(), JsValue> {
    with_calls(|calls| calls.hang_up(&CallId::from(call_id)))
}

/// Mute or unmute the microphone
#[wasm_bindgen]
pub fn parley_wasm_set_muted(call_id: &str, muted: bool) -> Result<(), JsValue> {
    with_calls(|calls| calls.set_muted(&CallId::from(call_id), muted))
}

/// Turn the camera on or off
#[wasm_bindgen]
pub fn parley_wasm_set_camera_enabled(call_id: &str, enabled: bool) -> Result<(), JsValue> {
    with_calls(|calls| calls.set_camera_enabled(&CallId::from(call_id), enabled))
}

// ============================================================================
// MEDIA
// ============================================================================

/// Our outgoing stream for a call, for local preview.
#[wasm_bindgen]
pub fn parley_wasm_local_stream(call_id: &str) -> Option<web_sys::MediaStream> {
    browser_peer::local_stream(&CallId::from(call_id))
}

/// The peer's stream for a call, once a remote track has arrived.
#[wasm_bindgen]
pub fn parley_wasm_remote_stream(call_id: &str) -> Option<web_sys::MediaStream> {
    browser_peer::remote_stream(&CallId::from(call_id))
}
