//! Browser relay transport over `web_sys::WebSocket`.
//!
//! Same contract as the native `RelayConnection`: register on open, feed
//! relay frames to the call engine, drain the outbox while registered and
//! report the socket going away. Reconnecting is left to the page, which
//! knows whether the user is still signed in.

use std::cell::RefCell;
use std::rc::Rc;

use send_wrapper::SendWrapper;
use tokio::sync::oneshot;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::protocol::{ClientFrame, ControlFrame, RelayNotice, ServerFrame};
use super::RelayOutbox;
use crate::call::CallHandle;
use crate::error::{Error, Result};

/// A live browser WebSocket to the relay.
pub struct BrowserRelaySocket {
    socket: SendWrapper<web_sys::WebSocket>,
    _onopen: SendWrapper<Closure<dyn FnMut(web_sys::Event)>>,
    _onmessage: SendWrapper<Closure<dyn FnMut(web_sys::MessageEvent)>>,
    _onclose: SendWrapper<Closure<dyn FnMut(web_sys::CloseEvent)>>,
}

impl BrowserRelaySocket {
    /// Open the socket and start the outbox writer.
    pub fn open(url: &str, user_id: &str, calls: CallHandle, outbox: RelayOutbox) -> Result<Self> {
        let socket = web_sys::WebSocket::new(url)
            .map_err(|e| Error::ConnectionFailed(format!("{:?}", e)))?;

        let register = serde_json::to_string(&ClientFrame::Control(ControlFrame::Register {
            user_id: user_id.to_string(),
        }))?;

        let open_socket = socket.clone();
        let onopen = Closure::wrap(Box::new(move |_: web_sys::Event| {
            if let Err(e) = open_socket.send_with_str(&register) {
                tracing::warn!("Failed to send register: {:?}", e);
            }
        }) as Box<dyn FnMut(web_sys::Event)>);
        socket.set_onopen(Some(onopen.as_ref().unchecked_ref()));

        // Handed to the writer once the relay acknowledges registration.
        let (closed_tx, closed_rx) = oneshot::channel::<()>();
        let outbox = Rc::new(RefCell::new(Some((outbox, closed_rx))));

        let message_calls = calls.clone();
        let writer_socket = socket.clone();
        let writer_outbox = outbox.clone();
        let onmessage = Closure::wrap(Box::new(move |event: web_sys::MessageEvent| {
            let Some(text) = event.data().as_string() else {
                return;
            };
            match ServerFrame::parse(&text) {
                Ok(ServerFrame::Notice(RelayNotice::Registered { .. })) => {
                    tracing::info!("Registered with relay");
                    if let Some((mut outbox, closed)) = writer_outbox.borrow_mut().take() {
                        outbox.set_connected(true);
                        spawn_writer(writer_socket.clone(), outbox, closed);
                    }
                }
                Ok(ServerFrame::Notice(RelayNotice::Pong)) => {}
                Ok(frame) => {
                    let _ = message_calls.relay(frame);
                }
                Err(e) => tracing::warn!(error = %e, "Failed to parse relay frame"),
            }
        }) as Box<dyn FnMut(web_sys::MessageEvent)>);
        socket.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));

        let mut closed_tx = Some(closed_tx);
        let onclose = Closure::wrap(Box::new(move |event: web_sys::CloseEvent| {
            tracing::info!(code = event.code(), "Relay socket closed");
            if let Some(tx) = closed_tx.take() {
                let _ = tx.send(());
            }
            let _ = calls.relay_disconnected();
        }) as Box<dyn FnMut(web_sys::CloseEvent)>);
        socket.set_onclose(Some(onclose.as_ref().unchecked_ref()));

        Ok(Self {
            socket: SendWrapper::new(socket),
            _onopen: SendWrapper::new(onopen),
            _onmessage: SendWrapper::new(onmessage),
            _onclose: SendWrapper::new(onclose),
        })
    }

    /// Close the socket.
    pub fn close(&self) {
        let _ = self.socket.close();
    }
}

impl Drop for BrowserRelaySocket {
    fn drop(&mut self) {
        self.socket.set_onopen(None);
        self.socket.set_onmessage(None);
        self.socket.set_onclose(None);
        let _ = self.socket.close();
    }
}

/// Drain the outbox into the socket until the socket closes.
fn spawn_writer(socket: web_sys::WebSocket, mut outbox: RelayOutbox, mut closed: oneshot::Receiver<()>) {
    wasm_bindgen_futures::spawn_local(async move {
        loop {
            let envelope = tokio::select! {
                envelope = outbox.next() => envelope,
                _ = &mut closed => None,
            };
            let Some(envelope) = envelope else {
                break;
            };
            let json = match serde_json::to_string(&ClientFrame::Signal(envelope)) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to serialize envelope: {}", e);
                    continue;
                }
            };
            if socket.ready_state() != web_sys::WebSocket::OPEN || socket.send_with_str(&json).is_err() {
                break;
            }
        }
        outbox.set_connected(false);
    });
}
