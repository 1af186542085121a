//! Native relay transport over `tokio-tungstenite`.
//!
//! One `RelayConnection` keeps a single user registered with the relay:
//!
//! 1. Connect and send `register`
//! 2. Wait for `registered`, then open the outbound sink
//! 3. Pump relay frames into the call engine and outbox envelopes out,
//!    pinging every 25 seconds
//! 4. On close, report the loss to the engine and reconnect with
//!    exponential backoff (1s doubling to 60s)

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use super::protocol::{ClientFrame, ControlFrame, RelayNotice, ServerFrame};
use super::RelayOutbox;
use crate::call::CallHandle;
use crate::error::{Error, Result};

/// Interval between keepalive pings
const PING_INTERVAL: Duration = Duration::from_secs(25);

/// How long to wait for the `registered` acknowledgement
const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a session with the relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The socket closed or errored; worth reconnecting
    Closed,
    /// Another login took over our user id; do not reconnect
    Superseded,
    /// The call engine stopped; nothing left to serve
    EngineStopped,
}

/// Keeps one user registered with the relay.
#[derive(Debug, Clone)]
pub struct RelayConnection {
    url: String,
    user_id: String,
    calls: CallHandle,
}

impl RelayConnection {
    /// `url` is the relay's WebSocket endpoint (`ws://host:port/ws`).
    pub fn new(url: impl Into<String>, user_id: impl Into<String>, calls: CallHandle) -> Self {
        Self {
            url: url.into(),
            user_id: user_id.into(),
            calls,
        }
    }

    /// Persistent connection loop. Reconnects with exponential backoff
    /// until superseded or the engine stops.
    pub async fn run(self, mut outbox: RelayOutbox) {
        let mut backoff = Duration::from_secs(1);
        let max_backoff = Duration::from_secs(60);

        loop {
            tracing::info!(relay = self.url.as_str(), "Connecting to relay...");

            match self.connect(&mut outbox).await {
                Ok(SessionEnd::Closed) => {
                    tracing::info!(relay = self.url.as_str(), "Relay connection closed");
                    backoff = Duration::from_secs(1);
                }
                Ok(SessionEnd::Superseded) => {
                    tracing::warn!(
                        user_id = self.user_id.as_str(),
                        "Signed in elsewhere; not reconnecting"
                    );
                    return;
                }
                Ok(SessionEnd::EngineStopped) => return,
                Err(e) => {
                    tracing::warn!(relay = self.url.as_str(), error = %e, "Relay connection failed");
                }
            }

            tracing::info!(
                relay = self.url.as_str(),
                backoff_secs = backoff.as_secs(),
                "Reconnecting to relay after backoff..."
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(max_backoff);
        }
    }

    /// Run a single relay session until the socket closes.
    ///
    /// The engine is told about the disconnect on every exit path after a
    /// successful registration.
    pub async fn connect(&self, outbox: &mut RelayOutbox) -> Result<SessionEnd> {
        if self.url.starts_with("wss://") {
            // Errors only if a provider is already installed.
            let _ = rustls::crypto::ring::default_provider().install_default();
        }
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let register = ClientFrame::Control(ControlFrame::Register {
            user_id: self.user_id.clone(),
        });
        ws_sender
            .send(WsMessage::Text(serde_json::to_string(&register)?))
            .await?;

        self.await_registered(&mut ws_receiver).await?;
        outbox.set_connected(true);
        tracing::info!(user_id = self.user_id.as_str(), "Registered with relay");

        let end = self.pump(&mut ws_sender, &mut ws_receiver, outbox).await;

        outbox.set_connected(false);
        let _ = ws_sender.close().await;
        if self.calls.relay_disconnected().is_err() && end == SessionEnd::Closed {
            return Ok(SessionEnd::EngineStopped);
        }
        Ok(end)
    }

    async fn await_registered<S>(&self, ws_receiver: &mut S) -> Result<()>
    where
        S: futures::Stream<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        let wait = async {
            while let Some(frame) = ws_receiver.next().await {
                if let WsMessage::Text(text) = frame? {
                    match ServerFrame::parse(&text)? {
                        ServerFrame::Notice(RelayNotice::Registered { .. }) => return Ok(()),
                        ServerFrame::Notice(RelayNotice::Error { message }) => {
                            return Err(Error::ProtocolError(message))
                        }
                        ServerFrame::Notice(RelayNotice::Pong) => {}
                        // Peers can reach us as soon as the relay binds the
                        // connection, which may be ahead of the ack.
                        frame => {
                            tracing::debug!(?frame, "Frame before registration ack");
                            self.calls.relay(frame)?;
                        }
                    }
                }
            }
            Err(Error::ConnectionFailed("closed before registration".into()))
        };

        tokio::time::timeout(REGISTER_TIMEOUT, wait)
            .await
            .map_err(|_| Error::ConnectionFailed("registration timed out".into()))?
    }

    async fn pump<W, R>(&self, ws_sender: &mut W, ws_receiver: &mut R, outbox: &mut RelayOutbox) -> SessionEnd
    where
        W: futures::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
        R: futures::Stream<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        let mut keepalive = tokio::time::interval(PING_INTERVAL);
        keepalive.tick().await;

        loop {
            tokio::select! {
                frame = ws_receiver.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => match ServerFrame::parse(&text) {
                            Ok(ServerFrame::Notice(RelayNotice::Pong)) => {}
                            Ok(frame) => {
                                let superseded =
                                    matches!(frame, ServerFrame::Notice(RelayNotice::Superseded { .. }));
                                if self.calls.relay(frame).is_err() {
                                    return SessionEnd::EngineStopped;
                                }
                                if superseded {
                                    return SessionEnd::Superseded;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to parse relay frame");
                            }
                        },
                        Some(Ok(WsMessage::Close(_))) | None => {
                            tracing::info!("Relay closed the socket");
                            return SessionEnd::Closed;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Relay WebSocket error");
                            return SessionEnd::Closed;
                        }
                        Some(Ok(_)) => {} // tungstenite answers pings
                    }
                }
                envelope = outbox.next() => {
                    let Some(envelope) = envelope else {
                        return SessionEnd::EngineStopped;
                    };
                    let frame = ClientFrame::Signal(envelope);
                    match serde_json::to_string(&frame) {
                        Ok(json) => {
                            if ws_sender.send(WsMessage::Text(json)).await.is_err() {
                                return SessionEnd::Closed;
                            }
                        }
                        Err(e) => {
                            tracing::error!("Failed to serialize envelope: {}", e);
                        }
                    }
                }
                _ = keepalive.tick() => {
                    let ping = ClientFrame::Control(ControlFrame::Ping);
                    let json = match serde_json::to_string(&ping) {
                        Ok(json) => json,
                        Err(_) => continue,
                    };
                    if ws_sender.send(WsMessage::Text(json)).await.is_err() {
                        return SessionEnd::Closed;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{CallConfig, CallEngine, CallEvent, CallId, CallState};
    use crate::media::testing::FakeDevices;
    use crate::media::MediaAdapter;
    use crate::peer::testing::FakePeerFactory;
    use crate::signaling::{outbound_channel, Signal, SignalEnvelope, SignalSink};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn read_json<S>(ws: &mut S) -> Value
    where
        S: futures::Stream<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            match ws.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_registers_and_pumps_both_directions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (sink, outbox) = outbound_channel();
        let sink = Arc::new(sink);
        let (mut engine, handle, _events) = CallEngine::new(
            "alice",
            CallConfig::default(),
            MediaAdapter::new(FakeDevices::new()),
            FakePeerFactory::new(0),
            sink.clone(),
        );

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let register = read_json(&mut ws).await;
            assert_eq!(register, json!({"type": "register", "userId": "alice"}));
            ws.send(WsMessage::Text(json!({"type": "registered", "userId": "alice"}).to_string()))
                .await
                .unwrap();
            ws.send(WsMessage::Text(
                json!({"type": "offer", "callId": "c1", "to": "alice", "from": "bob", "sdp": "v=0"})
                    .to_string(),
            ))
            .await
            .unwrap();

            let outbound = read_json(&mut ws).await;
            ws.close(None).await.unwrap();
            outbound
        });

        let relay = RelayConnection::new(format!("ws://{}/ws", addr), "alice", handle.clone());
        let client = tokio::spawn(async move {
            let mut outbox = outbox;
            relay.connect(&mut outbox).await
        });

        for _ in 0..100 {
            engine.run_until_stalled().await;
            if engine.state_of(&CallId::from("c1")).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            engine.state_of(&CallId::from("c1")),
            Some(CallState::RequestingMedia)
        );

        sink.send(SignalEnvelope::new(CallId::from("c9"), "bob", Signal::CallReject))
            .unwrap();
        let outbound = server.await.unwrap();
        assert_eq!(outbound, json!({"type": "call-reject", "callId": "c9", "to": "bob"}));

        assert_eq!(client.await.unwrap().unwrap(), SessionEnd::Closed);
        assert!(!sink.is_connected());
    }

    #[tokio::test]
    async fn test_envelope_ahead_of_registration_ack_is_delivered() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (sink, outbox) = outbound_channel();
        let (mut engine, handle, mut events) = CallEngine::new(
            "alice",
            CallConfig::default(),
            MediaAdapter::new(FakeDevices::new()),
            FakePeerFactory::new(0),
            Arc::new(sink),
        );

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            read_json(&mut ws).await;
            ws.send(WsMessage::Text(
                json!({"type": "offer", "callId": "c1", "to": "alice", "from": "bob", "sdp": "v=0"})
                    .to_string(),
            ))
            .await
            .unwrap();
            ws.send(WsMessage::Text(json!({"type": "registered", "userId": "alice"}).to_string()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        });

        let relay = RelayConnection::new(format!("ws://{}/ws", addr), "alice", handle.clone());
        let mut outbox = outbox;
        assert_eq!(relay.connect(&mut outbox).await.unwrap(), SessionEnd::Closed);
        server.await.unwrap();

        engine.run_until_stalled().await;
        let incoming = crate::call::harness::drain(&mut events);
        assert!(incoming.contains(&CallEvent::IncomingCall {
            call_id: CallId::from("c1"),
            peer: "bob".into(),
            video: false,
        }));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (sink, mut outbox) = outbound_channel();
        let (_engine, handle, _events) = CallEngine::new(
            "alice",
            CallConfig::default(),
            MediaAdapter::new(FakeDevices::new()),
            FakePeerFactory::new(0),
            Arc::new(sink),
        );
        let relay = RelayConnection::new(format!("ws://{}/ws", addr), "alice", handle);

        let err = relay.connect(&mut outbox).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed(_)));
        assert!(err.is_recoverable());
    }
}
