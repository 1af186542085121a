//! # Signaling
//!
//! The client's side of the relay: wire types, the outbound queue the call
//! engine writes to, and the WebSocket transport that drains it.
//!
//! ```text
//! CallManager ──SignalEnvelope──► RelaySink ─┐
//!                                            │ mpsc
//!                                            ▼
//!                               RelayOutbox (RelayConnection / browser socket)
//!                                            │ WebSocket
//!                                            ▼
//!                                       parley-relay
//!                                            │
//! CallHandle::relay(ServerFrame) ◄───────────┘
//! ```
//!
//! The sink refuses envelopes while no socket is registered, so a call
//! started offline fails fast instead of queueing signaling that would be
//! stale by the time it is delivered.

pub mod protocol;

#[cfg(not(target_arch = "wasm32"))]
pub mod relay;

#[cfg(target_arch = "wasm32")]
pub mod browser;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{Error, Result};

pub use protocol::{
    ClientFrame, ControlFrame, IceCandidate, RelayNotice, ServerFrame, Signal, SignalEnvelope,
};

#[cfg(not(target_arch = "wasm32"))]
pub use relay::RelayConnection;

/// Outbound signaling path used by the call engine.
pub trait SignalSink: Send + Sync {
    /// Queue one envelope for the relay.
    fn send(&self, envelope: SignalEnvelope) -> Result<()>;
}

/// Create a linked sink/outbox pair.
///
/// The sink starts disconnected; the transport flips it when its socket
/// is registered and back when the socket drops.
pub fn outbound_channel() -> (RelaySink, RelayOutbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connected = Arc::new(AtomicBool::new(false));
    (
        RelaySink {
            tx,
            connected: connected.clone(),
        },
        RelayOutbox { rx, connected },
    )
}

/// Cloneable producer side of the outbound queue.
#[derive(Debug, Clone)]
pub struct RelaySink {
    tx: mpsc::UnboundedSender<SignalEnvelope>,
    connected: Arc<AtomicBool>,
}

impl RelaySink {
    /// Whether a registered relay socket is currently draining the queue
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl SignalSink for RelaySink {
    fn send(&self, envelope: SignalEnvelope) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.tx.send(envelope).map_err(|_| Error::NotConnected)
    }
}

/// Consumer side of the outbound queue, owned by the transport.
#[derive(Debug)]
pub struct RelayOutbox {
    rx: mpsc::UnboundedReceiver<SignalEnvelope>,
    connected: Arc<AtomicBool>,
}

impl RelayOutbox {
    /// Mark the transport registered (`true`) or gone (`false`).
    ///
    /// Going offline discards anything still queued.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        if !connected {
            let mut dropped = 0usize;
            while self.rx.try_recv().is_ok() {
                dropped += 1;
            }
            if dropped > 0 {
                tracing::debug!(dropped, "Discarded queued envelopes after disconnect");
            }
        }
    }

    /// Next envelope to write. `None` once every sink is gone.
    pub async fn next(&mut self) -> Option<SignalEnvelope> {
        self.rx.recv().await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallId;

    fn envelope() -> SignalEnvelope {
        SignalEnvelope::new(CallId::new(), "bob", Signal::CallReject)
    }

    #[tokio::test]
    async fn test_sink_refuses_while_disconnected() {
        let (sink, mut outbox) = outbound_channel();
        assert!(matches!(sink.send(envelope()), Err(Error::NotConnected)));

        outbox.set_connected(true);
        assert!(sink.is_connected());
        tokio_test::assert_ok!(sink.send(envelope()));
        assert_eq!(outbox.next().await.unwrap().to, "bob");
    }

    #[tokio::test]
    async fn test_disconnect_discards_queued_envelopes() {
        let (sink, mut outbox) = outbound_channel();
        outbox.set_connected(true);
        sink.send(envelope()).unwrap();
        sink.send(envelope()).unwrap();

        outbox.set_connected(false);
        outbox.set_connected(true);
        let mut next = tokio_test::task::spawn(outbox.next());
        tokio_test::assert_pending!(next.poll());
    }

    #[tokio::test]
    async fn test_outbox_ends_when_sinks_drop() {
        let (sink, mut outbox) = outbound_channel();
        drop(sink);
        assert!(outbox.next().await.is_none());
    }
}
