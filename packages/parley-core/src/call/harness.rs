//! Two engines wired through an in-memory relay.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::engine::{CallEngine, CallHandle};
use super::events::{CallEvent, CallSummary};
use super::state::CallState;
use super::{CallConfig, CallId};
use crate::error::Result;
use crate::media::testing::FakeDevices;
use crate::media::MediaAdapter;
use crate::peer::testing::FakePeerFactory;
use crate::signaling::{RelayNotice, ServerFrame, SignalEnvelope, SignalSink};

/// Routes envelopes between registered handles the way the relay does.
#[derive(Default)]
pub(crate) struct TestRelay {
    routes: Mutex<HashMap<String, CallHandle>>,
    log: Mutex<Vec<SignalEnvelope>>,
    held: Mutex<Option<Vec<SignalEnvelope>>>,
}

impl TestRelay {
    fn register(&self, user_id: &str, handle: CallHandle) {
        self.routes.lock().insert(user_id.to_string(), handle);
    }

    /// Envelopes of `kind` sent by `from`, delivered or not.
    pub(crate) fn count(&self, from: &str, kind: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|e| e.from == from && e.signal.kind() == kind)
            .count()
    }

    /// Queue envelopes instead of delivering them, as if they were still
    /// in flight.
    pub(crate) fn hold_deliveries(&self) {
        *self.held.lock() = Some(Vec::new());
    }

    /// Deliver everything queued since [`hold_deliveries`](Self::hold_deliveries)
    /// and go back to immediate delivery.
    pub(crate) fn release_deliveries(&self) {
        let held = self.held.lock().take().unwrap_or_default();
        for envelope in held {
            self.deliver(envelope);
        }
    }

    fn route(&self, envelope: SignalEnvelope) {
        self.log.lock().push(envelope.clone());
        if let Some(held) = self.held.lock().as_mut() {
            held.push(envelope);
            return;
        }
        self.deliver(envelope);
    }

    fn deliver(&self, envelope: SignalEnvelope) {
        let (recipient, sender) = {
            let routes = self.routes.lock();
            (routes.get(&envelope.to).cloned(), routes.get(&envelope.from).cloned())
        };
        match (recipient, sender) {
            (Some(recipient), _) => {
                let _ = recipient.relay(ServerFrame::Signal(envelope));
            }
            (None, Some(sender)) => {
                let _ = sender.relay(
                    RelayNotice::PeerUnavailable {
                        call_id: envelope.call_id,
                        to: envelope.to,
                        kind: envelope.signal.kind().to_string(),
                    }
                    .into(),
                );
            }
            (None, None) => {}
        }
    }
}

/// One user's connection to the [`TestRelay`]; stamps `from`.
struct Endpoint {
    user_id: String,
    relay: Arc<TestRelay>,
}

impl SignalSink for Endpoint {
    fn send(&self, mut envelope: SignalEnvelope) -> Result<()> {
        envelope.from = self.user_id.clone();
        self.relay.route(envelope);
        Ok(())
    }
}

pub(crate) struct Client {
    pub engine: CallEngine,
    pub handle: CallHandle,
    pub devices: Arc<FakeDevices>,
    pub peers: Arc<FakePeerFactory>,
    events: mpsc::UnboundedReceiver<CallEvent>,
    history: Vec<CallEvent>,
}

impl Client {
    fn new(user_id: &str, config: CallConfig, peers: Arc<FakePeerFactory>, relay: &Arc<TestRelay>) -> Self {
        let devices = FakeDevices::new();
        let sink = Arc::new(Endpoint {
            user_id: user_id.to_string(),
            relay: relay.clone(),
        });
        let (engine, handle, events) = CallEngine::new(
            user_id,
            config,
            MediaAdapter::new(devices.clone()),
            peers.clone(),
            sink,
        );
        relay.register(user_id, handle.clone());
        Self {
            engine,
            handle,
            devices,
            peers,
            events,
            history: Vec::new(),
        }
    }

    /// Events published since the last drain.
    pub(crate) fn drain(&mut self) -> Vec<CallEvent> {
        let fresh = drain(&mut self.events);
        self.history.extend(fresh.iter().cloned());
        fresh
    }

    /// The summary of `call_id`, once it has ended.
    pub(crate) fn summary(&mut self, call_id: &CallId) -> Option<CallSummary> {
        self.drain();
        self.history.iter().find_map(|e| match e {
            CallEvent::Ended { summary } if &summary.call_id == call_id => Some(summary.clone()),
            _ => None,
        })
    }
}

/// `alice` and `bob`, both registered on one relay.
pub(crate) struct Harness {
    pub relay: Arc<TestRelay>,
    pub alice: Client,
    pub bob: Client,
}

impl Harness {
    /// Both sides trickle `local_candidates` candidates per description.
    pub(crate) fn new(local_candidates: usize) -> Self {
        Self::with_peers(
            FakePeerFactory::new(local_candidates),
            FakePeerFactory::new(local_candidates),
        )
    }

    pub(crate) fn with_peers(alice: Arc<FakePeerFactory>, bob: Arc<FakePeerFactory>) -> Self {
        Self::build(CallConfig::default(), alice, bob)
    }

    /// Both sides share `config`.
    pub(crate) fn with_config(local_candidates: usize, config: CallConfig) -> Self {
        Self::build(
            config,
            FakePeerFactory::new(local_candidates),
            FakePeerFactory::new(local_candidates),
        )
    }

    fn build(config: CallConfig, alice: Arc<FakePeerFactory>, bob: Arc<FakePeerFactory>) -> Self {
        let relay = Arc::new(TestRelay::default());
        Self {
            alice: Client::new("alice", config.clone(), alice, &relay),
            bob: Client::new("bob", config, bob, &relay),
            relay,
        }
    }

    /// Run both engines until neither has anything left to do.
    pub(crate) async fn settle(&mut self) {
        for _ in 0..1_000 {
            let applied = self.alice.engine.run_until_stalled().await
                + self.bob.engine.run_until_stalled().await;
            if applied == 0 {
                return;
            }
        }
        panic!("Engines never settled");
    }
}

pub(crate) fn drain(events: &mut mpsc::UnboundedReceiver<CallEvent>) -> Vec<CallEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// The state path of one call: the first `from` and then every `to`.
pub(crate) fn states_of(events: &[CallEvent], call_id: &CallId) -> Vec<CallState> {
    let mut path = Vec::new();
    for event in events {
        if let CallEvent::StateChanged { call_id: id, from, to, .. } = event {
            if id != call_id {
                continue;
            }
            if path.is_empty() {
                path.push(*from);
            }
            path.push(*to);
        }
    }
    path
}
