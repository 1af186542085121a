//! Relay router: registration and envelope forwarding.
//!
//! The router never interprets call semantics. It binds a connection to a
//! user id, stamps `from` on outgoing envelopes, and forwards each one to
//! whatever connection the registry holds for `to`. Forwarding is a
//! channel push; nothing here waits on the recipient.

use crate::protocol::{ClientMessage, ControlMessage, Envelope, Notice};
use crate::registry::ConnectionHandle;
use crate::state::RelayState;

/// What happened to one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Pushed to the recipient's socket.
    Delivered,
    /// Recipient not registered (or its socket just went away).
    Unavailable,
    /// Sender has not registered; nothing was forwarded.
    Unregistered,
}

/// Handle one parsed client frame.
pub fn dispatch(state: &RelayState, conn: &ConnectionHandle, message: ClientMessage) {
    match message {
        ClientMessage::Control(ControlMessage::Register { user_id }) => {
            register(state, conn, &user_id);
        }
        ClientMessage::Control(ControlMessage::Ping) => {
            conn.send(Notice::Pong);
        }
        ClientMessage::Envelope(envelope) => {
            route_envelope(state, conn, envelope);
        }
    }
}

/// Bind `conn` to `user_id`. A previous connection for the same user is
/// told it was superseded and, if configured, closed.
pub fn register(state: &RelayState, conn: &ConnectionHandle, user_id: &str) {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        conn.send(Notice::Error {
            message: "userId must not be empty".to_string(),
        });
        return;
    }

    // Queue the ack first: once registered, other connections can route
    // envelopes here and those must not overtake it.
    conn.send(Notice::Registered {
        user_id: user_id.to_string(),
    });

    let was_online = state.registry.is_online(user_id);
    let stale = state.registry.register(user_id, conn.clone());

    if let Some(stale) = stale {
        stale.send(Notice::Superseded {
            user_id: user_id.to_string(),
        });
        if state.config.close_superseded {
            stale.close();
        }
    }

    if !was_online {
        broadcast_presence(state, user_id, true);
    }
}

/// Forward one envelope from `conn` to the registered recipient.
pub fn route_envelope(
    state: &RelayState,
    conn: &ConnectionHandle,
    mut envelope: Envelope,
) -> RouteOutcome {
    let Some(from) = state.registry.identity_of(conn) else {
        conn.send(Notice::Error {
            message: "Must register before sending signaling envelopes".to_string(),
        });
        return RouteOutcome::Unregistered;
    };

    // The router is the trust boundary for sender identity.
    envelope.from = from;

    let kind = envelope.kind;
    let call_id = envelope.call_id.clone();
    let to = envelope.to.clone();

    let delivered = match state.registry.lookup(&to) {
        Some(target) => target.send(envelope),
        None => false,
    };

    if delivered {
        tracing::debug!(
            kind = kind.as_str(),
            call_id = call_id.as_str(),
            to = to.as_str(),
            "Envelope forwarded"
        );
        return RouteOutcome::Delivered;
    }

    tracing::debug!(
        kind = kind.as_str(),
        call_id = call_id.as_str(),
        to = to.as_str(),
        "Recipient unavailable"
    );
    if state.config.notify_unavailable {
        conn.send(Notice::PeerUnavailable { call_id, to, kind });
    }
    RouteOutcome::Unavailable
}

/// Drop whatever registration this connection owns.
pub fn disconnect(state: &RelayState, conn: &ConnectionHandle) {
    if let Some(user_id) = state.registry.unregister(conn) {
        broadcast_presence(state, &user_id, false);
    }
}

fn broadcast_presence(state: &RelayState, user_id: &str, online: bool) {
    if !state.config.broadcast_presence {
        return;
    }
    for other in state.registry.others(user_id) {
        other.send(Notice::Presence {
            user_id: user_id.to_string(),
            online,
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
