//! # Calls
//!
//! The client-side call state machine.
//!
//! ## Call Lifecycle
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          CALL STATE MACHINE                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Caller                              Callee                            │
//! │  ──────                              ──────                            │
//! │  Idle                                Idle                              │
//! │   │ dial(peer)                        │ offer received                 │
//! │   ▼                                   ▼                                │
//! │  RequestingMedia                     RequestingMedia (ringing)         │
//! │   │ media ready                       │ accept (+ media ready)         │
//! │   ▼                                   ▼                                │
//! │  Offering ── offer ──────────────►   Answering                         │
//! │   │                                   │                                │
//! │   │ ◄──────────────────── answer ──── │                                │
//! │   ▼                                   ▼                                │
//! │  Connecting ◄═══ ice-candidate ═══► Connecting                         │
//! │   │ remote track / ICE connected      │                                │
//! │   ▼                                   ▼                                │
//! │  Active                              Active                            │
//! │                                                                         │
//! │  Any state ── hang up / reject / end / failure ──► Ending ──► Ended     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every input (UI action, relay frame, media completion, peer callback,
//! timer) goes through one queue and is applied by [`CallEngine`] in
//! arrival order. All call-ending paths run the same teardown, which
//! closes the peer connection and releases local media exactly once.

mod config;
mod engine;
mod events;
mod ice;
mod manager;
mod session;
mod state;

#[cfg(test)]
pub(crate) mod harness;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use config::{CallConfig, CollisionPolicy};
pub use engine::{CallEngine, CallHandle};
pub use events::{CallEvent, CallInput, CallSummary};
pub use ice::CandidateBuffer;
pub use session::CallSession;
pub use state::{CallOutcome, CallRole, CallState, EndReason};

/// Identifier of one call attempt.
///
/// Generated by the caller; the callee reuses the id from the offer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CallId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_ids_are_unique() {
        let a = CallId::new();
        let b = CallId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_call_id_is_a_plain_string_on_the_wire() {
        let id = CallId::from("c1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"c1\"");
        assert_eq!(id.to_string(), "c1");
    }
}
