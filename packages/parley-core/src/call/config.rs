//! Call engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default time a call may spend before reaching `Active`
pub const DEFAULT_SETUP_TIMEOUT_MS: u64 = 45_000;

/// Public STUN servers used when none are configured
pub const DEFAULT_ICE_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// What to do with an offer from a peer we already have a live call with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionPolicy {
    /// Keep the existing call; answer the new offer with `call-reject`
    #[default]
    RejectNew,
    /// End the existing call (reason `collision`) and take the new offer
    ReplaceExisting,
}

/// Tunables for a [`CallEngine`](super::CallEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CallConfig {
    /// Milliseconds from session creation until the call must be active
    pub setup_timeout_ms: u64,
    /// STUN/TURN URLs handed to every new peer connection
    pub ice_servers: Vec<String>,
    /// Offer collision rule
    pub collision_policy: CollisionPolicy,
}

impl CallConfig {
    /// Setup timeout as a `Duration`
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            setup_timeout_ms: DEFAULT_SETUP_TIMEOUT_MS,
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
            collision_policy: CollisionPolicy::default(),
        }
    }
}
