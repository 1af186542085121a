//! # Parley Core
//!
//! Client-side call signaling for Parley: the per-call state machine that
//! drives a WebRTC peer connection through the Parley relay, plus the
//! local media and relay transport it depends on.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          PARLEY CORE MODULES                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   UI (dial / accept / reject / hang up)          CallEvent stream ▲    │
//! │          │                                                        │    │
//! │          ▼                                                        │    │
//! │  ┌──────────────────────────────────────────────────────────────┐ │    │
//! │  │                      call::CallEngine                        │─┘    │
//! │  │                                                              │      │
//! │  │  inbox ──► CallManager::handle(CallInput) ──► CallSession(s) │      │
//! │  │    ▲              │                    │                     │      │
//! │  │    │        pending media /      PeerConnection ops          │      │
//! │  │    │        setup timers              │                      │      │
//! │  └────┼──────────────┼───────────────────┼──────────────────────┘      │
//! │       │              ▼                   ▼                             │
//! │       │     ┌──────────────┐     ┌──────────────┐                      │
//! │       │     │    media     │     │     peer     │                      │
//! │       │     │ MediaAdapter │     │ PeerFactory  │                      │
//! │       │     └──────────────┘     └──────┬───────┘                      │
//! │       │                                 │ ICE / tracks (PeerEvent)     │
//! │       ├─────────────────────────────────┘                              │
//! │       │                                                                │
//! │  ┌────┴─────────────────────────────────────────────────────────────┐  │
//! │  │ signaling: RelayConnection (WebSocket) ◄──► parley-relay         │  │
//! │  │            RelaySink ── SignalEnvelope ──►                       │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`media`] - Local capture: acquire and release audio/video tracks
//! - [`peer`] - Peer connection seam (browser `RTCPeerConnection` on WASM)
//! - [`signaling`] - Relay wire protocol and WebSocket transport
//! - [`call`] - Call state machine, ICE buffering and the event loop
//!
//! ## Platform Support
//!
//! | Platform | Media | Peer connection | Relay transport |
//! |----------|-------|-----------------|-----------------|
//! | Web      | `getUserMedia` | `RTCPeerConnection` | `WebSocket` |
//! | Native   | pluggable | pluggable | tokio-tungstenite |

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod call;
pub mod error;
pub mod media;
pub mod peer;
pub mod signaling;
pub mod time;

#[cfg(target_arch = "wasm32")]
pub mod wasm;

pub use call::{
    CallConfig, CallEngine, CallEvent, CallHandle, CallId, CallOutcome, CallRole, CallState,
    CallSummary, CollisionPolicy, EndReason,
};
pub use error::{Error, Result};
pub use media::{MediaAdapter, MediaDevices, MediaError, TrackKind};
pub use peer::{PeerConnection, PeerFactory};
pub use signaling::{outbound_channel, RelaySink, SignalSink};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
