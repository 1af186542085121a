//! # Error Handling
//!
//! Error types for Parley Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Media Errors (100s)                                               │
//! │  │   └── Media(MediaError)     - Device capture failed                 │
//! │  │                                                                      │
//! │  ├── Signaling Errors (200s)                                           │
//! │  │   ├── NotConnected          - No live relay connection              │
//! │  │   ├── ConnectionFailed      - Could not reach the relay             │
//! │  │   ├── ProtocolError         - Relay sent something unparseable      │
//! │  │   └── InvalidPeer           - Bad peer user id for a call           │
//! │  │                                                                      │
//! │  ├── Negotiation Errors (300s)                                         │
//! │  │   ├── PeerConnectionFailed  - Peer connection could not be built    │
//! │  │   ├── NegotiationFailed     - SDP offer/answer step failed          │
//! │  │   └── InvalidCandidate      - ICE candidate rejected                │
//! │  │                                                                      │
//! │  ├── Transport Errors (400s)                                           │
//! │  │   └── TransportError        - WebSocket I/O failure                 │
//! │  │                                                                      │
//! │  ├── Call Errors (500s)                                                │
//! │  │   └── EngineStopped         - Call engine no longer running         │
//! │  │                                                                      │
//! │  └── Internal Errors (900s)                                            │
//! │      ├── SerializationError    - JSON encode/decode failed             │
//! │      └── Internal              - Unexpected host/runtime failure       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Call-ending conditions are *not* errors: they are
//! [`EndReason`](crate::call::EndReason)s delivered with the call summary.
//! `Error` covers operations that failed to run at all.

use thiserror::Error;

use crate::media::MediaError;

/// Result type alias for Parley Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Parley Core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Media Errors (100-199)
    // ========================================================================

    /// Local media could not be acquired
    #[error("Media acquisition failed: {0}")]
    Media(#[from] MediaError),

    // ========================================================================
    // Signaling Errors (200-299)
    // ========================================================================

    /// No live relay connection to send through
    #[error("Not connected to the relay")]
    NotConnected,

    /// Connecting to the relay failed
    #[error("Failed to connect to relay: {0}")]
    ConnectionFailed(String),

    /// The relay sent a message we could not understand
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// A call was requested with an unusable peer id
    #[error("Invalid peer: {0}")]
    InvalidPeer(String),

    // ========================================================================
    // Negotiation Errors (300-399)
    // ========================================================================

    /// The peer connection object could not be created or configured
    #[error("Peer connection failed: {0}")]
    PeerConnectionFailed(String),

    /// Creating or applying an SDP description failed
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    /// An ICE candidate was malformed or rejected by the peer connection
    #[error("Invalid ICE candidate: {0}")]
    InvalidCandidate(String),

    // ========================================================================
    // Transport Errors (400-499)
    // ========================================================================

    /// WebSocket read/write failure
    #[error("Transport error: {0}")]
    TransportError(String),

    // ========================================================================
    // Call Errors (500-599)
    // ========================================================================

    /// The call engine has shut down and no longer accepts input
    #[error("Call engine has stopped")]
    EngineStopped,

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Serialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Unexpected failure from the host environment
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the error code for FFI/JS consumers
    ///
    /// Error codes are organized by category:
    /// - 100-199: Media errors
    /// - 200-299: Signaling errors
    /// - 300-399: Negotiation errors
    /// - 400-499: Transport errors
    /// - 500-599: Call errors
    /// - 900-999: Internal errors
    pub fn code(&self) -> i32 {
        match self {
            // Media (100-199)
            Error::Media(MediaError::PermissionDenied) => 100,
            Error::Media(MediaError::NoDeviceFound) => 101,
            Error::Media(MediaError::DeviceInUse) => 102,
            Error::Media(MediaError::Unknown(_)) => 103,

            // Signaling (200-299)
            Error::NotConnected => 200,
            Error::ConnectionFailed(_) => 201,
            Error::ProtocolError(_) => 202,
            Error::InvalidPeer(_) => 203,

            // Negotiation (300-399)
            Error::PeerConnectionFailed(_) => 300,
            Error::NegotiationFailed(_) => 301,
            Error::InvalidCandidate(_) => 302,

            // Transport (400-499)
            Error::TransportError(_) => 400,

            // Call (500-599)
            Error::EngineStopped => 500,

            // Internal (900-999)
            Error::SerializationError(_) => 900,
            Error::Internal(_) => 901,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can go away on a retry without user action
    /// (reconnect, re-dial).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NotConnected
                | Error::ConnectionFailed(_)
                | Error::TransportError(_)
                | Error::Media(MediaError::DeviceInUse)
        )
    }

    /// Check if this error requires user action
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            Error::Media(MediaError::PermissionDenied) | Error::Media(MediaError::NoDeviceFound)
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::TransportError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Media(MediaError::PermissionDenied).code(), 100);
        assert_eq!(Error::Media(MediaError::Unknown("x".into())).code(), 103);
        assert_eq!(Error::NotConnected.code(), 200);
        assert_eq!(Error::NegotiationFailed("bad sdp".into()).code(), 301);
        assert_eq!(Error::TransportError("reset".into()).code(), 400);
        assert_eq!(Error::EngineStopped.code(), 500);
        assert_eq!(Error::Internal("test".into()).code(), 901);
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::NotConnected.is_recoverable());
        assert!(Error::Media(MediaError::DeviceInUse).is_recoverable());
        assert!(!Error::Media(MediaError::PermissionDenied).is_recoverable());
        assert!(!Error::NegotiationFailed("x".into()).is_recoverable());
    }

    #[test]
    fn test_user_action_errors() {
        assert!(Error::Media(MediaError::PermissionDenied).requires_user_action());
        assert!(Error::Media(MediaError::NoDeviceFound).requires_user_action());
        assert!(!Error::EngineStopped.requires_user_action());
    }

    #[test]
    fn test_media_error_converts() {
        let err: Error = MediaError::NoDeviceFound.into();
        assert!(matches!(err, Error::Media(MediaError::NoDeviceFound)));
        assert!(err.to_string().contains("No camera or microphone"));
    }

    #[test]
    fn test_json_error_converts() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert_eq!(err.code(), 900);
    }
}
