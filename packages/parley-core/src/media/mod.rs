//! # Media Acquisition
//!
//! Obtains local audio/video tracks for a call and guarantees they are
//! stopped again.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   MEDIA ACQUISITION                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  MediaAdapter::acquire(wants_video)                         │
//! │       │                                                     │
//! │       ├── MediaDevices backend (browser getUserMedia, fake) │
//! │       │     └── Vec<Box<dyn MediaTrack>>                    │
//! │       │                                                     │
//! │       ├── every requested kind present?                     │
//! │       │     no  → stop what was opened, NoDeviceFound       │
//! │       │     yes → LocalStream                               │
//! │       │                                                     │
//! │  MediaAdapter::release(&mut LocalStream)                    │
//! │       └── stops every track once; later calls are no-ops    │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A `LocalStream` that is dropped without being released stops its
//! tracks on drop, so no failure path can leave a device open.

#[cfg(target_arch = "wasm32")]
pub mod browser;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

/// Why local media could not be acquired.
///
/// Each variant maps to different UI copy, so they are kept distinct.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaError {
    /// The user (or browser policy) refused camera/microphone access
    #[error("Permission to use the camera or microphone was denied")]
    PermissionDenied,

    /// No matching capture device exists
    #[error("No camera or microphone was found")]
    NoDeviceFound,

    /// The device exists but another application holds it
    #[error("The camera or microphone is already in use")]
    DeviceInUse,

    /// Anything else the platform reported
    #[error("Could not access media devices: {0}")]
    Unknown(String),
}

// ============================================================================
// TRACKS AND STREAMS
// ============================================================================

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Microphone / remote audio
    Audio,
    /// Camera / remote video
    Video,
}

impl TrackKind {
    /// Parse the platform's kind string (`"audio"` / `"video"`).
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "audio" => Some(TrackKind::Audio),
            "video" => Some(TrackKind::Video),
            _ => None,
        }
    }
}

/// One captured local track.
pub trait MediaTrack: Send {
    /// Platform track id
    fn id(&self) -> String;

    /// Audio or video
    fn kind(&self) -> TrackKind;

    /// Mute/unmute without releasing the device
    fn set_enabled(&mut self, enabled: bool);

    /// Release the underlying device
    fn stop(&mut self);

    /// Downcasting hook so a platform's peer connection can reach its own
    /// track type.
    fn as_any(&self) -> &dyn Any;
}

/// The set of local tracks captured for one call.
pub struct LocalStream {
    id: String,
    tracks: Vec<Box<dyn MediaTrack>>,
    released: bool,
}

impl LocalStream {
    /// Wrap freshly captured tracks.
    pub fn new(tracks: Vec<Box<dyn MediaTrack>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks,
            released: false,
        }
    }

    /// Stream id (locally generated)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// All tracks, in capture order
    pub fn tracks(&self) -> &[Box<dyn MediaTrack>] {
        &self.tracks
    }

    /// Whether any track of `kind` is present
    pub fn has(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.kind() == kind)
    }

    /// Enable or disable every track of `kind`. Returns how many tracks
    /// were touched.
    pub fn set_enabled(&mut self, kind: TrackKind, enabled: bool) -> usize {
        if self.released {
            return 0;
        }
        let mut touched = 0;
        for track in self.tracks.iter_mut().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
            touched += 1;
        }
        touched
    }

    /// Stop every track. Returns `false` if the stream was already
    /// released.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        for track in self.tracks.iter_mut() {
            track.stop();
        }
        self.released = true;
        true
    }

    /// Whether `release` has run
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl fmt::Debug for LocalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.iter().map(|t| t.kind()).collect::<Vec<_>>())
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for LocalStream {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(stream = self.id.as_str(), "Local stream dropped unreleased; stopping tracks");
            self.release();
        }
    }
}

// ============================================================================
// DEVICE BACKEND
// ============================================================================

/// What to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    /// Capture a microphone track
    pub audio: bool,
    /// Capture a camera track
    pub video: bool,
}

/// Platform capture API.
///
/// Implementations return whatever tracks the platform handed back; the
/// adapter checks that the request was actually satisfied.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open capture devices matching `constraints`.
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Vec<Box<dyn MediaTrack>>, MediaError>;
}

// ============================================================================
// ADAPTER
// ============================================================================

/// Acquires and releases local media for calls.
#[derive(Clone)]
pub struct MediaAdapter {
    devices: Arc<dyn MediaDevices>,
}

impl MediaAdapter {
    /// Create an adapter over a platform backend.
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self { devices }
    }

    /// Capture audio, plus video when `wants_video`.
    ///
    /// If the platform returns fewer kinds than requested, whatever did
    /// open is stopped before the error is returned.
    pub async fn acquire(&self, wants_video: bool) -> Result<LocalStream, MediaError> {
        let constraints = MediaConstraints {
            audio: true,
            video: wants_video,
        };
        let tracks = self.devices.get_user_media(constraints).await?;
        let mut stream = LocalStream::new(tracks);

        let missing_audio = !stream.has(TrackKind::Audio);
        let missing_video = wants_video && !stream.has(TrackKind::Video);
        if missing_audio || missing_video {
            tracing::warn!(
                stream = stream.id(),
                missing_audio,
                missing_video,
                "Capture returned an incomplete stream"
            );
            stream.release();
            return Err(MediaError::NoDeviceFound);
        }

        tracing::debug!(
            stream = stream.id(),
            tracks = stream.tracks().len(),
            "Local media acquired"
        );
        Ok(stream)
    }

    /// Stop every track of `stream`. Idempotent.
    pub fn release(&self, stream: &mut LocalStream) -> bool {
        let released = stream.release();
        if released {
            tracing::debug!(stream = stream.id(), "Local media released");
        }
        released
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory capture backend.

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    /// Per-track counters shared with the test.
    #[derive(Debug, Default)]
    pub struct TrackStats {
        pub stops: AtomicUsize,
        pub enabled: Mutex<bool>,
    }

    pub struct FakeTrack {
        pub id: String,
        pub kind: TrackKind,
        pub stats: Arc<TrackStats>,
    }

    impl MediaTrack for FakeTrack {
        fn id(&self) -> String {
            self.id.clone()
        }
        fn kind(&self) -> TrackKind {
            self.kind
        }
        fn set_enabled(&mut self, enabled: bool) {
            *self.stats.enabled.lock() = enabled;
        }
        fn stop(&mut self) {
            self.stats.stops.fetch_add(1, Ordering::SeqCst);
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Scripted capture results, recording every track it hands out.
    #[derive(Default)]
    pub struct FakeDevices {
        failures: Mutex<Vec<MediaError>>,
        omit_video: Mutex<bool>,
        gate: Mutex<Option<oneshot::Receiver<()>>>,
        pub requests: Mutex<Vec<MediaConstraints>>,
        pub issued: Mutex<Vec<(TrackKind, Arc<TrackStats>)>>,
    }

    impl FakeDevices {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Fail the next acquisition with `err`.
        pub fn fail_next(&self, err: MediaError) {
            self.failures.lock().push(err);
        }

        /// Hand back audio only, even when video is requested.
        pub fn omit_video(&self) {
            *self.omit_video.lock() = true;
        }

        /// Keep the next acquisition waiting (like an open permission
        /// prompt) until the returned sender fires.
        pub fn hold(&self) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            *self.gate.lock() = Some(rx);
            tx
        }

        /// Stop counts of every track issued so far.
        pub fn stop_counts(&self) -> Vec<usize> {
            self.issued
                .lock()
                .iter()
                .map(|(_, s)| s.stops.load(Ordering::SeqCst))
                .collect()
        }

        /// True once every issued track was stopped exactly once.
        pub fn all_released_once(&self) -> bool {
            self.stop_counts().iter().all(|&n| n == 1)
        }

        fn track(&self, kind: TrackKind) -> Box<dyn MediaTrack> {
            let stats = Arc::new(TrackStats {
                stops: AtomicUsize::new(0),
                enabled: Mutex::new(true),
            });
            let mut issued = self.issued.lock();
            let id = format!("{:?}-{}", kind, issued.len()).to_lowercase();
            issued.push((kind, stats.clone()));
            Box::new(FakeTrack { id, kind, stats })
        }
    }

    #[async_trait]
    impl MediaDevices for FakeDevices {
        async fn get_user_media(
            &self,
            constraints: MediaConstraints,
        ) -> Result<Vec<Box<dyn MediaTrack>>, MediaError> {
            self.requests.lock().push(constraints);
            let gate = self.gate.lock().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if let Some(err) = self.failures.lock().pop() {
                return Err(err);
            }
            let mut tracks = Vec::new();
            if constraints.audio {
                tracks.push(self.track(TrackKind::Audio));
            }
            if constraints.video && !*self.omit_video.lock() {
                tracks.push(self.track(TrackKind::Video));
            }
            Ok(tracks)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeDevices;
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_acquire_audio_only() {
        let devices = FakeDevices::new();
        let adapter = MediaAdapter::new(devices.clone());

        let mut stream = adapter.acquire(false).await.unwrap();
        assert!(stream.has(TrackKind::Audio));
        assert!(!stream.has(TrackKind::Video));
        assert_eq!(
            devices.requests.lock()[0],
            MediaConstraints {
                audio: true,
                video: false
            }
        );
        assert!(adapter.release(&mut stream));
    }

    #[tokio::test]
    async fn test_acquire_errors_are_distinguished() {
        let devices = FakeDevices::new();
        let adapter = MediaAdapter::new(devices.clone());

        for err in [
            MediaError::PermissionDenied,
            MediaError::NoDeviceFound,
            MediaError::DeviceInUse,
            MediaError::Unknown("OverconstrainedError".into()),
        ] {
            devices.fail_next(err.clone());
            assert_eq!(adapter.acquire(true).await.unwrap_err(), err);
        }
        assert!(devices.issued.lock().is_empty());
    }

    #[tokio::test]
    async fn test_partial_capture_releases_opened_tracks() {
        let devices = FakeDevices::new();
        devices.omit_video();
        let adapter = MediaAdapter::new(devices.clone());

        let err = adapter.acquire(true).await.unwrap_err();
        assert_eq!(err, MediaError::NoDeviceFound);
        assert_eq!(devices.stop_counts(), vec![1]);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let devices = FakeDevices::new();
        let adapter = MediaAdapter::new(devices.clone());

        let mut stream = adapter.acquire(true).await.unwrap();
        assert!(adapter.release(&mut stream));
        assert!(!adapter.release(&mut stream));
        assert!(!stream.release());
        drop(stream);

        assert_eq!(devices.stop_counts(), vec![1, 1]);
    }

    #[tokio::test]
    async fn test_drop_without_release_stops_tracks() {
        let devices = FakeDevices::new();
        let adapter = MediaAdapter::new(devices.clone());

        let stream = adapter.acquire(true).await.unwrap();
        drop(stream);
        assert!(devices.all_released_once());
    }

    #[tokio::test]
    async fn test_set_enabled_by_kind() {
        let devices = FakeDevices::new();
        let adapter = MediaAdapter::new(devices.clone());
        let mut stream = adapter.acquire(true).await.unwrap();

        assert_eq!(stream.set_enabled(TrackKind::Audio, false), 1);
        let issued = devices.issued.lock();
        assert!(!*issued[0].1.enabled.lock());
        assert!(*issued[1].1.enabled.lock());
        drop(issued);

        stream.release();
        assert_eq!(stream.set_enabled(TrackKind::Video, false), 0);
        assert_eq!(devices.issued.lock()[1].1.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_media_error_wire_names() {
        assert_eq!(
            serde_json::to_string(&MediaError::PermissionDenied).unwrap(),
            "\"permission-denied\""
        );
        assert_eq!(
            serde_json::to_string(&MediaError::DeviceInUse).unwrap(),
            "\"device-in-use\""
        );
    }

    #[test]
    fn test_track_kind_parse() {
        assert_eq!(TrackKind::parse("audio"), Some(TrackKind::Audio));
        assert_eq!(TrackKind::parse("video"), Some(TrackKind::Video));
        assert_eq!(TrackKind::parse("data"), None);
    }
}
