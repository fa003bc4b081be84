//! Local media acquisition.
//!
//! `MediaDevices` is the seam to the platform (microphone, camera, display
//! capture). `MediaAcquisition` wraps it for one session: it applies the
//! capture constraints, remembers the current source per kind, and keeps a
//! ledger of every stream it ever handed out so teardown can stop them all.

use crate::errors::MediaError;

use async_trait::async_trait;
use common::types::{MediaKind, TrackKind};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Ended,
}

#[derive(Debug)]
struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    state: watch::Sender<TrackState>,
}

/// A single audio or video track.
///
/// Cloning yields another handle to the same track. Stopping is idempotent
/// and visible through every handle.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    /// Create a live track.
    #[must_use]
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        let (state, _) = watch::channel(TrackState::Live);
        Self {
            inner: Arc::new(TrackInner {
                id: Uuid::new_v4().to_string(),
                kind,
                label: label.into(),
                state,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Current ready state.
    #[must_use]
    pub fn ready_state(&self) -> TrackState {
        *self.inner.state.borrow()
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.ready_state() == TrackState::Live
    }

    /// Stop the track. Returns `true` if this call ended it.
    pub fn stop(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state == TrackState::Live {
                *state = TrackState::Ended;
                true
            } else {
                false
            }
        })
    }

    /// Resolves once the track has ended, for whatever reason.
    pub async fn ended(&self) {
        let mut rx = self.inner.state.subscribe();
        // The sender lives as long as `self`, so this only returns on Ended.
        let _ = rx.wait_for(|state| *state == TrackState::Ended).await;
    }

    /// Whether two handles refer to the same track.
    #[must_use]
    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A group of tracks obtained from one capture request.
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    #[must_use]
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// First track of the given kind.
    #[must_use]
    pub fn track_of(&self, kind: TrackKind) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    /// Stop every track. Returns how many were still live.
    pub fn stop(&self) -> usize {
        self.tracks.iter().filter(|t| t.stop()).count()
    }

    /// True once every track has ended.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.tracks.iter().all(|t| !t.is_live())
    }
}

/// Microphone processing constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl AudioConstraints {
    /// All voice processing enabled.
    #[must_use]
    pub const fn voice() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// A request for user (microphone/camera) media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserMediaRequest {
    Audio(AudioConstraints),
    Camera,
}

/// Platform media device access.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Capture from a microphone or camera.
    async fn get_user_media(&self, request: UserMediaRequest) -> Result<MediaStream, MediaError>;

    /// Capture a display through the system picker.
    async fn get_display_media(&self) -> Result<MediaStream, MediaError>;
}

/// Per-session media acquisition.
pub struct MediaAcquisition {
    devices: Arc<dyn MediaDevices>,
    current: HashMap<MediaKind, MediaStream>,
    acquired: Vec<MediaStream>,
}

impl MediaAcquisition {
    #[must_use]
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            current: HashMap::new(),
            acquired: Vec::new(),
        }
    }

    /// Open the microphone with voice processing enabled.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` or `DeviceUnavailable` from the platform.
    pub async fn get_audio(&mut self) -> Result<MediaStream, MediaError> {
        self.acquire(MediaKind::Audio).await
    }

    /// Open the camera.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` or `DeviceUnavailable` from the platform.
    pub async fn get_video(&mut self) -> Result<MediaStream, MediaError> {
        self.acquire(MediaKind::Video).await
    }

    /// Capture a display.
    ///
    /// # Errors
    ///
    /// `UserCancelled` when the picker is dismissed, otherwise as above.
    pub async fn get_screen(&mut self) -> Result<MediaStream, MediaError> {
        self.acquire(MediaKind::Screen).await
    }

    /// Acquire a stream for `kind` and make it the current source.
    ///
    /// The previous source of the same kind stays in the ledger.
    pub async fn acquire(&mut self, kind: MediaKind) -> Result<MediaStream, MediaError> {
        let stream = match kind {
            MediaKind::Audio => {
                self.devices
                    .get_user_media(UserMediaRequest::Audio(AudioConstraints::voice()))
                    .await
            }
            MediaKind::Video => self.devices.get_user_media(UserMediaRequest::Camera).await,
            MediaKind::Screen => self.devices.get_display_media().await,
        }
        .map_err(|e| {
            warn!(target: "client.media", kind = %kind, error = %e, "Media acquisition failed");
            e
        })?;

        // Record before validating so a malformed stream is still stopped on teardown
        self.acquired.push(stream.clone());

        if stream.track_of(kind.track_kind()).is_none() {
            stream.stop();
            return Err(MediaError::DeviceUnavailable(format!(
                "{kind} capture returned no {} track",
                kind.track_kind()
            )));
        }

        info!(
            target: "client.media",
            kind = %kind,
            stream_id = %stream.id(),
            tracks = stream.tracks().len(),
            "Media acquired"
        );
        self.current.insert(kind, stream.clone());
        Ok(stream)
    }

    /// Current source for `kind`, if any.
    #[must_use]
    pub fn current(&self, kind: MediaKind) -> Option<&MediaStream> {
        self.current.get(&kind)
    }

    /// Forget and stop the current source for `kind`.
    pub fn release(&mut self, kind: MediaKind) {
        if let Some(stream) = self.current.remove(&kind) {
            let stopped = stream.stop();
            debug!(target: "client.media", kind = %kind, stopped, "Media source released");
        }
    }

    /// Stop every track acquired during the session. Returns how many were live.
    pub fn stop_all(&mut self) -> usize {
        self.current.clear();
        let stopped: usize = self.acquired.iter().map(MediaStream::stop).sum();
        info!(
            target: "client.media",
            streams = self.acquired.len(),
            stopped,
            "Stopped all local media"
        );
        stopped
    }

    /// Every track handed out so far.
    pub fn acquired_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.acquired.iter().flat_map(|s| s.tracks().iter())
    }
}
