//! Mock capture devices.
//!
//! Each source (microphone, camera, screen) can be set to grant, deny,
//! report no hardware, or (screen only, in practice) be cancelled by the
//! user. Every stream handed out is kept so tests can check that teardown
//! stopped it.

use common::types::{MediaKind, TrackKind};
use meeting_client::errors::MediaError;
use meeting_client::media::{MediaDevices, MediaStream, MediaTrack, UserMediaRequest};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// What a capture request for a source returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOutcome {
    Grant,
    Deny,
    Unavailable,
    Cancel,
}

#[derive(Default)]
struct State {
    outcomes: HashMap<MediaKind, DeviceOutcome>,
    issued: Vec<(MediaKind, MediaStream)>,
    requests: HashMap<MediaKind, usize>,
}

/// Mock platform media devices.
#[derive(Default)]
pub struct MockMediaDevices {
    state: Mutex<State>,
}

impl MockMediaDevices {
    /// Every source granted.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, kind: MediaKind, outcome: DeviceOutcome) {
        self.state.lock().unwrap().outcomes.insert(kind, outcome);
    }

    pub fn deny(&self, kind: MediaKind) {
        self.set(kind, DeviceOutcome::Deny);
    }

    pub fn unavailable(&self, kind: MediaKind) {
        self.set(kind, DeviceOutcome::Unavailable);
    }

    pub fn cancel(&self, kind: MediaKind) {
        self.set(kind, DeviceOutcome::Cancel);
    }

    /// Streams handed out for `kind`, oldest first.
    #[must_use]
    pub fn issued(&self, kind: MediaKind) -> Vec<MediaStream> {
        self.state
            .lock()
            .unwrap()
            .issued
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, stream)| stream.clone())
            .collect()
    }

    /// Every stream handed out.
    #[must_use]
    pub fn all_issued(&self) -> Vec<MediaStream> {
        self.state
            .lock()
            .unwrap()
            .issued
            .iter()
            .map(|(_, stream)| stream.clone())
            .collect()
    }

    /// Tracks handed out and still live.
    #[must_use]
    pub fn live_tracks(&self) -> usize {
        self.all_issued()
            .iter()
            .flat_map(|stream| stream.tracks().to_vec())
            .filter(MediaTrack::is_live)
            .count()
    }

    /// Capture requests made for `kind`.
    #[must_use]
    pub fn request_count(&self, kind: MediaKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    fn capture(&self, kind: MediaKind) -> Result<MediaStream, MediaError> {
        let mut state = self.state.lock().unwrap();
        *state.requests.entry(kind).or_default() += 1;

        match state
            .outcomes
            .get(&kind)
            .copied()
            .unwrap_or(DeviceOutcome::Grant)
        {
            DeviceOutcome::Grant => {
                let (track_kind, label) = match kind {
                    MediaKind::Audio => (TrackKind::Audio, "Mock microphone"),
                    MediaKind::Video => (TrackKind::Video, "Mock camera"),
                    MediaKind::Screen => (TrackKind::Video, "Mock display"),
                };
                let stream = MediaStream::new(vec![MediaTrack::new(track_kind, label)]);
                state.issued.push((kind, stream.clone()));
                Ok(stream)
            }
            DeviceOutcome::Deny => Err(MediaError::PermissionDenied(format!(
                "{kind} access denied"
            ))),
            DeviceOutcome::Unavailable => Err(MediaError::DeviceUnavailable(format!(
                "no {kind} device"
            ))),
            DeviceOutcome::Cancel => Err(MediaError::UserCancelled),
        }
    }
}

#[async_trait::async_trait]
impl MediaDevices for MockMediaDevices {
    async fn get_user_media(&self, request: UserMediaRequest) -> Result<MediaStream, MediaError> {
        match request {
            UserMediaRequest::Audio(_) => self.capture(MediaKind::Audio),
            UserMediaRequest::Camera => self.capture(MediaKind::Video),
        }
    }

    async fn get_display_media(&self) -> Result<MediaStream, MediaError> {
        self.capture(MediaKind::Screen)
    }
}
