//! Session context.
//!
//! Everything a session needs from the outside world, passed explicitly:
//! configuration, the signaling connection, the SFU device and the
//! platform media devices. Per-call components are built from the context
//! when a room is entered and dropped at teardown.

use crate::config::Config;
use crate::layout::{LayoutMode, StreamLayoutEngine};
use crate::media::{MediaAcquisition, MediaDevices};
use crate::producers::{ProducerEvent, ProducerSet};
use crate::reconciler::ConsumerReconciler;
use crate::sfu::SfuDevice;
use crate::signaling::{SignalingClient, SignalingTransport};
use crate::transport::{TransportEvent, TransportManager};

use common::types::RoomId;
use std::sync::Arc;
use tokio::sync::mpsc;

/// External collaborators and settings of one session.
#[derive(Clone)]
pub struct SessionContext {
    config: Config,
    signaling: SignalingClient,
    device: Arc<dyn SfuDevice>,
    media_devices: Arc<dyn MediaDevices>,
}

impl SessionContext {
    #[must_use]
    pub fn create(
        config: Config,
        signaling: Arc<dyn SignalingTransport>,
        device: Arc<dyn SfuDevice>,
        media_devices: Arc<dyn MediaDevices>,
    ) -> Self {
        Self {
            config,
            signaling: SignalingClient::new(signaling),
            device,
            media_devices,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn signaling(&self) -> &SignalingClient {
        &self.signaling
    }

    #[must_use]
    pub fn device(&self) -> &Arc<dyn SfuDevice> {
        &self.device
    }

    pub(crate) fn media_acquisition(&self) -> MediaAcquisition {
        MediaAcquisition::new(Arc::clone(&self.media_devices))
    }

    pub(crate) fn transport_manager(
        &self,
        room_id: RoomId,
        events: mpsc::Sender<TransportEvent>,
    ) -> TransportManager {
        TransportManager::new(
            self.signaling.clone(),
            Arc::clone(&self.device),
            room_id,
            self.config.force_tcp,
            self.config.reconnect,
            events,
        )
    }

    pub(crate) fn producer_set(
        &self,
        room_id: RoomId,
        events: mpsc::Sender<ProducerEvent>,
    ) -> ProducerSet {
        ProducerSet::new(self.signaling.clone(), room_id, events)
    }

    pub(crate) fn reconciler(&self, room_id: RoomId) -> ConsumerReconciler {
        ConsumerReconciler::new(self.signaling.clone(), room_id)
    }

    pub(crate) fn layout_engine(&self) -> StreamLayoutEngine {
        let mode = if self.config.grid_mode {
            LayoutMode::Grid
        } else {
            LayoutMode::Focus
        };
        StreamLayoutEngine::new(mode)
    }
}
