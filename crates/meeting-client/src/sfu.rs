//! SFU client library seam.
//!
//! The media engine (device, transports, producers, consumers) is injected
//! behind these traits. Library callbacks such as `connect` and `produce`
//! arrive as `TransportSignal` messages on a channel handed out with each
//! transport; the caller answers through the embedded oneshot.

use crate::errors::SfuError;
use crate::media::MediaTrack;
use crate::signaling::messages::{DtlsParameters, RtpCapabilities, RtpParameters, TransportParams};

use common::types::{ConsumerId, ProducerId, TrackKind, TransportId};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// ICE/DTLS connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Whether a transport in this state can no longer carry media.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback raised by a transport that needs the signaling server.
#[derive(Debug)]
pub enum TransportSignal {
    /// First use of the transport: forward DTLS parameters to the server.
    Connect {
        dtls_parameters: DtlsParameters,
        respond_to: oneshot::Sender<Result<(), String>>,
    },

    /// A track is being produced: obtain the server-side producer id.
    Produce {
        kind: TrackKind,
        rtp_parameters: RtpParameters,
        is_screen: bool,
        respond_to: oneshot::Sender<Result<ProducerId, String>>,
    },

    /// ICE/DTLS connection state changed.
    ConnectionStateChange(ConnectionState),
}

/// A freshly created transport plus its callback channel.
pub struct TransportBinding<T: ?Sized> {
    pub transport: Arc<T>,
    pub signals: mpsc::Receiver<TransportSignal>,
}

/// Options for `SendTransport::produce`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProduceOptions {
    /// Passed back in `TransportSignal::Produce` so the server can tell a
    /// screen share from a camera.
    pub is_screen: bool,
}

/// Options for `RecvTransport::consume`, taken from the `consume` response.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeOptions {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: TrackKind,
    pub rtp_parameters: RtpParameters,
}

/// Local SFU device.
#[async_trait::async_trait]
pub trait SfuDevice: Send + Sync {
    /// Load the router's capabilities. Must precede transport creation.
    async fn load(&self, router_rtp_capabilities: &RtpCapabilities) -> Result<(), SfuError>;

    /// Device capabilities (only valid after `load`).
    fn rtp_capabilities(&self) -> Result<RtpCapabilities, SfuError>;

    fn create_send_transport(
        &self,
        params: &TransportParams,
    ) -> Result<TransportBinding<dyn SendTransport>, SfuError>;

    fn create_recv_transport(
        &self,
        params: &TransportParams,
    ) -> Result<TransportBinding<dyn RecvTransport>, SfuError>;
}

/// Outbound transport.
#[async_trait::async_trait]
pub trait SendTransport: Send + Sync {
    fn id(&self) -> TransportId;

    /// Produce a track. Raises `Connect` on first use and always `Produce`.
    async fn produce(
        &self,
        track: MediaTrack,
        options: ProduceOptions,
    ) -> Result<Arc<dyn Producer>, SfuError>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Inbound transport.
#[async_trait::async_trait]
pub trait RecvTransport: Send + Sync {
    fn id(&self) -> TransportId;

    /// Create a local consumer. Raises `Connect` on first use.
    async fn consume(&self, options: ConsumeOptions) -> Result<Arc<dyn Consumer>, SfuError>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Local handle of an outbound stream.
pub trait Producer: Send + Sync {
    fn id(&self) -> ProducerId;
    fn kind(&self) -> TrackKind;
    fn track(&self) -> MediaTrack;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

/// Local handle of an inbound stream. Closing it ends its track.
pub trait Consumer: Send + Sync {
    fn id(&self) -> ConsumerId;
    fn producer_id(&self) -> ProducerId;
    fn kind(&self) -> TrackKind;
    fn track(&self) -> MediaTrack;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_states() {
        assert!(!ConnectionState::New.is_dead());
        assert!(!ConnectionState::Connecting.is_dead());
        assert!(!ConnectionState::Connected.is_dead());
        assert!(ConnectionState::Disconnected.is_dead());
        assert!(ConnectionState::Failed.is_dead());
        assert!(ConnectionState::Closed.is_dead());
        assert_eq!(ConnectionState::Failed.to_string(), "failed");
    }
}
