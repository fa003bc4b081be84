//! Meeting Client Library
//!
//! Client-side core of a video meeting built on an SFU (mediasoup-style
//! selective forwarding unit). It owns the media lifecycle of one
//! participant:
//!
//! - Local capture of microphone, camera and screen
//! - Send and receive transports negotiated over signaling
//! - One producer per local media kind
//! - Consumers kept in step with the room's producer list
//! - A render layout (focus or grid) derived from the received streams
//! - The call lifecycle, including 1:1 ringing
//!
//! The signaling socket, the SFU device library and the platform media
//! APIs are injected as trait objects ([`signaling::SignalingTransport`],
//! [`sfu::SfuDevice`], [`media::MediaDevices`]).
//!
//! # Architecture
//!
//! ```text
//! SessionHandle ──mpsc──▶ SessionActor
//!                          ├── receives PushEvents (broadcast)
//!                          ├── receives TransportEvents (mpsc)
//!                          └── receives ProducerEvents (mpsc)
//! ```
//!
//! # Modules
//!
//! - [`config`] - Client configuration from environment
//! - [`errors`] - Error types with user-facing categories
//! - [`layout`] - Peer aggregation and tile layout
//! - [`media`] - Local media acquisition
//! - [`observability`] - Metric definitions
//! - [`producers`] - Per-kind producer management
//! - [`reconciler`] - Consumer reconciliation
//! - [`session`] - Session actor and lifecycle
//! - [`sfu`] - SFU device library abstraction
//! - [`signaling`] - Signaling requests and push events
//! - [`transport`] - Transport creation and reconnection

pub mod config;
pub mod errors;
pub mod layout;
pub mod media;
pub mod observability;
pub mod producers;
pub mod reconciler;
pub mod session;
pub mod sfu;
pub mod signaling;
pub mod transport;
