//! # Meeting Client Test Utilities
//!
//! Mock collaborators and fixtures for testing the meeting client without
//! a signaling server, an SFU or capture hardware.
//!
//! ## Modules
//!
//! - `mock_signaling` - Scripted signaling server with request recording
//! - `mock_sfu` - In-memory SFU device, transports, producers and consumers
//! - `mock_media` - Capture devices that grant, deny or fail per kind
//! - `fixtures` - Producer lists, push events and test configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meeting_client_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let signaling = MockSignaling::builder().socket_id("sock-local").build();
//!     let device = MockDevice::new();
//!     let media = MockMediaDevices::new();
//!
//!     let context = SessionContext::create(
//!         test_config(),
//!         signaling.clone(),
//!         device.clone(),
//!         media.clone(),
//!     );
//!     let (session, _task) = SessionActor::spawn(context, CancellationToken::new());
//!
//!     session.join(RoomId::from("room-1")).await.unwrap();
//!     assert_eq!(signaling.count("join"), 1);
//! }
//! ```

pub mod fixtures;
pub mod mock_media;
pub mod mock_sfu;
pub mod mock_signaling;

pub use fixtures::*;
pub use mock_media::*;
pub use mock_sfu::*;
pub use mock_signaling::*;

/// Install a test-writer tracing subscriber once per test binary.
///
/// Honours `RUST_LOG`; defaults to `meeting_client=debug`.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("meeting_client=debug,client=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
