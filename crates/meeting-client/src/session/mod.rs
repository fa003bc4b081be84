//! Session lifecycle.
//!
//! One `SessionActor` per meeting participation:
//!
//! ```text
//! SessionHandle (cloneable, held by the UI)
//! └── SessionActor (owns the call)
//!     ├── MediaAcquisition  - local tracks
//!     ├── TransportManager  - send/recv transports, reconnection
//!     ├── ProducerSet       - one producer per local kind
//!     ├── ConsumerReconciler - consumers for remote producers
//!     └── StreamLayoutEngine - tiles for rendering
//! ```
//!
//! States: `idle`, `ringing-in`, `ringing-out`, `joining`, `in-call`,
//! `closing`, `closed`. `closed` is terminal; a new session is spawned for
//! the next call.
//!
//! # Modules
//!
//! - [`actor`] - `SessionActor` and its `SessionHandle`
//! - [`context`] - External collaborators passed to the actor
//! - [`messages`] - Commands, states and snapshots

pub mod actor;
pub mod context;
pub mod messages;

pub use actor::{SessionActor, SessionHandle};
pub use context::SessionContext;
pub use messages::*;
