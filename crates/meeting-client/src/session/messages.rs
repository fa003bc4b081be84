//! Message and state types for the session actor.

use crate::errors::ClientError;
use crate::layout::{Layout, Peer};
use crate::reconciler::RemoteStream;
use crate::signaling::messages::UserInfo;

use chrono::{DateTime, Utc};
use common::types::{MediaKind, ProducerId, RoomId, SocketId, UserId};
use std::fmt;
use tokio::sync::oneshot;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Local hangup.
    Hangup,
    /// The other side sent `close`.
    RemoteClosed,
    /// The session task was cancelled or every handle was dropped.
    Cancelled,
    /// An unrecoverable error; the message is for logs, not for users.
    Fatal(String),
}

impl CloseReason {
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, CloseReason::Fatal(_))
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    RingingIn { room_id: RoomId, caller: UserInfo },
    RingingOut { room_id: RoomId, callee: UserId },
    Joining { room_id: RoomId },
    InCall { room_id: RoomId },
    Closing { room_id: RoomId },
    Closed { reason: CloseReason },
}

impl SessionState {
    /// Bounded name for logs and metric labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::RingingIn { .. } => "ringing_in",
            SessionState::RingingOut { .. } => "ringing_out",
            SessionState::Joining { .. } => "joining",
            SessionState::InCall { .. } => "in_call",
            SessionState::Closing { .. } => "closing",
            SessionState::Closed { .. } => "closed",
        }
    }

    #[must_use]
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            SessionState::RingingIn { room_id, .. }
            | SessionState::RingingOut { room_id, .. }
            | SessionState::Joining { room_id }
            | SessionState::InCall { room_id }
            | SessionState::Closing { room_id } => Some(room_id),
            SessionState::Idle | SessionState::Closed { .. } => None,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed { .. })
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `closed` is terminal. Every other state may end in `closed`
    /// (fatal error or cancellation); `closing` is only entered from
    /// `in-call`.
    #[must_use]
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::{Closed, Closing, Idle, InCall, Joining, RingingIn, RingingOut};

        match (self, next) {
            (Closed { .. }, _) => false,
            (_, Closed { .. }) => !matches!(self, InCall { .. }),
            (Idle, RingingIn { .. } | RingingOut { .. } | Joining { .. })
            | (RingingIn { .. } | RingingOut { .. }, Joining { .. } | Idle)
            | (Joining { .. }, InCall { .. })
            | (InCall { .. }, Closing { .. }) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Point-in-time view of a session for rendering.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub streams: Vec<RemoteStream>,
    pub peers: Vec<Peer>,
    pub layout: Layout,
    /// Local kinds currently produced.
    pub local_kinds: Vec<MediaKind>,
    pub in_call_since: Option<DateTime<Utc>>,
}

/// Commands accepted by the session actor.
#[derive(Debug)]
pub enum SessionMessage {
    /// Join a scheduled meeting directly.
    Join {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Ring a user for a 1:1 call.
    Call {
        room_id: RoomId,
        callee: UserId,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Accept the ringing inbound call and join it.
    Accept {
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Decline the ringing inbound call.
    Decline {
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// End the call (or stop ringing).
    Hangup {
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    StartMedia {
        kind: MediaKind,
        respond_to: oneshot::Sender<Result<ProducerId, ClientError>>,
    },

    StopMedia {
        kind: MediaKind,
        respond_to: oneshot::Sender<Result<bool, ClientError>>,
    },

    /// Start the kind if stopped, stop it if active. Replies with the new
    /// active flag.
    ToggleMedia {
        kind: MediaKind,
        respond_to: oneshot::Sender<Result<bool, ClientError>>,
    },

    SetGridMode {
        enabled: bool,
        respond_to: oneshot::Sender<()>,
    },

    /// Pin a peer in focus mode; `None` returns to the default.
    SelectMain {
        socket_id: Option<SocketId>,
        respond_to: oneshot::Sender<()>,
    },

    GetSnapshot {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },
}
