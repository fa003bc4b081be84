//! Common data types for meeting client components.
//!
//! Identifiers handed out by the signaling server and the SFU are opaque
//! strings. Each gets its own newtype so a `ProducerId` can never be passed
//! where a `SocketId` is expected.

use crate::error::CommonError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier, rejecting empty values.
            ///
            /// # Errors
            ///
            /// Returns `CommonError::EmptyId` if `value` is empty or whitespace.
            pub fn parse(value: impl Into<String>) -> Result<Self, CommonError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(CommonError::EmptyId($label));
                }
                Ok(Self(value))
            }

            /// Borrow the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Meeting room identifier (also used as the meeting id on `resume`).
    RoomId,
    "roomID"
);
string_id!(
    /// Server-assigned producer identifier.
    ProducerId,
    "producerID"
);
string_id!(
    /// Server-assigned consumer identifier.
    ConsumerId,
    "consumerID"
);
string_id!(
    /// Signaling connection identifier of a participant.
    SocketId,
    "socketID"
);
string_id!(
    /// Application user identifier.
    UserId,
    "userID"
);
string_id!(
    /// SFU transport identifier.
    TransportId,
    "transportId"
);

/// Raw track kind as understood by the SFU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    /// Returns the kind as sent on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media kind of a producer as the application sees it.
///
/// A screen share travels as a video track; the distinction only exists at
/// the application level (`isScreen` on `produce`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
    Screen,
}

impl MediaKind {
    /// All kinds, in the order producers are started during a join.
    pub const ALL: [MediaKind; 3] = [MediaKind::Audio, MediaKind::Video, MediaKind::Screen];

    /// Track kind carried by a producer of this media kind.
    #[must_use]
    pub const fn track_kind(&self) -> TrackKind {
        match self {
            MediaKind::Audio => TrackKind::Audio,
            MediaKind::Video | MediaKind::Screen => TrackKind::Video,
        }
    }

    /// Whether this kind is a display capture.
    #[must_use]
    pub const fn is_screen(&self) -> bool {
        matches!(self, MediaKind::Screen)
    }

    /// Whether this kind carries video.
    #[must_use]
    pub const fn is_video(&self) -> bool {
        matches!(self.track_kind(), TrackKind::Video)
    }

    /// Returns the kind as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Screen => "screen",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(MediaKind::Audio),
            "video" => Ok(MediaKind::Video),
            "screen" => Ok(MediaKind::Screen),
            other => Err(CommonError::UnknownKind(other.to_string())),
        }
    }
}
