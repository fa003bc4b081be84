//! Test fixtures: producer lists, push events and configuration.

use common::types::{MediaKind, ProducerId, RoomId, SocketId, UserId};
use meeting_client::config::{Config, ReconnectPolicy};
use meeting_client::signaling::messages::{RawEvent, RemoteProducer};
use serde_json::json;
use std::time::Duration;

pub const TEST_ROOM: &str = "room-1";
pub const LOCAL_SOCKET: &str = "sock-local";

/// A remote producer in `room`.
#[must_use]
pub fn remote_producer(
    producer_id: &str,
    socket_id: &str,
    user_id: &str,
    kind: MediaKind,
    room: &str,
) -> RemoteProducer {
    RemoteProducer {
        producer_id: ProducerId::from(producer_id),
        socket_id: SocketId::from(socket_id),
        user_id: UserId::from(user_id),
        kind,
        room_id: RoomId::from(room),
    }
}

/// Audio and camera producers of one remote participant in `TEST_ROOM`.
#[must_use]
pub fn participant(socket_id: &str, user_id: &str) -> Vec<RemoteProducer> {
    vec![
        remote_producer(
            &format!("{socket_id}-audio"),
            socket_id,
            user_id,
            MediaKind::Audio,
            TEST_ROOM,
        ),
        remote_producer(
            &format!("{socket_id}-video"),
            socket_id,
            user_id,
            MediaKind::Video,
            TEST_ROOM,
        ),
    ]
}

/// A producer-list push event (`newProducer`, `leave`, `remove`,
/// `consumers`).
#[must_use]
pub fn producer_list_event(name: &str, room: &str, producers: &[RemoteProducer]) -> RawEvent {
    RawEvent::new(name, json!({ "roomID": room, "producers": producers }))
}

/// `leave` for `socket_id`, carrying the remaining producers.
#[must_use]
pub fn leave_event(room: &str, socket_id: &str, producers: &[RemoteProducer]) -> RawEvent {
    RawEvent::new(
        "leave",
        json!({ "roomID": room, "socketID": socket_id, "producers": producers }),
    )
}

#[must_use]
pub fn new_peer_event(room: &str, socket_id: &str, user_id: &str, name: &str) -> RawEvent {
    RawEvent::new(
        "newPeer",
        json!({
            "roomID": room,
            "socketID": socket_id,
            "user": { "userID": user_id, "name": name },
        }),
    )
}

#[must_use]
pub fn call_event(room: &str, caller: &str) -> RawEvent {
    RawEvent::new(
        "call",
        json!({ "roomID": room, "caller": { "userID": caller, "name": caller } }),
    )
}

#[must_use]
pub fn answer_event(room: &str, accepted: bool) -> RawEvent {
    RawEvent::new("answer", json!({ "roomID": room, "accepted": accepted }))
}

#[must_use]
pub fn close_event(room: &str) -> RawEvent {
    RawEvent::new("close", json!({ "roomID": room }))
}

/// Defaults with short timers so paused-clock tests stay readable.
#[must_use]
pub fn test_config() -> Config {
    Config {
        ring_timeout: Duration::from_secs(30),
        reconnect: ReconnectPolicy {
            enabled: true,
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(1),
        },
        ..Config::default()
    }
}
