//! Typed signaling payloads.
//!
//! Request bodies, responses and push events as they cross the wire. Field
//! names follow the server's JSON (`roomID`, `producerID`, ...). Push events
//! are decoded into `PushEvent` and validated here so nothing loosely shaped
//! reaches the session.

use crate::errors::SignalingError;

use common::error::CommonError;
use common::types::{
    ConsumerId, MediaKind, ProducerId, RoomId, SocketId, TrackKind, TransportId, UserId,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Router or device RTP capabilities (opaque to the core).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpCapabilities(pub Value);

/// DTLS parameters produced by the SFU library (opaque to the core).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DtlsParameters(pub Value);

/// RTP parameters of a producer or consumer (opaque to the core).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpParameters(pub Value);

/// Server-side transport description used to build a local transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportParams {
    pub id: TransportId,
    /// ICE/DTLS parameters, passed through to the SFU library untouched.
    #[serde(flatten)]
    pub parameters: Map<String, Value>,
}

/// A producer advertised to the room by a participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteProducer {
    #[serde(rename = "producerID")]
    pub producer_id: ProducerId,
    #[serde(rename = "socketID")]
    pub socket_id: SocketId,
    #[serde(rename = "userID")]
    pub user_id: UserId,
    pub kind: MediaKind,
    #[serde(rename = "roomID")]
    pub room_id: RoomId,
}

impl RemoteProducer {
    fn validate(&self) -> Result<(), CommonError> {
        ProducerId::parse(self.producer_id.as_str())?;
        SocketId::parse(self.socket_id.as_str())?;
        UserId::parse(self.user_id.as_str())?;
        RoomId::parse(self.room_id.as_str())?;
        Ok(())
    }
}

/// Public profile of a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(rename = "userID")]
    pub user_id: UserId,
    #[serde(default, rename = "name", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl UserInfo {
    fn validate(&self) -> Result<(), CommonError> {
        UserId::parse(self.user_id.as_str()).map(|_| ())
    }
}

// ----------------------------------------------------------------------------
// Requests
// ----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(crate) struct RoomRequest<'a> {
    #[serde(rename = "roomID")]
    pub room_id: &'a RoomId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateProducerTransportRequest<'a> {
    pub force_tcp: bool,
    pub rtp_capabilities: &'a RtpCapabilities,
    #[serde(rename = "roomID")]
    pub room_id: &'a RoomId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConnectProducerTransportRequest<'a> {
    pub dtls_parameters: &'a DtlsParameters,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProduceRequest<'a> {
    pub transport_id: &'a TransportId,
    pub kind: TrackKind,
    pub rtp_parameters: &'a RtpParameters,
    #[serde(rename = "roomID")]
    pub room_id: &'a RoomId,
    pub is_screen: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateConsumerTransportRequest<'a> {
    pub force_tcp: bool,
    #[serde(rename = "roomID")]
    pub room_id: &'a RoomId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConnectConsumerTransportRequest<'a> {
    pub transport_id: &'a TransportId,
    pub dtls_parameters: &'a DtlsParameters,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConsumeRequest<'a> {
    pub rtp_capabilities: &'a RtpCapabilities,
    #[serde(rename = "socketID")]
    pub socket_id: &'a SocketId,
    #[serde(rename = "roomID")]
    pub room_id: &'a RoomId,
    #[serde(rename = "producerID")]
    pub producer_id: &'a ProducerId,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResumeRequest<'a> {
    #[serde(rename = "producerID")]
    pub producer_id: &'a ProducerId,
    #[serde(rename = "meetingID")]
    pub meeting_id: &'a RoomId,
}

#[derive(Debug, Serialize)]
pub(crate) struct RemoveRequest<'a> {
    #[serde(rename = "producerID")]
    pub producer_id: &'a ProducerId,
    #[serde(rename = "roomID")]
    pub room_id: &'a RoomId,
}

#[derive(Debug, Serialize)]
pub(crate) struct CallSignal<'a> {
    #[serde(rename = "roomID")]
    pub room_id: &'a RoomId,
    pub callee: &'a UserId,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerSignal<'a> {
    #[serde(rename = "roomID")]
    pub room_id: &'a RoomId,
    pub accepted: bool,
}

// ----------------------------------------------------------------------------
// Responses
// ----------------------------------------------------------------------------

/// Response to `join`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JoinResponse {
    #[serde(default)]
    pub producers: Vec<RemoteProducer>,
    /// Server-side consumer records; informational only.
    #[serde(default)]
    pub consumers: Vec<Value>,
    #[serde(default)]
    pub peers: HashMap<SocketId, UserInfo>,
}

impl JoinResponse {
    pub(crate) fn validate(&self) -> Result<(), CommonError> {
        self.producers.iter().try_for_each(RemoteProducer::validate)?;
        self.peers.values().try_for_each(UserInfo::validate)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProduceResponse {
    pub id: ProducerId,
}

/// Response to `consume`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeResponse {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: TrackKind,
    pub rtp_parameters: RtpParameters,
}

// ----------------------------------------------------------------------------
// Push events
// ----------------------------------------------------------------------------

/// A raw event as delivered by the signaling transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub name: String,
    pub payload: Value,
}

impl RawEvent {
    #[must_use]
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// A validated inbound push event.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// A producer was added; carries the room's full producer list.
    NewProducer {
        room_id: RoomId,
        producers: Vec<RemoteProducer>,
    },
    /// A participant left; carries the remaining producer list.
    Leave {
        room_id: RoomId,
        socket_id: Option<SocketId>,
        producers: Vec<RemoteProducer>,
    },
    /// A producer was removed; carries the remaining producer list.
    Remove {
        room_id: RoomId,
        producer_id: Option<ProducerId>,
        producers: Vec<RemoteProducer>,
    },
    /// Full resync of the room's producer list.
    Consumers {
        room_id: RoomId,
        producers: Vec<RemoteProducer>,
    },
    /// A participant joined the room.
    NewPeer {
        room_id: RoomId,
        socket_id: SocketId,
        user: UserInfo,
    },
    /// Inbound call invitation.
    Call { room_id: RoomId, caller: UserInfo },
    /// Callee's answer to an outbound call.
    Answer { room_id: RoomId, accepted: bool },
    /// The other side ended the call.
    Close { room_id: RoomId },
}

#[derive(Deserialize)]
struct ProducerListWire {
    #[serde(rename = "roomID")]
    room_id: RoomId,
    #[serde(default)]
    producers: Vec<RemoteProducer>,
    #[serde(default, rename = "socketID")]
    socket_id: Option<SocketId>,
    #[serde(default, rename = "producerID")]
    producer_id: Option<ProducerId>,
}

#[derive(Deserialize)]
struct NewPeerWire {
    #[serde(rename = "roomID")]
    room_id: RoomId,
    #[serde(rename = "socketID")]
    socket_id: SocketId,
    user: UserInfo,
}

#[derive(Deserialize)]
struct CallWire {
    #[serde(rename = "roomID")]
    room_id: RoomId,
    caller: UserInfo,
}

#[derive(Deserialize)]
struct AnswerWire {
    #[serde(rename = "roomID")]
    room_id: RoomId,
    accepted: bool,
}

#[derive(Deserialize)]
struct CloseWire {
    #[serde(rename = "roomID")]
    room_id: RoomId,
}

fn decode_wire<T: DeserializeOwned>(name: &str, payload: Value) -> Result<T, SignalingError> {
    serde_json::from_value(payload).map_err(|e| SignalingError::invalid(name, e))
}

impl PushEvent {
    /// Decode and validate a raw event.
    ///
    /// # Errors
    ///
    /// `SignalingError::InvalidPayload` for unknown event names, missing or
    /// empty required fields, or unknown media kinds.
    pub fn decode(raw: RawEvent) -> Result<Self, SignalingError> {
        let RawEvent { name, payload } = raw;
        let name = name.as_str();
        let event = match name {
            "newProducer" | "leave" | "remove" | "consumers" => {
                let wire: ProducerListWire = decode_wire(name, payload)?;
                match name {
                    "newProducer" => PushEvent::NewProducer {
                        room_id: wire.room_id,
                        producers: wire.producers,
                    },
                    "leave" => PushEvent::Leave {
                        room_id: wire.room_id,
                        socket_id: wire.socket_id,
                        producers: wire.producers,
                    },
                    "remove" => PushEvent::Remove {
                        room_id: wire.room_id,
                        producer_id: wire.producer_id,
                        producers: wire.producers,
                    },
                    _ => PushEvent::Consumers {
                        room_id: wire.room_id,
                        producers: wire.producers,
                    },
                }
            }
            "newPeer" => {
                let wire: NewPeerWire = decode_wire(name, payload)?;
                PushEvent::NewPeer {
                    room_id: wire.room_id,
                    socket_id: wire.socket_id,
                    user: wire.user,
                }
            }
            "call" => {
                let wire: CallWire = decode_wire(name, payload)?;
                PushEvent::Call {
                    room_id: wire.room_id,
                    caller: wire.caller,
                }
            }
            "answer" => {
                let wire: AnswerWire = decode_wire(name, payload)?;
                PushEvent::Answer {
                    room_id: wire.room_id,
                    accepted: wire.accepted,
                }
            }
            "close" => {
                let wire: CloseWire = decode_wire(name, payload)?;
                PushEvent::Close {
                    room_id: wire.room_id,
                }
            }
            other => {
                return Err(SignalingError::invalid(other, "unknown event"));
            }
        };

        event
            .validate()
            .map_err(|e| SignalingError::invalid(name, e))?;
        Ok(event)
    }

    fn validate(&self) -> Result<(), CommonError> {
        RoomId::parse(self.room_id().as_str())?;
        if let Some(producers) = self.producer_list() {
            producers.iter().try_for_each(RemoteProducer::validate)?;
        }
        match self {
            PushEvent::NewPeer {
                socket_id, user, ..
            } => {
                SocketId::parse(socket_id.as_str())?;
                user.validate()
            }
            PushEvent::Call { caller, .. } => caller.validate(),
            _ => Ok(()),
        }
    }

    /// Room the event belongs to.
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        match self {
            PushEvent::NewProducer { room_id, .. }
            | PushEvent::Leave { room_id, .. }
            | PushEvent::Remove { room_id, .. }
            | PushEvent::Consumers { room_id, .. }
            | PushEvent::NewPeer { room_id, .. }
            | PushEvent::Call { room_id, .. }
            | PushEvent::Answer { room_id, .. }
            | PushEvent::Close { room_id } => room_id,
        }
    }

    /// Authoritative producer list, for events that carry one.
    #[must_use]
    pub fn producer_list(&self) -> Option<&[RemoteProducer]> {
        match self {
            PushEvent::NewProducer { producers, .. }
            | PushEvent::Leave { producers, .. }
            | PushEvent::Remove { producers, .. }
            | PushEvent::Consumers { producers, .. } => Some(producers.as_slice()),
            _ => None,
        }
    }

    /// Wire name of the event (bounded, safe as a log field).
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            PushEvent::NewProducer { .. } => "newProducer",
            PushEvent::Leave { .. } => "leave",
            PushEvent::Remove { .. } => "remove",
            PushEvent::Consumers { .. } => "consumers",
            PushEvent::NewPeer { .. } => "newPeer",
            PushEvent::Call { .. } => "call",
            PushEvent::Answer { .. } => "answer",
            PushEvent::Close { .. } => "close",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn producer_json(id: &str, kind: &str) -> Value {
        json!({
            "producerID": id,
            "socketID": "sock-b",
            "userID": "user-b",
            "kind": kind,
            "roomID": "room-1",
        })
    }

    #[test]
    fn test_decode_new_producer() {
        let event = PushEvent::decode(RawEvent::new(
            "newProducer",
            json!({
                "roomID": "room-1",
                "producers": [producer_json("p1", "audio"), producer_json("p2", "screen")],
            }),
        ))
        .unwrap();

        assert_eq!(event.name(), "newProducer");
        assert_eq!(event.room_id().as_str(), "room-1");
        let producers = event.producer_list().unwrap();
        assert_eq!(producers.len(), 2);
        assert_eq!(producers.get(1).unwrap().kind, MediaKind::Screen);
    }

    #[test]
    fn test_decode_leave_keeps_socket() {
        let event = PushEvent::decode(RawEvent::new(
            "leave",
            json!({"roomID": "room-1", "socketID": "sock-b", "producers": []}),
        ))
        .unwrap();

        assert!(matches!(
            event,
            PushEvent::Leave { socket_id: Some(ref s), ref producers, .. }
                if s.as_str() == "sock-b" && producers.is_empty()
        ));
    }

    #[test]
    fn test_missing_room_rejected() {
        let err = PushEvent::decode(RawEvent::new("close", json!({}))).unwrap_err();
        assert!(matches!(err, SignalingError::InvalidPayload { ref context, .. } if context == "close"));
    }

    #[test]
    fn test_empty_producer_id_rejected() {
        let err = PushEvent::decode(RawEvent::new(
            "remove",
            json!({"roomID": "room-1", "producers": [producer_json("", "video")]}),
        ))
        .unwrap_err();
        assert!(err.to_string().contains("producerID"));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result = PushEvent::decode(RawEvent::new(
            "consumers",
            json!({"roomID": "room-1", "producers": [producer_json("p1", "data")]}),
        ));
        assert!(matches!(result, Err(SignalingError::InvalidPayload { .. })));
    }

    #[test]
    fn test_unknown_event_rejected() {
        let result = PushEvent::decode(RawEvent::new("chatMessage", json!({"roomID": "r"})));
        assert!(matches!(result, Err(SignalingError::InvalidPayload { .. })));
    }

    #[test]
    fn test_decode_call_and_answer() {
        let call = PushEvent::decode(RawEvent::new(
            "call",
            json!({"roomID": "room-9", "caller": {"userID": "alice", "name": "Alice"}}),
        ))
        .unwrap();
        assert!(matches!(
            call,
            PushEvent::Call { ref caller, .. } if caller.display_name.as_deref() == Some("Alice")
        ));

        let answer = PushEvent::decode(RawEvent::new(
            "answer",
            json!({"roomID": "room-9", "accepted": false}),
        ))
        .unwrap();
        assert_eq!(
            answer,
            PushEvent::Answer {
                room_id: RoomId::from("room-9"),
                accepted: false
            }
        );
    }

    #[test]
    fn test_request_field_names() {
        let room = RoomId::from("room-1");
        let producer = ProducerId::from("p1");
        let body = serde_json::to_value(ResumeRequest {
            producer_id: &producer,
            meeting_id: &room,
        })
        .unwrap();
        assert_eq!(body, json!({"producerID": "p1", "meetingID": "room-1"}));

        let caps = RtpCapabilities(json!({"codecs": []}));
        let body = serde_json::to_value(CreateProducerTransportRequest {
            force_tcp: true,
            rtp_capabilities: &caps,
            room_id: &room,
        })
        .unwrap();
        assert_eq!(
            body,
            json!({"forceTcp": true, "rtpCapabilities": {"codecs": []}, "roomID": "room-1"})
        );
    }

    #[test]
    fn test_transport_params_keep_extra_fields() {
        let params: TransportParams = serde_json::from_value(json!({
            "id": "t1",
            "iceParameters": {"usernameFragment": "u"},
            "dtlsParameters": {"role": "auto"},
        }))
        .unwrap();

        assert_eq!(params.id.as_str(), "t1");
        assert!(params.parameters.contains_key("iceParameters"));
        assert!(!params.parameters.contains_key("id"));
    }

    #[test]
    fn test_consume_response_uses_camel_case() {
        let response: ConsumeResponse = serde_json::from_value(json!({
            "id": "c1",
            "producerId": "p1",
            "kind": "video",
            "rtpParameters": {},
        }))
        .unwrap();
        assert_eq!(response.producer_id.as_str(), "p1");
        assert_eq!(response.kind, TrackKind::Video);
    }
}
