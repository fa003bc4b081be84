//! Signaling client.
//!
//! Request/response calls and fire-and-forget emits over an injected
//! `SignalingTransport`. The transport owns the actual socket and its
//! acknowledgement timeout; this layer owns the message shapes and the
//! decoding of push events.
//!
//! # Connection Pattern
//!
//! `SignalingClient` is cheaply cloneable (an `Arc` over the transport), so
//! the session, the transport manager and the reconciler each hold a clone
//! and issue requests concurrently without locking.

pub mod messages;

use crate::errors::SignalingError;
use crate::observability::metrics;
use messages::{
    AnswerSignal, CallSignal, ConnectConsumerTransportRequest, ConnectProducerTransportRequest,
    ConsumeRequest, ConsumeResponse, CreateConsumerTransportRequest,
    CreateProducerTransportRequest, DtlsParameters, JoinResponse, ProduceRequest,
    ProduceResponse, PushEvent, RawEvent, RemoveRequest, ResumeRequest, RoomRequest,
    RtpCapabilities, RtpParameters, TransportParams,
};

use common::types::{ProducerId, RoomId, SocketId, TrackKind, TransportId, UserId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

/// The socket the client talks to the signaling server over.
///
/// Implementations deliver every server push on the broadcast channel
/// returned by `subscribe`.
#[async_trait::async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Identifier the server assigned to this connection.
    fn socket_id(&self) -> SocketId;

    /// Send a request and wait for its acknowledgement payload.
    ///
    /// Returns `SignalingError::Timeout` when the server never acknowledges.
    async fn request(&self, method: &str, payload: Value) -> Result<Value, SignalingError>;

    /// Send an event without waiting for an acknowledgement.
    async fn emit(&self, event: &str, payload: Value) -> Result<(), SignalingError>;

    /// Subscribe to server push events.
    fn subscribe(&self) -> broadcast::Receiver<RawEvent>;
}

/// Typed signaling client.
#[derive(Clone)]
pub struct SignalingClient {
    transport: Arc<dyn SignalingTransport>,
}

impl SignalingClient {
    /// Create a client over the given transport.
    #[must_use]
    pub fn new(transport: Arc<dyn SignalingTransport>) -> Self {
        Self { transport }
    }

    /// This connection's socket id.
    #[must_use]
    pub fn socket_id(&self) -> SocketId {
        self.transport.socket_id()
    }

    /// Subscribe to decoded push events.
    #[must_use]
    pub fn subscribe(&self) -> PushEventStream {
        PushEventStream {
            rx: self.transport.subscribe(),
        }
    }

    async fn call<Req, Resp>(&self, method: &'static str, body: &Req) -> Result<Resp, SignalingError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload =
            serde_json::to_value(body).map_err(|e| SignalingError::invalid(method, e))?;

        let start = Instant::now();
        let result = self.transport.request(method, payload).await.and_then(|value| {
            if let Some(message) = value.get("error").and_then(Value::as_str) {
                return Err(SignalingError::Rejected {
                    method: method.to_string(),
                    message: message.to_string(),
                });
            }
            serde_json::from_value(value).map_err(|e| SignalingError::invalid(method, e))
        });

        let status = match &result {
            Ok(_) => "success",
            Err(SignalingError::Timeout(_)) => "timeout",
            Err(_) => "error",
        };
        metrics::record_signaling_request(method, status, start.elapsed());

        if let Err(e) = &result {
            warn!(
                target: "client.signaling",
                method = method,
                error = %e,
                "Signaling request failed"
            );
        }
        result
    }

    async fn send<Req: Serialize + ?Sized>(
        &self,
        event: &'static str,
        body: &Req,
    ) -> Result<(), SignalingError> {
        let payload =
            serde_json::to_value(body).map_err(|e| SignalingError::invalid(event, e))?;
        debug!(target: "client.signaling", event = event, "Emitting signaling event");
        self.transport.emit(event, payload).await
    }

    /// Join a room. Returns the room's current producers and peers.
    ///
    /// # Errors
    ///
    /// Signaling failures, or `InvalidPayload` if the response carries
    /// empty identifiers.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn join(&self, room_id: &RoomId) -> Result<JoinResponse, SignalingError> {
        let response: JoinResponse = self.call("join", &RoomRequest { room_id }).await?;
        response
            .validate()
            .map_err(|e| SignalingError::invalid("join", e))?;
        Ok(response)
    }

    /// Fetch the router's RTP capabilities.
    pub async fn router_rtp_capabilities(
        &self,
        room_id: &RoomId,
    ) -> Result<RtpCapabilities, SignalingError> {
        self.call("getRouterRtpCapabilities", &RoomRequest { room_id })
            .await
    }

    /// Ask the server for a send transport.
    pub async fn create_producer_transport(
        &self,
        room_id: &RoomId,
        force_tcp: bool,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<TransportParams, SignalingError> {
        self.call(
            "createProducerTransport",
            &CreateProducerTransportRequest {
                force_tcp,
                rtp_capabilities,
                room_id,
            },
        )
        .await
    }

    /// Complete the DTLS handshake of the send transport.
    pub async fn connect_producer_transport(
        &self,
        dtls_parameters: &DtlsParameters,
    ) -> Result<(), SignalingError> {
        let _: Value = self
            .call(
                "connectProducerTransport",
                &ConnectProducerTransportRequest { dtls_parameters },
            )
            .await?;
        Ok(())
    }

    /// Announce a new local producer. Returns the server's producer id.
    pub async fn produce(
        &self,
        room_id: &RoomId,
        transport_id: &TransportId,
        kind: TrackKind,
        rtp_parameters: &RtpParameters,
        is_screen: bool,
    ) -> Result<ProducerId, SignalingError> {
        let response: ProduceResponse = self
            .call(
                "produce",
                &ProduceRequest {
                    transport_id,
                    kind,
                    rtp_parameters,
                    room_id,
                    is_screen,
                },
            )
            .await?;
        ProducerId::parse(response.id.as_str()).map_err(|e| SignalingError::invalid("produce", e))
    }

    /// Ask the server for a receive transport.
    pub async fn create_consumer_transport(
        &self,
        room_id: &RoomId,
        force_tcp: bool,
    ) -> Result<TransportParams, SignalingError> {
        self.call(
            "createConsumerTransport",
            &CreateConsumerTransportRequest { force_tcp, room_id },
        )
        .await
    }

    /// Complete the DTLS handshake of the receive transport.
    pub async fn connect_consumer_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: &DtlsParameters,
    ) -> Result<(), SignalingError> {
        let _: Value = self
            .call(
                "connectConsumerTransport",
                &ConnectConsumerTransportRequest {
                    transport_id,
                    dtls_parameters,
                },
            )
            .await?;
        Ok(())
    }

    /// Request a consumer for a remote producer.
    pub async fn consume(
        &self,
        room_id: &RoomId,
        producer_id: &ProducerId,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumeResponse, SignalingError> {
        let socket_id = self.transport.socket_id();
        self.call(
            "consume",
            &ConsumeRequest {
                rtp_capabilities,
                socket_id: &socket_id,
                room_id,
                producer_id,
            },
        )
        .await
    }

    /// Resume a paused server-side consumer.
    pub async fn resume(
        &self,
        room_id: &RoomId,
        producer_id: &ProducerId,
    ) -> Result<(), SignalingError> {
        let _: Value = self
            .call(
                "resume",
                &ResumeRequest {
                    producer_id,
                    meeting_id: room_id,
                },
            )
            .await?;
        Ok(())
    }

    /// Tell the server a local producer is gone.
    pub async fn remove(
        &self,
        room_id: &RoomId,
        producer_id: &ProducerId,
    ) -> Result<(), SignalingError> {
        let _: Value = self
            .call("remove", &RemoveRequest { producer_id, room_id })
            .await?;
        Ok(())
    }

    /// Leave the room.
    pub async fn leave(&self, room_id: &RoomId) -> Result<(), SignalingError> {
        let _: Value = self.call("leave", &RoomRequest { room_id }).await?;
        Ok(())
    }

    /// Invite a user to a 1:1 call in `room_id`.
    pub async fn send_call(&self, room_id: &RoomId, callee: &UserId) -> Result<(), SignalingError> {
        self.send("call", &CallSignal { room_id, callee }).await
    }

    /// Answer an inbound call.
    pub async fn send_answer(&self, room_id: &RoomId, accepted: bool) -> Result<(), SignalingError> {
        self.send("answer", &AnswerSignal { room_id, accepted })
            .await
    }

    /// Tell the other side the call is over.
    pub async fn send_close(&self, room_id: &RoomId) -> Result<(), SignalingError> {
        self.send("close", &RoomRequest { room_id }).await
    }
}

/// Decoded push events from the server.
pub struct PushEventStream {
    rx: broadcast::Receiver<RawEvent>,
}

impl PushEventStream {
    /// Next valid push event, or `None` once the transport is gone.
    ///
    /// Malformed events are logged and skipped. If the receiver lagged the
    /// skipped events are lost; the next producer-list event carries the
    /// full list, so reconciliation catches up.
    pub async fn next(&mut self) -> Option<PushEvent> {
        loop {
            match self.rx.recv().await {
                Ok(raw) => {
                    let name = raw.name.clone();
                    match PushEvent::decode(raw) {
                        Ok(event) => return Some(event),
                        Err(e) => {
                            metrics::record_push_event_rejected(&name);
                            warn!(
                                target: "client.signaling",
                                error = %e,
                                "Dropping malformed push event"
                            );
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        target: "client.signaling",
                        skipped = skipped,
                        "Push event receiver lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
