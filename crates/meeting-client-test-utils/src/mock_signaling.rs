//! Mock signaling server.
//!
//! Answers every request the client makes with a plausible default, records
//! what was sent, and lets tests script failures, hold requests open and
//! push server events.
//!
//! # Example
//!
//! ```rust,ignore
//! use meeting_client_test_utils::MockSignaling;
//!
//! let signaling = MockSignaling::builder()
//!     .socket_id("sock-local")
//!     .join_producers(vec![remote_producer("p1", "sock-b", "bob", MediaKind::Audio, "room-1")])
//!     .build();
//!
//! signaling.fail_next("createProducerTransport", SignalingError::Timeout("ack".into()));
//! ```

use common::types::{ProducerId, SocketId, TrackKind};
use meeting_client::errors::SignalingError;
use meeting_client::signaling::messages::{RawEvent, RemoteProducer, UserInfo};
use meeting_client::signaling::SignalingTransport;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Notify};

/// A request or emitted event as the mock saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub payload: Value,
}

#[derive(Default)]
struct State {
    requests: Vec<RecordedCall>,
    emitted: Vec<RecordedCall>,
    failures: HashMap<String, VecDeque<SignalingError>>,
    sticky_failures: HashMap<String, SignalingError>,
    consume_failures: HashSet<ProducerId>,
    producer_kinds: HashMap<ProducerId, TrackKind>,
    gates: HashMap<String, Arc<Notify>>,
    join_producers: Vec<RemoteProducer>,
    join_peers: HashMap<SocketId, UserInfo>,
    next_id: u64,
}

/// Scripted signaling server.
pub struct MockSignaling {
    socket_id: SocketId,
    state: Mutex<State>,
    events: Mutex<Option<broadcast::Sender<RawEvent>>>,
}

impl MockSignaling {
    #[must_use]
    pub fn builder() -> MockSignalingBuilder {
        MockSignalingBuilder::default()
    }

    /// Fail the next `method` request with `error`.
    pub fn fail_next(&self, method: &str, error: SignalingError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(method.to_string())
            .or_default()
            .push_back(error);
    }

    /// Fail every `method` request with `error` until `clear_failures`.
    pub fn fail_always(&self, method: &str, error: SignalingError) {
        self.state
            .lock()
            .unwrap()
            .sticky_failures
            .insert(method.to_string(), error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.failures.clear();
        state.sticky_failures.clear();
        state.consume_failures.clear();
    }

    /// Reject `consume` for one producer.
    pub fn fail_consume_for(&self, producer_id: &str) {
        self.state
            .lock()
            .unwrap()
            .consume_failures
            .insert(ProducerId::from(producer_id));
    }

    /// Make `consume` answer with the producer's real kind.
    pub fn register_producers(&self, producers: &[RemoteProducer]) {
        let mut state = self.state.lock().unwrap();
        for producer in producers {
            state
                .producer_kinds
                .insert(producer.producer_id.clone(), producer.kind.track_kind());
        }
    }

    /// Hold `method` requests until the returned `Notify` is signalled
    /// (one permit per request).
    pub fn gate(&self, method: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state
            .lock()
            .unwrap()
            .gates
            .insert(method.to_string(), Arc::clone(&gate));
        gate
    }

    /// Deliver a push event to every subscriber.
    pub fn push(&self, event: RawEvent) {
        if let Some(sender) = self.events.lock().unwrap().as_ref() {
            if let Some(producers) = event.payload.get("producers") {
                if let Ok(list) = serde_json::from_value::<Vec<RemoteProducer>>(producers.clone()) {
                    self.register_producers(&list);
                }
            }
            let _ = sender.send(event);
        }
    }

    /// Drop the push channel; subscribers see it close.
    pub fn disconnect(&self) {
        self.events.lock().unwrap().take();
    }

    /// Every request, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Payloads of every `method` request, in order.
    #[must_use]
    pub fn requests_for(&self, method: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|call| call.method == method)
            .map(|call| call.payload.clone())
            .collect()
    }

    /// Number of `method` requests.
    #[must_use]
    pub fn count(&self, method: &str) -> usize {
        self.requests_for(method).len()
    }

    /// Request method names, in order.
    #[must_use]
    pub fn methods(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .map(|call| call.method.clone())
            .collect()
    }

    /// Payloads of every emitted `event`, in order.
    #[must_use]
    pub fn emitted(&self, event: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .emitted
            .iter()
            .filter(|call| call.method == event)
            .map(|call| call.payload.clone())
            .collect()
    }

    /// Producer ids the client asked to consume, in order.
    #[must_use]
    pub fn consumed_producers(&self) -> Vec<String> {
        self.requests_for("consume")
            .iter()
            .filter_map(|payload| payload.get("producerID").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    fn respond(&self, method: &str, payload: &Value) -> Result<Value, SignalingError> {
        let mut state = self.state.lock().unwrap();

        if let Some(error) = state
            .failures
            .get_mut(method)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        if let Some(error) = state.sticky_failures.get(method) {
            return Err(error.clone());
        }

        state.next_id += 1;
        let n = state.next_id;

        let response = match method {
            "join" => json!({
                "producers": state.join_producers,
                "consumers": [],
                "peers": state.join_peers,
            }),
            "getRouterRtpCapabilities" => json!({ "codecs": [{ "mimeType": "audio/opus" }] }),
            "createProducerTransport" => transport_params(&format!("send-transport-{n}")),
            "createConsumerTransport" => transport_params(&format!("recv-transport-{n}")),
            "produce" => {
                let kind = payload.get("kind").and_then(Value::as_str).unwrap_or("media");
                json!({ "id": format!("local-{kind}-{n}") })
            }
            "consume" => {
                let producer_id = payload
                    .get("producerID")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let producer = ProducerId::from(producer_id.as_str());
                if state.consume_failures.contains(&producer) {
                    return Err(SignalingError::Rejected {
                        method: method.to_string(),
                        message: format!("cannot consume {producer_id}"),
                    });
                }
                let kind = state
                    .producer_kinds
                    .get(&producer)
                    .copied()
                    .unwrap_or(TrackKind::Video);
                json!({
                    "id": format!("consumer-{n}"),
                    "producerId": producer_id,
                    "kind": kind.as_str(),
                    "rtpParameters": { "codecs": [] },
                })
            }
            "connectProducerTransport" | "connectConsumerTransport" | "resume" | "remove"
            | "leave" => json!({}),
            other => {
                return Err(SignalingError::Rejected {
                    method: other.to_string(),
                    message: "unknown method".to_string(),
                })
            }
        };
        Ok(response)
    }
}

#[async_trait::async_trait]
impl SignalingTransport for MockSignaling {
    fn socket_id(&self) -> SocketId {
        self.socket_id.clone()
    }

    async fn request(&self, method: &str, payload: Value) -> Result<Value, SignalingError> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(RecordedCall {
                method: method.to_string(),
                payload: payload.clone(),
            });
            state.gates.get(method).cloned()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.respond(method, &payload)
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), SignalingError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state
            .failures
            .get_mut(event)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        state.emitted.push(RecordedCall {
            method: event.to_string(),
            payload,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
        match self.events.lock().unwrap().as_ref() {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }
}

fn transport_params(id: &str) -> Value {
    json!({
        "id": id,
        "iceParameters": { "usernameFragment": "frag", "password": "secret" },
        "iceCandidates": [],
        "dtlsParameters": { "role": "auto", "fingerprints": [] },
    })
}

/// Builder for `MockSignaling`.
#[derive(Default)]
pub struct MockSignalingBuilder {
    socket_id: Option<String>,
    join_producers: Vec<RemoteProducer>,
    join_peers: HashMap<SocketId, UserInfo>,
}

impl MockSignalingBuilder {
    /// This connection's socket id (default `sock-local`).
    #[must_use]
    pub fn socket_id(mut self, socket_id: impl Into<String>) -> Self {
        self.socket_id = Some(socket_id.into());
        self
    }

    /// Producers returned by `join`.
    #[must_use]
    pub fn join_producers(mut self, producers: Vec<RemoteProducer>) -> Self {
        self.join_producers = producers;
        self
    }

    /// Add a peer to the `join` response.
    #[must_use]
    pub fn join_peer(mut self, socket_id: &str, user_id: &str, name: &str) -> Self {
        self.join_peers.insert(
            SocketId::from(socket_id),
            UserInfo {
                user_id: user_id.into(),
                display_name: Some(name.to_string()),
            },
        );
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<MockSignaling> {
        let (events, _) = broadcast::channel(64);
        let mut state = State {
            join_producers: self.join_producers,
            join_peers: self.join_peers,
            ..State::default()
        };
        for producer in &state.join_producers {
            state
                .producer_kinds
                .insert(producer.producer_id.clone(), producer.kind.track_kind());
        }
        Arc::new(MockSignaling {
            socket_id: SocketId::from(self.socket_id.as_deref().unwrap_or("sock-local")),
            state: Mutex::new(state),
            events: Mutex::new(Some(events)),
        })
    }
}
