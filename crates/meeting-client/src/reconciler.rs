//! Consumer reconciliation.
//!
//! Every producer-list push event carries the room's complete list. The
//! reconciler diffs that list against the consumers it holds: consumers
//! whose producer is gone are closed, new producers are consumed
//! concurrently, and everything else is left alone. Running it twice with
//! the same list is a no-op.
//!
//! A producer that fails to consume is logged and skipped; it is retried on
//! the next list that still contains it.

use crate::errors::ClientError;
use crate::media::MediaTrack;
use crate::observability::metrics;
use crate::sfu::{ConsumeOptions, Consumer, RecvTransport};
use crate::signaling::messages::{RemoteProducer, RtpCapabilities};
use crate::signaling::SignalingClient;

use common::types::{MediaKind, ProducerId, RoomId, SocketId, UserId};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A remote participant's media as received locally.
#[derive(Debug, Clone)]
pub struct RemoteStream {
    pub producer_id: ProducerId,
    pub socket_id: SocketId,
    pub user_id: UserId,
    pub kind: MediaKind,
    pub track: MediaTrack,
}

impl RemoteStream {
    #[must_use]
    pub fn is_video(&self) -> bool {
        self.kind.is_video()
    }

    #[must_use]
    pub fn is_screen(&self) -> bool {
        self.kind.is_screen()
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<ProducerId>,
    pub closed: Vec<ProducerId>,
    pub failed: Vec<ProducerId>,
}

impl ReconcileReport {
    /// Whether the pass changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.closed.is_empty() && self.failed.is_empty()
    }
}

struct ConsumerEntry {
    consumer: Arc<dyn Consumer>,
    stream: RemoteStream,
}

/// Keeps the session's consumers in step with the room's producer list.
pub struct ConsumerReconciler {
    signaling: SignalingClient,
    room_id: RoomId,
    local_socket: SocketId,
    consumers: BTreeMap<ProducerId, ConsumerEntry>,
    last_producers: Vec<RemoteProducer>,
}

impl ConsumerReconciler {
    #[must_use]
    pub fn new(signaling: SignalingClient, room_id: RoomId) -> Self {
        let local_socket = signaling.socket_id();
        Self {
            signaling,
            room_id,
            local_socket,
            consumers: BTreeMap::new(),
            last_producers: Vec::new(),
        }
    }

    /// Bring the consumer set in line with `producers`.
    ///
    /// Producers of other rooms and of this connection are ignored, as are
    /// duplicate entries.
    #[instrument(skip_all, name = "client.reconciler.reconcile", fields(room_id = %self.room_id, listed = producers.len()))]
    pub async fn reconcile(
        &mut self,
        transport: &Arc<dyn RecvTransport>,
        rtp_capabilities: &RtpCapabilities,
        producers: &[RemoteProducer],
    ) -> ReconcileReport {
        self.last_producers = producers.to_vec();

        let desired: BTreeMap<&ProducerId, &RemoteProducer> = producers
            .iter()
            .filter(|p| p.room_id == self.room_id && p.socket_id != self.local_socket)
            .map(|p| (&p.producer_id, p))
            .collect();

        let mut report = ReconcileReport::default();

        let stale: Vec<ProducerId> = self
            .consumers
            .keys()
            .filter(|id| !desired.contains_key(id))
            .cloned()
            .collect();
        for producer_id in stale {
            if let Some(entry) = self.consumers.remove(&producer_id) {
                entry.consumer.close();
                metrics::record_consumer_closed(entry.stream.kind);
                debug!(
                    target: "client.reconciler",
                    producer_id = %producer_id,
                    kind = %entry.stream.kind,
                    "Consumer closed"
                );
                report.closed.push(producer_id);
            }
        }

        let to_create: Vec<&RemoteProducer> = desired
            .iter()
            .filter(|(id, _)| !self.consumers.contains_key(**id))
            .map(|(_, p)| *p)
            .collect();

        let results = join_all(to_create.into_iter().map(|producer| {
            consume_one(
                &self.signaling,
                &self.room_id,
                transport,
                rtp_capabilities,
                producer,
            )
        }))
        .await;

        for result in results {
            match result {
                Ok(entry) => {
                    metrics::record_consumer_created(entry.stream.kind);
                    report.created.push(entry.stream.producer_id.clone());
                    self.consumers
                        .insert(entry.stream.producer_id.clone(), entry);
                }
                Err(ClientError::ConsumeFailure {
                    producer_id,
                    reason,
                }) => {
                    metrics::record_consume_failure();
                    warn!(
                        target: "client.reconciler",
                        producer_id = %producer_id,
                        reason = %reason,
                        "Skipping producer that failed to consume"
                    );
                    report.failed.push(producer_id);
                }
                Err(e) => {
                    metrics::record_consume_failure();
                    warn!(target: "client.reconciler", error = %e, "Consume failed");
                }
            }
        }

        metrics::set_consumers_active(self.consumers.len());
        if !report.is_noop() {
            info!(
                target: "client.reconciler",
                created = report.created.len(),
                closed = report.closed.len(),
                failed = report.failed.len(),
                active = self.consumers.len(),
                "Consumers reconciled"
            );
        }
        report
    }

    /// Remember `producers` without consuming, while no receive transport
    /// is usable. The next `resync` applies them.
    pub fn defer(&mut self, producers: &[RemoteProducer]) {
        debug!(
            target: "client.reconciler",
            listed = producers.len(),
            "Deferring reconciliation until the receive transport is back"
        );
        self.last_producers = producers.to_vec();
    }

    /// Re-run the last list, e.g. after the receive transport was replaced.
    pub async fn resync(
        &mut self,
        transport: &Arc<dyn RecvTransport>,
        rtp_capabilities: &RtpCapabilities,
    ) -> ReconcileReport {
        let producers = std::mem::take(&mut self.last_producers);
        self.reconcile(transport, rtp_capabilities, &producers).await
    }

    /// Close every consumer. Returns how many were open.
    pub fn close_all(&mut self) -> usize {
        let count = self.consumers.len();
        for (_, entry) in std::mem::take(&mut self.consumers) {
            entry.consumer.close();
            metrics::record_consumer_closed(entry.stream.kind);
        }
        metrics::set_consumers_active(0);
        if count > 0 {
            debug!(target: "client.reconciler", count, "Closed all consumers");
        }
        count
    }

    /// Received streams, ordered by producer id.
    #[must_use]
    pub fn streams(&self) -> Vec<RemoteStream> {
        self.consumers.values().map(|e| e.stream.clone()).collect()
    }

    /// Producer ids currently consumed.
    #[must_use]
    pub fn consumed(&self) -> BTreeSet<ProducerId> {
        self.consumers.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}

async fn consume_one(
    signaling: &SignalingClient,
    room_id: &RoomId,
    transport: &Arc<dyn RecvTransport>,
    rtp_capabilities: &RtpCapabilities,
    producer: &RemoteProducer,
) -> Result<ConsumerEntry, ClientError> {
    let failure = |reason: String| ClientError::ConsumeFailure {
        producer_id: producer.producer_id.clone(),
        reason,
    };

    let response = signaling
        .consume(room_id, &producer.producer_id, rtp_capabilities)
        .await
        .map_err(|e| failure(e.to_string()))?;

    if response.producer_id != producer.producer_id {
        return Err(failure(format!(
            "server answered for producer {}",
            response.producer_id
        )));
    }
    if response.kind != producer.kind.track_kind() {
        return Err(failure(format!(
            "expected {} track, server offered {}",
            producer.kind.track_kind(),
            response.kind
        )));
    }

    let consumer = transport
        .consume(ConsumeOptions {
            id: response.id,
            producer_id: response.producer_id,
            kind: response.kind,
            rtp_parameters: response.rtp_parameters,
        })
        .await
        .map_err(|e| failure(e.to_string()))?;

    if let Err(e) = signaling.resume(room_id, &producer.producer_id).await {
        consumer.close();
        return Err(failure(e.to_string()));
    }

    let stream = RemoteStream {
        producer_id: producer.producer_id.clone(),
        socket_id: producer.socket_id.clone(),
        user_id: producer.user_id.clone(),
        kind: producer.kind,
        track: consumer.track(),
    };
    Ok(ConsumerEntry { consumer, stream })
}
