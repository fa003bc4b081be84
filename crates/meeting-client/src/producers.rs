//! Local producers, at most one per media kind.
//!
//! Each kind has a slot that moves `Starting -> Active -> Stopping`. A start
//! or stop that finds the slot mid-transition is refused with `KindBusy`,
//! so two transitions of the same kind never overlap. Different kinds are
//! independent and may start concurrently.

use crate::errors::ClientError;
use crate::media::MediaStream;
use crate::observability::metrics;
use crate::sfu::{ProduceOptions, Producer, SendTransport};
use crate::signaling::SignalingClient;

use common::types::{MediaKind, ProducerId, RoomId};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Notification raised by a running producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerEvent {
    /// A producer went live.
    Started {
        kind: MediaKind,
        producer_id: ProducerId,
    },

    /// The producer's source track ended outside our control
    /// (device unplugged, screen share stopped from the OS).
    TrackEnded {
        kind: MediaKind,
        producer_id: ProducerId,
    },
}

struct ActiveProducer {
    producer: Arc<dyn Producer>,
    stream: MediaStream,
    watcher: JoinHandle<()>,
}

enum Slot {
    Starting,
    Active(ActiveProducer),
    Stopping,
}

/// The session's local producers.
pub struct ProducerSet {
    signaling: SignalingClient,
    room_id: RoomId,
    slots: Mutex<HashMap<MediaKind, Slot>>,
    events: mpsc::Sender<ProducerEvent>,
}

impl ProducerSet {
    #[must_use]
    pub fn new(
        signaling: SignalingClient,
        room_id: RoomId,
        events: mpsc::Sender<ProducerEvent>,
    ) -> Self {
        Self {
            signaling,
            room_id,
            slots: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Produce `stream`'s track of `kind` on `transport`.
    ///
    /// # Errors
    ///
    /// - `AlreadyActive` if `kind` is already produced
    /// - `KindBusy` if another transition of `kind` is in flight
    /// - `DeviceUnavailable` if the stream has no track of the right kind
    /// - `TransportFailure` if the SFU library refuses the producer
    #[instrument(skip_all, name = "client.producers.start", fields(kind = %kind))]
    pub async fn start(
        &self,
        transport: &Arc<dyn SendTransport>,
        kind: MediaKind,
        stream: MediaStream,
    ) -> Result<ProducerId, ClientError> {
        {
            let mut slots = self.slots.lock().await;
            match slots.get(&kind) {
                Some(Slot::Active(_)) => return Err(ClientError::AlreadyActive(kind)),
                Some(Slot::Starting | Slot::Stopping) => return Err(ClientError::KindBusy(kind)),
                None => {
                    slots.insert(kind, Slot::Starting);
                }
            }
        }

        let Some(track) = stream.track_of(kind.track_kind()).cloned() else {
            self.slots.lock().await.remove(&kind);
            return Err(ClientError::DeviceUnavailable(format!(
                "stream has no {} track",
                kind.track_kind()
            )));
        };

        let options = ProduceOptions {
            is_screen: kind.is_screen(),
        };
        let producer = match transport.produce(track.clone(), options).await {
            Ok(producer) => producer,
            Err(e) => {
                self.slots.lock().await.remove(&kind);
                warn!(target: "client.producers", kind = %kind, error = %e, "Produce failed");
                return Err(e.into());
            }
        };

        let producer_id = producer.id();
        let watcher = {
            let events = self.events.clone();
            let producer_id = producer_id.clone();
            tokio::spawn(async move {
                track.ended().await;
                let _ = events
                    .send(ProducerEvent::TrackEnded { kind, producer_id })
                    .await;
            })
        };

        self.slots.lock().await.insert(
            kind,
            Slot::Active(ActiveProducer {
                producer,
                stream,
                watcher,
            }),
        );
        metrics::set_producer_active(kind, true);
        // The slot is authoritative; a full channel only drops the notification
        let _ = self.events.try_send(ProducerEvent::Started {
            kind,
            producer_id: producer_id.clone(),
        });
        info!(
            target: "client.producers",
            kind = %kind,
            producer_id = %producer_id,
            "Producer started"
        );
        Ok(producer_id)
    }

    /// Stop the producer of `kind`.
    ///
    /// Returns `false` without contacting the server when nothing of that
    /// kind is produced. A failed `remove` request is logged; the local
    /// producer and its tracks are stopped regardless.
    ///
    /// # Errors
    ///
    /// `KindBusy` if a transition of `kind` is in flight.
    #[instrument(skip_all, name = "client.producers.stop", fields(kind = %kind))]
    pub async fn stop(&self, kind: MediaKind) -> Result<bool, ClientError> {
        let active = {
            let mut slots = self.slots.lock().await;
            match slots.remove(&kind) {
                None => {
                    debug!(target: "client.producers", kind = %kind, "Nothing to stop");
                    return Ok(false);
                }
                Some(Slot::Active(active)) => {
                    slots.insert(kind, Slot::Stopping);
                    active
                }
                Some(other) => {
                    slots.insert(kind, other);
                    return Err(ClientError::KindBusy(kind));
                }
            }
        };

        active.watcher.abort();
        let producer_id = active.producer.id();
        if let Err(e) = self.signaling.remove(&self.room_id, &producer_id).await {
            warn!(
                target: "client.producers",
                kind = %kind,
                producer_id = %producer_id,
                error = %e,
                "Failed to notify server of producer removal"
            );
        }
        active.producer.close();
        active.stream.stop();

        self.slots.lock().await.remove(&kind);
        metrics::set_producer_active(kind, false);
        info!(
            target: "client.producers",
            kind = %kind,
            producer_id = %producer_id,
            "Producer stopped"
        );
        Ok(true)
    }

    /// Stop every producer concurrently. Returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let results = join_all(MediaKind::ALL.map(|kind| self.stop(kind))).await;
        results
            .into_iter()
            .filter(|result| match result {
                Ok(stopped) => *stopped,
                Err(e) => {
                    warn!(target: "client.producers", error = %e, "Producer stop skipped");
                    false
                }
            })
            .count()
    }

    /// Drop every producer locally without telling the server, keeping the
    /// source streams live so they can be produced again on a new transport.
    pub async fn detach_all(&self) -> Vec<(MediaKind, MediaStream)> {
        let mut slots = self.slots.lock().await;
        let mut detached = Vec::new();
        for kind in MediaKind::ALL {
            if let Some(Slot::Active(active)) = slots.remove(&kind) {
                active.watcher.abort();
                active.producer.close();
                metrics::set_producer_active(kind, false);
                detached.push((kind, active.stream));
            }
        }
        if !detached.is_empty() {
            info!(
                target: "client.producers",
                count = detached.len(),
                "Producers detached from lost transport"
            );
        }
        detached
    }

    /// Kinds currently produced (audio, video, screen order).
    pub async fn active_kinds(&self) -> Vec<MediaKind> {
        let slots = self.slots.lock().await;
        MediaKind::ALL
            .into_iter()
            .filter(|kind| matches!(slots.get(kind), Some(Slot::Active(_))))
            .collect()
    }

    pub async fn is_active(&self, kind: MediaKind) -> bool {
        matches!(self.slots.lock().await.get(&kind), Some(Slot::Active(_)))
    }

    /// Server id of the producer of `kind`, if active.
    pub async fn producer_id(&self, kind: MediaKind) -> Option<ProducerId> {
        match self.slots.lock().await.get(&kind) {
            Some(Slot::Active(active)) => Some(active.producer.id()),
            _ => None,
        }
    }
}
