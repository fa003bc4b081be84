//! Transport manager.
//!
//! Owns at most one send and one receive transport. Each transport gets a
//! signal pump task that answers the SFU library's `connect`/`produce`
//! callbacks through signaling and forwards connection state changes to
//! the session as `TransportEvent`s.
//!
//! Reconnection is driven by the session: when a transport dies the session
//! asks `next_reconnect_delay` for the backoff, waits on its own timer and
//! then calls `reconnect`. Attempts are counted per direction and reset
//! once a transport reaches `connected`.

use crate::config::ReconnectPolicy;
use crate::errors::ClientError;
use crate::observability::metrics;
use crate::sfu::{ConnectionState, RecvTransport, SendTransport, SfuDevice, TransportSignal};
use crate::signaling::SignalingClient;

use common::types::{RoomId, TransportId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Media direction of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Send,
    Recv,
}

impl Direction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Send => "send",
            Direction::Recv => "recv",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a direction's transport is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportPhase {
    /// Never requested.
    None,
    /// Created, waiting for the first `connected`.
    Requested,
    Connected,
    /// Died; awaiting reconnection or teardown.
    Failed,
    Closed,
}

/// Connection state change of a managed transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub direction: Direction,
    pub transport_id: TransportId,
    pub state: ConnectionState,
}

struct Managed<T: ?Sized> {
    transport: Arc<T>,
    pump: JoinHandle<()>,
}

impl<T: ?Sized> Drop for Managed<T> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Per-direction bookkeeping.
struct Slot<T: ?Sized> {
    current: Option<Managed<T>>,
    phase: TransportPhase,
    failed_attempts: u32,
}

impl<T: ?Sized> Default for Slot<T> {
    fn default() -> Self {
        Self {
            current: None,
            phase: TransportPhase::None,
            failed_attempts: 0,
        }
    }
}

/// Creates, tracks and reconnects the session's two transports.
pub struct TransportManager {
    signaling: SignalingClient,
    device: Arc<dyn SfuDevice>,
    room_id: RoomId,
    force_tcp: bool,
    policy: ReconnectPolicy,
    events: mpsc::Sender<TransportEvent>,
    send: Slot<dyn SendTransport>,
    recv: Slot<dyn RecvTransport>,
}

impl TransportManager {
    #[must_use]
    pub fn new(
        signaling: SignalingClient,
        device: Arc<dyn SfuDevice>,
        room_id: RoomId,
        force_tcp: bool,
        policy: ReconnectPolicy,
        events: mpsc::Sender<TransportEvent>,
    ) -> Self {
        Self {
            signaling,
            device,
            room_id,
            force_tcp,
            policy,
            events,
            send: Slot::default(),
            recv: Slot::default(),
        }
    }

    /// Current send transport, if any.
    #[must_use]
    pub fn send_transport(&self) -> Option<Arc<dyn SendTransport>> {
        self.send.current.as_ref().map(|m| Arc::clone(&m.transport))
    }

    /// Current receive transport, if any.
    #[must_use]
    pub fn recv_transport(&self) -> Option<Arc<dyn RecvTransport>> {
        self.recv.current.as_ref().map(|m| Arc::clone(&m.transport))
    }

    #[must_use]
    pub fn phase(&self, direction: Direction) -> TransportPhase {
        match direction {
            Direction::Send => self.send.phase,
            Direction::Recv => self.recv.phase,
        }
    }

    /// Return the live send transport, creating it on first use.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the device or server refuses the transport,
    /// or a signaling error.
    #[instrument(skip_all, name = "client.transport.create_send", fields(room_id = %self.room_id))]
    pub async fn create_send_transport(&mut self) -> Result<Arc<dyn SendTransport>, ClientError> {
        if self.is_live(Direction::Send) {
            if let Some(existing) = &self.send.current {
                return Ok(Arc::clone(&existing.transport));
            }
        }

        let caps = self.device.rtp_capabilities()?;
        let params = self
            .signaling
            .create_producer_transport(&self.room_id, self.force_tcp, &caps)
            .await?;
        let binding = self.device.create_send_transport(&params)?;
        let transport_id = binding.transport.id();

        let pump = spawn_signal_pump(
            Direction::Send,
            transport_id.clone(),
            self.room_id.clone(),
            self.signaling.clone(),
            binding.signals,
            self.events.clone(),
        );

        if let Some(old) = self.send.current.take() {
            old.transport.close();
        }
        self.send.current = Some(Managed {
            transport: Arc::clone(&binding.transport),
            pump,
        });
        self.send.phase = TransportPhase::Requested;
        metrics::record_transport_created(Direction::Send);

        info!(
            target: "client.transport",
            direction = "send",
            transport_id = %transport_id,
            "Send transport created"
        );
        Ok(binding.transport)
    }

    /// Return the live receive transport, creating it on first use.
    ///
    /// # Errors
    ///
    /// As for `create_send_transport`.
    #[instrument(skip_all, name = "client.transport.create_recv", fields(room_id = %self.room_id))]
    pub async fn create_receive_transport(
        &mut self,
    ) -> Result<Arc<dyn RecvTransport>, ClientError> {
        if self.is_live(Direction::Recv) {
            if let Some(existing) = &self.recv.current {
                return Ok(Arc::clone(&existing.transport));
            }
        }

        let params = self
            .signaling
            .create_consumer_transport(&self.room_id, self.force_tcp)
            .await?;
        let binding = self.device.create_recv_transport(&params)?;
        let transport_id = binding.transport.id();

        let pump = spawn_signal_pump(
            Direction::Recv,
            transport_id.clone(),
            self.room_id.clone(),
            self.signaling.clone(),
            binding.signals,
            self.events.clone(),
        );

        if let Some(old) = self.recv.current.take() {
            old.transport.close();
        }
        self.recv.current = Some(Managed {
            transport: Arc::clone(&binding.transport),
            pump,
        });
        self.recv.phase = TransportPhase::Requested;
        metrics::record_transport_created(Direction::Recv);

        info!(
            target: "client.transport",
            direction = "recv",
            transport_id = %transport_id,
            "Receive transport created"
        );
        Ok(binding.transport)
    }

    /// Apply a connection state change.
    ///
    /// Returns the direction whose transport just died, if any. Events from
    /// replaced transports and repeated failures are ignored.
    pub fn on_event(&mut self, event: &TransportEvent) -> Option<Direction> {
        let (current_id, phase, failed_attempts) = match event.direction {
            Direction::Send => (
                self.send.current.as_ref().map(|m| m.transport.id()),
                &mut self.send.phase,
                &mut self.send.failed_attempts,
            ),
            Direction::Recv => (
                self.recv.current.as_ref().map(|m| m.transport.id()),
                &mut self.recv.phase,
                &mut self.recv.failed_attempts,
            ),
        };

        if current_id.as_ref() != Some(&event.transport_id) {
            debug!(
                target: "client.transport",
                direction = %event.direction,
                transport_id = %event.transport_id,
                state = %event.state,
                "Ignoring state change from stale transport"
            );
            return None;
        }

        match event.state {
            ConnectionState::Connected => {
                *phase = TransportPhase::Connected;
                *failed_attempts = 0;
                info!(
                    target: "client.transport",
                    direction = %event.direction,
                    transport_id = %event.transport_id,
                    "Transport connected"
                );
                None
            }
            state if state.is_dead() => {
                if matches!(*phase, TransportPhase::Failed | TransportPhase::Closed) {
                    return None;
                }
                *phase = TransportPhase::Failed;
                metrics::record_transport_failure(event.direction, state.as_str());
                warn!(
                    target: "client.transport",
                    direction = %event.direction,
                    transport_id = %event.transport_id,
                    state = %state,
                    "Transport lost"
                );
                Some(event.direction)
            }
            _ => None,
        }
    }

    /// Count a reconnection attempt and return how long to wait before it.
    ///
    /// # Errors
    ///
    /// `TransportFailure` when reconnection is disabled or the attempt
    /// budget for this direction is spent.
    pub fn next_reconnect_delay(&mut self, direction: Direction) -> Result<Duration, ClientError> {
        if !self.policy.enabled {
            return Err(ClientError::TransportFailure(format!(
                "{direction} transport lost and reconnection is disabled"
            )));
        }

        let slot_attempts = match direction {
            Direction::Send => &mut self.send.failed_attempts,
            Direction::Recv => &mut self.recv.failed_attempts,
        };
        if *slot_attempts >= self.policy.max_attempts {
            warn!(
                target: "client.transport",
                direction = %direction,
                attempts = *slot_attempts,
                "Reconnection attempts exhausted"
            );
            return Err(ClientError::TransportFailure(format!(
                "{direction} transport lost after {} reconnection attempts",
                *slot_attempts
            )));
        }

        *slot_attempts += 1;
        let attempt = *slot_attempts;
        let delay = self.policy.delay_after(attempt);
        metrics::record_reconnect_attempt(direction);
        info!(
            target: "client.transport",
            direction = %direction,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling transport reconnection"
        );
        Ok(delay)
    }

    /// Whether `direction` holds a transport that can carry media.
    #[must_use]
    pub fn is_live(&self, direction: Direction) -> bool {
        match direction {
            Direction::Send => self
                .send
                .current
                .as_ref()
                .is_some_and(|m| is_usable(self.send.phase) && !m.transport.is_closed()),
            Direction::Recv => self
                .recv
                .current
                .as_ref()
                .is_some_and(|m| is_usable(self.recv.phase) && !m.transport.is_closed()),
        }
    }

    /// Replace a dead transport with a fresh one. A live transport is kept.
    ///
    /// # Errors
    ///
    /// The creation error; the caller may schedule another attempt.
    #[instrument(skip_all, name = "client.transport.reconnect", fields(direction = %direction))]
    pub async fn reconnect(&mut self, direction: Direction) -> Result<(), ClientError> {
        if self.is_live(direction) {
            debug!(
                target: "client.transport",
                direction = %direction,
                "Transport already live, nothing to reconnect"
            );
            return Ok(());
        }
        self.close(direction);
        match direction {
            Direction::Send => self.create_send_transport().await.map(|_| ()),
            Direction::Recv => self.create_receive_transport().await.map(|_| ()),
        }
    }

    /// Close one direction's transport.
    pub fn close(&mut self, direction: Direction) {
        let closed = match direction {
            Direction::Send => close_slot(&mut self.send, |t| t.close()),
            Direction::Recv => close_slot(&mut self.recv, |t| t.close()),
        };
        if closed {
            debug!(target: "client.transport", direction = %direction, "Transport closed");
        }
    }

    /// Close both transports. Idempotent.
    pub fn close_all(&mut self) {
        self.close(Direction::Send);
        self.close(Direction::Recv);
    }
}

fn close_slot<T: ?Sized>(slot: &mut Slot<T>, close: impl FnOnce(&T)) -> bool {
    match slot.current.take() {
        Some(managed) => {
            close(managed.transport.as_ref());
            slot.phase = TransportPhase::Closed;
            true
        }
        None => false,
    }
}

fn is_usable(phase: TransportPhase) -> bool {
    matches!(phase, TransportPhase::Requested | TransportPhase::Connected)
}

/// Answer a transport's callbacks until its signal channel closes.
fn spawn_signal_pump(
    direction: Direction,
    transport_id: TransportId,
    room_id: RoomId,
    signaling: SignalingClient,
    mut signals: mpsc::Receiver<TransportSignal>,
    events: mpsc::Sender<TransportEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(signal) = signals.recv().await {
            match signal {
                TransportSignal::Connect {
                    dtls_parameters,
                    respond_to,
                } => {
                    let result = match direction {
                        Direction::Send => {
                            signaling
                                .connect_producer_transport(&dtls_parameters)
                                .await
                        }
                        Direction::Recv => {
                            signaling
                                .connect_consumer_transport(&transport_id, &dtls_parameters)
                                .await
                        }
                    };
                    debug!(
                        target: "client.transport",
                        direction = %direction,
                        transport_id = %transport_id,
                        ok = result.is_ok(),
                        "Transport connect forwarded"
                    );
                    let _ = respond_to.send(result.map_err(|e| e.to_string()));
                }
                TransportSignal::Produce {
                    kind,
                    rtp_parameters,
                    is_screen,
                    respond_to,
                } => {
                    let result = if direction == Direction::Send {
                        signaling
                            .produce(&room_id, &transport_id, kind, &rtp_parameters, is_screen)
                            .await
                            .map_err(|e| e.to_string())
                    } else {
                        Err("produce on a receive transport".to_string())
                    };
                    let _ = respond_to.send(result);
                }
                TransportSignal::ConnectionStateChange(state) => {
                    let event = TransportEvent {
                        direction,
                        transport_id: transport_id.clone(),
                        state,
                    };
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(
            target: "client.transport",
            direction = %direction,
            transport_id = %transport_id,
            "Signal pump exiting"
        );
    })
}
