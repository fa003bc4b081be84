//! `SessionActor` - owns one meeting participation.
//!
//! The actor is the only owner of the session's media, transports,
//! producers and consumers. Commands from `SessionHandle`, transport and
//! producer events, server push events and timers are all processed
//! serially in `run`, so a close can never run twice: the second request
//! finds the session already `closing`/`closed` and returns.
//!
//! # Join sequence
//!
//! 1. Acquire the microphone (fatal on failure) and, when configured, the
//!    camera (a missing camera downgrades to audio only)
//! 2. `join`, router capabilities, device load
//! 3. Send and receive transports
//! 4. Default producers, started concurrently
//! 5. First reconciliation against the join response
//!
//! Any failure tears down whatever was acquired and ends in `closed`.
//!
//! # Teardown order
//!
//! Producers (in parallel), consumers, every acquired media track,
//! transports, then `leave`. Tracks are stopped even when a producer stop
//! failed.

use super::context::SessionContext;
use super::messages::{CloseReason, SessionMessage, SessionSnapshot, SessionState};
use crate::errors::{ClientError, MediaError};
use crate::layout::{LayoutMode, PeerDirectory, StreamLayoutEngine};
use crate::media::{MediaAcquisition, MediaStream};
use crate::observability::metrics;
use crate::producers::{ProducerEvent, ProducerSet};
use crate::reconciler::ConsumerReconciler;
use crate::signaling::messages::{PushEvent, RemoteProducer, RtpCapabilities};
use crate::signaling::PushEventStream;
use crate::transport::{Direction, TransportEvent, TransportManager, TransportPhase};

use chrono::{DateTime, Utc};
use common::types::{MediaKind, ProducerId, RoomId, SocketId, UserId};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 64;

/// Buffer for transport and producer event channels.
const EVENT_CHANNEL_BUFFER: usize = 32;

/// Handle to a `SessionActor`.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| ClientError::SessionEnded)?;
        rx.await.map_err(|_| ClientError::SessionEnded)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Join a scheduled meeting. Resolves once in-call.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless idle. Any join failure is returned after the
    /// session has been torn down and closed.
    pub async fn join(&self, room_id: RoomId) -> Result<(), ClientError> {
        self.request(|respond_to| SessionMessage::Join {
            room_id,
            respond_to,
        })
        .await?
    }

    /// Ring `callee` for a 1:1 call in `room_id`.
    pub async fn call(&self, room_id: RoomId, callee: UserId) -> Result<(), ClientError> {
        self.request(|respond_to| SessionMessage::Call {
            room_id,
            callee,
            respond_to,
        })
        .await?
    }

    /// Accept the ringing inbound call. Resolves once in-call.
    pub async fn accept(&self) -> Result<(), ClientError> {
        self.request(|respond_to| SessionMessage::Accept { respond_to })
            .await?
    }

    /// Decline the ringing inbound call.
    pub async fn decline(&self) -> Result<(), ClientError> {
        self.request(|respond_to| SessionMessage::Decline { respond_to })
            .await?
    }

    /// End the call or stop ringing. Succeeds if the session already ended.
    pub async fn hangup(&self) -> Result<(), ClientError> {
        match self
            .request(|respond_to| SessionMessage::Hangup { respond_to })
            .await
        {
            Ok(result) => result,
            Err(ClientError::SessionEnded) if self.state().is_closed() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Acquire and produce a local source.
    pub async fn start_media(&self, kind: MediaKind) -> Result<ProducerId, ClientError> {
        self.request(|respond_to| SessionMessage::StartMedia { kind, respond_to })
            .await?
    }

    /// Stop a local source. `Ok(false)` if it was not active.
    pub async fn stop_media(&self, kind: MediaKind) -> Result<bool, ClientError> {
        self.request(|respond_to| SessionMessage::StopMedia { kind, respond_to })
            .await?
    }

    /// Flip a local source. Returns whether it is now active.
    pub async fn toggle_media(&self, kind: MediaKind) -> Result<bool, ClientError> {
        self.request(|respond_to| SessionMessage::ToggleMedia { kind, respond_to })
            .await?
    }

    pub async fn set_grid_mode(&self, enabled: bool) -> Result<(), ClientError> {
        self.request(|respond_to| SessionMessage::SetGridMode {
            enabled,
            respond_to,
        })
        .await
    }

    pub async fn select_main(&self, socket_id: Option<SocketId>) -> Result<(), ClientError> {
        self.request(|respond_to| SessionMessage::SelectMain {
            socket_id,
            respond_to,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, ClientError> {
        self.request(|respond_to| SessionMessage::GetSnapshot { respond_to })
            .await
    }

    /// Wait until the session is closed and return why.
    pub async fn closed(&self) -> Result<CloseReason, ClientError> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(SessionState::is_closed)
            .await
            .map_err(|_| ClientError::SessionEnded)?;
        match &*state {
            SessionState::Closed { reason } => Ok(reason.clone()),
            _ => Err(ClientError::SessionEnded),
        }
    }

    /// Cancel the session; it tears down and closes.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Per-room resources, created on entering `joining` and released by
/// teardown.
struct ActiveCall {
    room_id: RoomId,
    /// Entered through ringing; the other side is told when we leave.
    direct: bool,
    /// `join` succeeded, so `leave` is owed.
    joined: bool,
    media: MediaAcquisition,
    transports: TransportManager,
    producers: ProducerSet,
    reconciler: ConsumerReconciler,
    peers: PeerDirectory,
    rtp_capabilities: Option<RtpCapabilities>,
    /// Sources whose producers died with the send transport.
    pending_reproduce: Vec<(MediaKind, MediaStream)>,
    in_call_since: Option<DateTime<Utc>>,
}

impl ActiveCall {
    async fn establish(&mut self, context: &SessionContext) -> Result<(), ClientError> {
        let signaling = context.signaling();

        let audio = self.media.get_audio().await?;
        let video = if context.config().start_video_on_join {
            match self.media.get_video().await {
                Ok(stream) => Some(stream),
                Err(MediaError::DeviceUnavailable(reason)) => {
                    warn!(
                        target: "client.session",
                        room_id = %self.room_id,
                        reason = %reason,
                        "No camera available, joining with audio only"
                    );
                    None
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            None
        };

        let joined = signaling.join(&self.room_id).await?;
        self.joined = true;

        let router_capabilities = signaling.router_rtp_capabilities(&self.room_id).await?;
        context.device().load(&router_capabilities).await?;

        let send = self.transports.create_send_transport().await?;
        let recv = self.transports.create_receive_transport().await?;

        let producers = &self.producers;
        let (audio_started, video_started) = tokio::join!(
            producers.start(&send, MediaKind::Audio, audio),
            async {
                match video {
                    Some(stream) => producers
                        .start(&send, MediaKind::Video, stream)
                        .await
                        .map(Some),
                    None => Ok(None),
                }
            }
        );
        audio_started?;
        video_started?;

        self.peers.seed(&joined.peers);
        let capabilities = context.device().rtp_capabilities()?;
        let report = self
            .reconciler
            .reconcile(&recv, &capabilities, &joined.producers)
            .await;
        self.rtp_capabilities = Some(capabilities);

        debug!(
            target: "client.session",
            room_id = %self.room_id,
            consumers = report.created.len(),
            skipped = report.failed.len(),
            peers = self.peers.len(),
            "Initial reconciliation complete"
        );
        Ok(())
    }
}

/// The session actor.
pub struct SessionActor {
    context: SessionContext,
    receiver: mpsc::Receiver<SessionMessage>,
    cancel_token: CancellationToken,
    state: watch::Sender<SessionState>,
    push: PushEventStream,
    push_closed: bool,
    transport_tx: mpsc::Sender<TransportEvent>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    producer_tx: mpsc::Sender<ProducerEvent>,
    producer_rx: mpsc::Receiver<ProducerEvent>,
    layout: StreamLayoutEngine,
    call: Option<ActiveCall>,
    ring_deadline: Option<Instant>,
    reconnect_send_at: Option<Instant>,
    reconnect_recv_at: Option<Instant>,
}

impl SessionActor {
    /// Spawn a session in `idle`.
    ///
    /// Push events are subscribed before this returns, so none sent after
    /// the call is missed.
    pub fn spawn(
        context: SessionContext,
        cancel_token: CancellationToken,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (transport_tx, transport_rx) = mpsc::channel(EVENT_CHANNEL_BUFFER);
        let (producer_tx, producer_rx) = mpsc::channel(EVENT_CHANNEL_BUFFER);

        let actor = Self {
            push: context.signaling().subscribe(),
            layout: context.layout_engine(),
            context,
            receiver,
            cancel_token: cancel_token.clone(),
            state: state_tx,
            push_closed: false,
            transport_tx,
            transport_rx,
            producer_tx,
            producer_rx,
            call: None,
            ring_deadline: None,
            reconnect_send_at: None,
            reconnect_recv_at: None,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionHandle {
            sender,
            cancel_token,
            state: state_rx,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "client.session", fields(socket_id = %self.context.signaling().socket_id()))]
    async fn run(mut self) {
        info!(target: "client.session", "Session started");

        loop {
            if self.current().is_closed() {
                break;
            }

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "client.session", "Session received cancellation signal");
                    self.close(CloseReason::Cancelled).await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(target: "client.session", "All session handles dropped");
                            self.close(CloseReason::Cancelled).await;
                            break;
                        }
                    }
                }

                Some(event) = self.transport_rx.recv() => {
                    self.handle_transport_event(event).await;
                }

                Some(event) = self.producer_rx.recv() => {
                    self.handle_producer_event(event).await;
                }

                event = self.push.next(), if !self.push_closed => {
                    match event {
                        Some(event) => self.handle_push(event).await,
                        None => {
                            self.push_closed = true;
                            warn!(target: "client.session", "Signaling channel closed");
                            self.close(CloseReason::Fatal("signaling channel closed".to_string()))
                                .await;
                        }
                    }
                }

                () = wait_until(self.ring_deadline), if self.ring_deadline.is_some() => {
                    self.handle_ring_timeout().await;
                }

                () = wait_until(self.reconnect_send_at), if self.reconnect_send_at.is_some() => {
                    self.reconnect_send_at = None;
                    self.attempt_reconnect(Direction::Send).await;
                }

                () = wait_until(self.reconnect_recv_at), if self.reconnect_recv_at.is_some() => {
                    self.reconnect_recv_at = None;
                    self.attempt_reconnect(Direction::Recv).await;
                }
            }
        }

        info!(
            target: "client.session",
            state = %self.current(),
            "Session stopped"
        );
    }

    fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }

    fn transition(&mut self, next: SessionState) {
        let current = self.current();
        if !current.can_transition_to(&next) {
            error!(
                target: "client.session",
                from = %current,
                to = %next,
                "Rejected invalid session transition"
            );
            return;
        }
        info!(
            target: "client.session",
            from = %current,
            to = %next,
            room_id = next.room_id().map(RoomId::as_str),
            "Session state changed"
        );
        metrics::record_session_transition(next.name());
        self.state.send_replace(next);
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Join {
                room_id,
                respond_to,
            } => {
                let result = match self.current() {
                    SessionState::Idle => self.enter_call(room_id, false).await,
                    state => Err(invalid_state("join", &state)),
                };
                let _ = respond_to.send(result);
            }
            SessionMessage::Call {
                room_id,
                callee,
                respond_to,
            } => {
                let result = self.start_ringing(room_id, callee).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::Accept { respond_to } => {
                let result = self.accept().await;
                let _ = respond_to.send(result);
            }
            SessionMessage::Decline { respond_to } => {
                let result = match self.current() {
                    SessionState::RingingIn { room_id, .. } => {
                        self.send_answer(&room_id, false).await;
                        self.transition(SessionState::Idle);
                        Ok(())
                    }
                    state => Err(invalid_state("decline", &state)),
                };
                let _ = respond_to.send(result);
            }
            SessionMessage::Hangup { respond_to } => {
                self.hangup().await;
                let _ = respond_to.send(Ok(()));
            }
            SessionMessage::StartMedia { kind, respond_to } => {
                let result = self.start_media(kind).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::StopMedia { kind, respond_to } => {
                let result = self.stop_media(kind).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::ToggleMedia { kind, respond_to } => {
                let active = match &self.call {
                    Some(call) => call.producers.is_active(kind).await,
                    None => false,
                };
                let result = if active {
                    self.stop_media(kind).await.map(|_| false)
                } else {
                    self.start_media(kind).await.map(|_| true)
                };
                let _ = respond_to.send(result);
            }
            SessionMessage::SetGridMode {
                enabled,
                respond_to,
            } => {
                self.layout.set_mode(if enabled {
                    LayoutMode::Grid
                } else {
                    LayoutMode::Focus
                });
                let _ = respond_to.send(());
            }
            SessionMessage::SelectMain {
                socket_id,
                respond_to,
            } => {
                self.layout.select_main(socket_id);
                let _ = respond_to.send(());
            }
            SessionMessage::GetSnapshot { respond_to } => {
                let snapshot = self.snapshot().await;
                let _ = respond_to.send(snapshot);
            }
        }
    }

    /// `joining` → `in-call`, or `closed` on failure.
    #[instrument(skip_all, name = "client.session.join", fields(room_id = %room_id, direct))]
    async fn enter_call(&mut self, room_id: RoomId, direct: bool) -> Result<(), ClientError> {
        self.transition(SessionState::Joining {
            room_id: room_id.clone(),
        });
        let started = Instant::now();

        let mut call = ActiveCall {
            room_id: room_id.clone(),
            direct,
            joined: false,
            media: self.context.media_acquisition(),
            transports: self
                .context
                .transport_manager(room_id.clone(), self.transport_tx.clone()),
            producers: self
                .context
                .producer_set(room_id.clone(), self.producer_tx.clone()),
            reconciler: self.context.reconciler(room_id.clone()),
            peers: PeerDirectory::new(),
            rtp_capabilities: None,
            pending_reproduce: Vec::new(),
            in_call_since: None,
        };
        let result = call.establish(&self.context).await;
        self.call = Some(call);

        match result {
            Ok(()) => {
                if let Some(call) = self.call.as_mut() {
                    call.in_call_since = Some(Utc::now());
                }
                metrics::record_join_duration("success", started.elapsed());
                self.transition(SessionState::InCall { room_id });
                Ok(())
            }
            Err(e) => {
                metrics::record_join_duration("error", started.elapsed());
                error!(
                    target: "client.session",
                    room_id = %room_id,
                    error = %e,
                    category = e.category(),
                    "Join failed"
                );
                self.close(CloseReason::Fatal(e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn start_ringing(&mut self, room_id: RoomId, callee: UserId) -> Result<(), ClientError> {
        let state = self.current();
        if state != SessionState::Idle {
            return Err(invalid_state("call", &state));
        }
        self.context.signaling().send_call(&room_id, &callee).await?;
        self.ring_deadline = Some(Instant::now() + self.context.config().ring_timeout);
        self.transition(SessionState::RingingOut { room_id, callee });
        Ok(())
    }

    async fn accept(&mut self) -> Result<(), ClientError> {
        let state = self.current();
        let SessionState::RingingIn { room_id, .. } = state else {
            return Err(invalid_state("accept", &state));
        };
        self.context.signaling().send_answer(&room_id, true).await?;
        self.enter_call(room_id, true).await
    }

    async fn hangup(&mut self) {
        match self.current() {
            SessionState::InCall { .. } => self.close(CloseReason::Hangup).await,
            SessionState::RingingOut { room_id, .. } => {
                self.ring_deadline = None;
                self.send_close(&room_id).await;
                self.transition(SessionState::Idle);
            }
            SessionState::RingingIn { room_id, .. } => {
                self.send_answer(&room_id, false).await;
                self.transition(SessionState::Idle);
            }
            state => {
                debug!(target: "client.session", state = %state, "Nothing to hang up");
            }
        }
    }

    /// Close the session. A close already in progress or done is a no-op.
    ///
    /// A ringing peer is told the call is off before the session closes.
    async fn close(&mut self, reason: CloseReason) {
        let state = self.current();
        match &state {
            SessionState::Closing { .. } | SessionState::Closed { .. } => {
                debug!(target: "client.session", state = %state, "Close already in progress");
                return;
            }
            SessionState::InCall { room_id } => {
                self.transition(SessionState::Closing {
                    room_id: room_id.clone(),
                });
            }
            SessionState::RingingOut { room_id, .. } => self.send_close(room_id).await,
            SessionState::RingingIn { room_id, .. } => self.send_answer(room_id, false).await,
            SessionState::Idle | SessionState::Joining { .. } => {}
        }

        self.teardown(&reason).await;
        self.transition(SessionState::Closed { reason });
    }

    #[instrument(skip_all, name = "client.session.teardown")]
    async fn teardown(&mut self, reason: &CloseReason) {
        self.ring_deadline = None;
        self.reconnect_send_at = None;
        self.reconnect_recv_at = None;

        let Some(mut call) = self.call.take() else {
            return;
        };
        let signaling = self.context.signaling().clone();

        if call.direct && call.joined && *reason != CloseReason::RemoteClosed {
            if let Err(e) = signaling.send_close(&call.room_id).await {
                warn!(target: "client.session", error = %e, "Failed to notify peer of close");
            }
        }

        let producers_stopped = call.producers.stop_all().await;
        let consumers_closed = call.reconciler.close_all();
        call.pending_reproduce.clear();
        let tracks_stopped = call.media.stop_all();
        call.transports.close_all();

        if call.joined {
            if let Err(e) = signaling.leave(&call.room_id).await {
                warn!(
                    target: "client.session",
                    room_id = %call.room_id,
                    error = %e,
                    "Leave request failed"
                );
            }
        }

        info!(
            target: "client.session",
            room_id = %call.room_id,
            producers_stopped,
            consumers_closed,
            tracks_stopped,
            "Session resources released"
        );
    }

    async fn start_media(&mut self, kind: MediaKind) -> Result<ProducerId, ClientError> {
        let state = self.current();
        let reconnect_pending = self.reconnect_send_at.is_some();
        let (SessionState::InCall { .. }, Some(call)) = (&state, self.call.as_mut()) else {
            return Err(invalid_state("start media", &state));
        };

        if call.producers.is_active(kind).await {
            return Err(ClientError::AlreadyActive(kind));
        }
        // No new producers while the send side is being replaced
        if reconnect_pending
            || matches!(
                call.transports.phase(Direction::Send),
                TransportPhase::Failed | TransportPhase::Closed
            )
        {
            return Err(ClientError::TransportFailure(
                "send transport is reconnecting".to_string(),
            ));
        }

        let send = call.transports.create_send_transport().await?;
        let stream = call.media.acquire(kind).await?;
        match call.producers.start(&send, kind, stream).await {
            Ok(producer_id) => Ok(producer_id),
            Err(e) => {
                call.media.release(kind);
                Err(e)
            }
        }
    }

    async fn stop_media(&mut self, kind: MediaKind) -> Result<bool, ClientError> {
        let state = self.current();
        let (SessionState::InCall { .. }, Some(call)) = (&state, self.call.as_mut()) else {
            return Err(invalid_state("stop media", &state));
        };

        let stopped = call.producers.stop(kind).await?;
        if stopped {
            call.media.release(kind);
        }
        Ok(stopped)
    }

    async fn snapshot(&mut self) -> SessionSnapshot {
        let (streams, peers, local_kinds, in_call_since) = match self.call.as_mut() {
            Some(call) => {
                let streams = call.reconciler.streams();
                let peers = call.peers.aggregate(&streams);
                let kinds = call.producers.active_kinds().await;
                (streams, peers, kinds, call.in_call_since)
            }
            None => (Vec::new(), Vec::new(), Vec::new(), None),
        };
        SessionSnapshot {
            state: self.current(),
            layout: self.layout.compute(&peers),
            streams,
            peers,
            local_kinds,
            in_call_since,
        }
    }

    async fn handle_push(&mut self, event: PushEvent) {
        let state = self.current();
        debug!(
            target: "client.session",
            event = event.name(),
            state = %state,
            "Push event received"
        );

        match event {
            PushEvent::Call { room_id, caller } => {
                if state == SessionState::Idle {
                    info!(
                        target: "client.session",
                        room_id = %room_id,
                        caller = %caller.user_id,
                        "Incoming call"
                    );
                    self.transition(SessionState::RingingIn { room_id, caller });
                } else {
                    info!(
                        target: "client.session",
                        room_id = %room_id,
                        "Declining incoming call while busy"
                    );
                    self.send_answer(&room_id, false).await;
                }
            }
            PushEvent::Answer { room_id, accepted } => match state {
                SessionState::RingingOut {
                    room_id: ringing, ..
                } if ringing == room_id => {
                    self.ring_deadline = None;
                    if accepted {
                        // Failures close the session; the caller learns through the state
                        let _ = self.enter_call(room_id, true).await;
                    } else {
                        info!(target: "client.session", room_id = %room_id, "Call declined");
                        self.transition(SessionState::Idle);
                    }
                }
                _ => debug!(target: "client.session", "Ignoring answer outside an outbound ring"),
            },
            PushEvent::Close { room_id } => match state {
                SessionState::InCall { room_id: current } if current == room_id => {
                    self.close(CloseReason::RemoteClosed).await;
                }
                SessionState::RingingIn { room_id: current, .. }
                | SessionState::RingingOut { room_id: current, .. }
                    if current == room_id =>
                {
                    self.ring_deadline = None;
                    self.transition(SessionState::Idle);
                }
                _ => debug!(target: "client.session", "Ignoring close for another room"),
            },
            room_event => {
                let SessionState::InCall { room_id } = state else {
                    debug!(target: "client.session", "Ignoring room event outside a call");
                    return;
                };
                if room_event.room_id() != &room_id {
                    debug!(target: "client.session", "Ignoring event for another room");
                    return;
                }
                self.handle_room_event(room_event).await;
            }
        }
    }

    async fn handle_room_event(&mut self, event: PushEvent) {
        let Some(call) = self.call.as_mut() else {
            return;
        };

        if let PushEvent::NewPeer {
            socket_id, user, ..
        } = &event
        {
            call.peers.insert(socket_id.clone(), Some(user.clone()));
        }

        if let Some(producers) = event.producer_list() {
            reconcile(call, producers).await;
        }

        if let PushEvent::Leave {
            socket_id: Some(socket_id),
            ..
        } = &event
        {
            call.peers.remove(socket_id);
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        let Some(call) = self.call.as_mut() else {
            return;
        };
        let Some(direction) = call.transports.on_event(&event) else {
            return;
        };

        match direction {
            Direction::Send => {
                let detached = call.producers.detach_all().await;
                call.pending_reproduce.extend(detached);
            }
            Direction::Recv => {
                call.reconciler.close_all();
            }
        }
        self.schedule_reconnect(direction).await;
    }

    async fn schedule_reconnect(&mut self, direction: Direction) {
        let Some(call) = self.call.as_mut() else {
            return;
        };
        match call.transports.next_reconnect_delay(direction) {
            Ok(delay) => {
                let at = Some(Instant::now() + delay);
                match direction {
                    Direction::Send => self.reconnect_send_at = at,
                    Direction::Recv => self.reconnect_recv_at = at,
                }
            }
            Err(e) => {
                error!(
                    target: "client.session",
                    direction = %direction,
                    error = %e,
                    "Transport could not be recovered"
                );
                self.close(CloseReason::Fatal(e.to_string())).await;
            }
        }
    }

    async fn attempt_reconnect(&mut self, direction: Direction) {
        let Some(call) = self.call.as_mut() else {
            return;
        };

        match call.transports.reconnect(direction).await {
            Ok(()) => match direction {
                Direction::Send => {
                    let pending = std::mem::take(&mut call.pending_reproduce);
                    let Some(send) = call.transports.send_transport() else {
                        return;
                    };
                    for (kind, stream) in pending {
                        match call.producers.start(&send, kind, stream.clone()).await {
                            Ok(producer_id) => info!(
                                target: "client.session",
                                kind = %kind,
                                producer_id = %producer_id,
                                "Producer restored after reconnection"
                            ),
                            Err(e) => {
                                warn!(
                                    target: "client.session",
                                    kind = %kind,
                                    error = %e,
                                    "Could not restore producer"
                                );
                                stream.stop();
                            }
                        }
                    }
                }
                Direction::Recv => {
                    if let (Some(recv), Some(capabilities)) = (
                        call.transports.recv_transport(),
                        call.rtp_capabilities.clone(),
                    ) {
                        call.reconciler.resync(&recv, &capabilities).await;
                    }
                }
            },
            Err(e) => {
                warn!(
                    target: "client.session",
                    direction = %direction,
                    error = %e,
                    "Reconnection attempt failed"
                );
                self.schedule_reconnect(direction).await;
            }
        }
    }

    async fn handle_producer_event(&mut self, event: ProducerEvent) {
        match event {
            ProducerEvent::Started { kind, producer_id } => {
                debug!(
                    target: "client.session",
                    kind = %kind,
                    producer_id = %producer_id,
                    "Producer live"
                );
            }
            ProducerEvent::TrackEnded { kind, producer_id } => {
                let Some(call) = self.call.as_mut() else {
                    return;
                };
                if call.producers.producer_id(kind).await.as_ref() != Some(&producer_id) {
                    return;
                }
                info!(
                    target: "client.session",
                    kind = %kind,
                    producer_id = %producer_id,
                    "Local track ended, stopping producer"
                );
                match call.producers.stop(kind).await {
                    Ok(_) => call.media.release(kind),
                    Err(e) => warn!(target: "client.session", error = %e, "Stop after track end failed"),
                }
            }
        }
    }

    async fn handle_ring_timeout(&mut self) {
        self.ring_deadline = None;
        if let SessionState::RingingOut { room_id, callee } = self.current() {
            info!(
                target: "client.session",
                room_id = %room_id,
                callee = %callee,
                "Call not answered"
            );
            self.send_close(&room_id).await;
            self.transition(SessionState::Idle);
        }
    }

    async fn send_answer(&self, room_id: &RoomId, accepted: bool) {
        if let Err(e) = self.context.signaling().send_answer(room_id, accepted).await {
            warn!(target: "client.session", error = %e, "Failed to send answer");
        }
    }

    async fn send_close(&self, room_id: &RoomId) {
        if let Err(e) = self.context.signaling().send_close(room_id).await {
            warn!(target: "client.session", error = %e, "Failed to send close");
        }
    }
}

/// Apply a pushed producer list, or keep it for later while the receive
/// transport is being replaced.
async fn reconcile(call: &mut ActiveCall, producers: &[RemoteProducer]) {
    let usable = matches!(
        call.transports.phase(Direction::Recv),
        TransportPhase::Requested | TransportPhase::Connected
    );
    match (
        usable,
        call.transports.recv_transport(),
        call.rtp_capabilities.clone(),
    ) {
        (true, Some(recv), Some(capabilities)) => {
            call.reconciler
                .reconcile(&recv, &capabilities, producers)
                .await;
        }
        _ => call.reconciler.defer(producers),
    }
}

fn invalid_state(operation: &'static str, state: &SessionState) -> ClientError {
    ClientError::InvalidState {
        operation,
        state: state.name().to_string(),
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
