//! In-memory SFU device library.
//!
//! Transports raise the same callbacks a real SFU library does: `Connect`
//! on first use, `Produce` for every produced track, and connection state
//! changes on demand through `simulate_state`. Closing a transport drops
//! its callback channel.

use common::types::{ConsumerId, ProducerId, TrackKind, TransportId};
use meeting_client::errors::SfuError;
use meeting_client::media::MediaTrack;
use meeting_client::sfu::{
    ConnectionState, ConsumeOptions, Consumer, ProduceOptions, Producer, RecvTransport,
    SendTransport, SfuDevice, TransportBinding, TransportSignal,
};
use meeting_client::signaling::messages::{
    DtlsParameters, RtpCapabilities, RtpParameters, TransportParams,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

const SIGNAL_BUFFER: usize = 16;

#[derive(Default)]
struct DeviceState {
    loaded: Option<RtpCapabilities>,
    send_transports: Vec<Arc<MockSendTransport>>,
    recv_transports: Vec<Arc<MockRecvTransport>>,
}

/// Mock SFU device.
#[derive(Default)]
pub struct MockDevice {
    state: Mutex<DeviceState>,
    fail_load: AtomicBool,
    fail_send_creates: AtomicUsize,
    fail_recv_creates: AtomicUsize,
}

impl MockDevice {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `load` fail.
    pub fn fail_load(&self) {
        self.fail_load.store(true, Ordering::SeqCst);
    }

    /// Fail the next `times` send transport creations.
    pub fn fail_send_transport(&self, times: usize) {
        self.fail_send_creates.store(times, Ordering::SeqCst);
    }

    /// Fail the next `times` receive transport creations.
    pub fn fail_recv_transport(&self, times: usize) {
        self.fail_recv_creates.store(times, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.state.lock().unwrap().loaded.is_some()
    }

    /// Every send transport created so far, oldest first.
    #[must_use]
    pub fn send_transports(&self) -> Vec<Arc<MockSendTransport>> {
        self.state.lock().unwrap().send_transports.clone()
    }

    /// Every receive transport created so far, oldest first.
    #[must_use]
    pub fn recv_transports(&self) -> Vec<Arc<MockRecvTransport>> {
        self.state.lock().unwrap().recv_transports.clone()
    }

    #[must_use]
    pub fn latest_send(&self) -> Option<Arc<MockSendTransport>> {
        self.state.lock().unwrap().send_transports.last().cloned()
    }

    #[must_use]
    pub fn latest_recv(&self) -> Option<Arc<MockRecvTransport>> {
        self.state.lock().unwrap().recv_transports.last().cloned()
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait::async_trait]
impl SfuDevice for MockDevice {
    async fn load(&self, router_rtp_capabilities: &RtpCapabilities) -> Result<(), SfuError> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(SfuError::Failed("unsupported router capabilities".to_string()));
        }
        self.state.lock().unwrap().loaded = Some(router_rtp_capabilities.clone());
        Ok(())
    }

    fn rtp_capabilities(&self) -> Result<RtpCapabilities, SfuError> {
        match &self.state.lock().unwrap().loaded {
            Some(router) => Ok(RtpCapabilities(json!({ "device": true, "router": router }))),
            None => Err(SfuError::Failed("device not loaded".to_string())),
        }
    }

    fn create_send_transport(
        &self,
        params: &TransportParams,
    ) -> Result<TransportBinding<dyn SendTransport>, SfuError> {
        if take_failure(&self.fail_send_creates) {
            return Err(SfuError::Failed("send transport refused".to_string()));
        }
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        let transport = Arc::new(MockSendTransport {
            id: params.id.clone(),
            signals: Mutex::new(Some(tx)),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            fail_produce: AtomicBool::new(false),
            producers: Mutex::new(Vec::new()),
        });
        self.state
            .lock()
            .unwrap()
            .send_transports
            .push(Arc::clone(&transport));
        Ok(TransportBinding {
            transport,
            signals: rx,
        })
    }

    fn create_recv_transport(
        &self,
        params: &TransportParams,
    ) -> Result<TransportBinding<dyn RecvTransport>, SfuError> {
        if take_failure(&self.fail_recv_creates) {
            return Err(SfuError::Failed("receive transport refused".to_string()));
        }
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        let transport = Arc::new(MockRecvTransport {
            id: params.id.clone(),
            signals: Mutex::new(Some(tx)),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            fail_consume: AtomicBool::new(false),
            consumers: Mutex::new(Vec::new()),
        });
        self.state
            .lock()
            .unwrap()
            .recv_transports
            .push(Arc::clone(&transport));
        Ok(TransportBinding {
            transport,
            signals: rx,
        })
    }
}

async fn raise_connect(sender: &mpsc::Sender<TransportSignal>) -> Result<(), SfuError> {
    let (tx, rx) = oneshot::channel();
    sender
        .send(TransportSignal::Connect {
            dtls_parameters: DtlsParameters(json!({ "role": "client", "fingerprints": [] })),
            respond_to: tx,
        })
        .await
        .map_err(|_| SfuError::Closed("callback channel closed".to_string()))?;
    rx.await
        .map_err(|_| SfuError::Closed("connect never answered".to_string()))?
        .map_err(SfuError::Failed)
}

/// Mock outbound transport.
pub struct MockSendTransport {
    id: TransportId,
    signals: Mutex<Option<mpsc::Sender<TransportSignal>>>,
    connected: AtomicBool,
    closed: AtomicBool,
    fail_produce: AtomicBool,
    producers: Mutex<Vec<Arc<MockProducer>>>,
}

impl MockSendTransport {
    /// Raise a connection state change. Returns whether it was delivered.
    pub fn simulate_state(&self, state: ConnectionState) -> bool {
        match self.signals.lock().unwrap().as_ref() {
            Some(sender) => sender
                .try_send(TransportSignal::ConnectionStateChange(state))
                .is_ok(),
            None => false,
        }
    }

    /// Make the library refuse further `produce` calls.
    pub fn fail_produce(&self) {
        self.fail_produce.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn transport_id(&self) -> TransportId {
        self.id.clone()
    }

    #[must_use]
    pub fn producers(&self) -> Vec<Arc<MockProducer>> {
        self.producers.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SendTransport for MockSendTransport {
    fn id(&self) -> TransportId {
        self.id.clone()
    }

    async fn produce(
        &self,
        track: MediaTrack,
        options: ProduceOptions,
    ) -> Result<Arc<dyn Producer>, SfuError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SfuError::Closed(self.id.to_string()));
        }
        if self.fail_produce.load(Ordering::SeqCst) {
            return Err(SfuError::Failed("encoder unavailable".to_string()));
        }
        let sender = self
            .signals
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SfuError::Closed(self.id.to_string()))?;

        if !self.connected.swap(true, Ordering::SeqCst) {
            if let Err(e) = raise_connect(&sender).await {
                self.connected.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        let (tx, rx) = oneshot::channel();
        sender
            .send(TransportSignal::Produce {
                kind: track.kind(),
                rtp_parameters: RtpParameters(json!({ "codecs": [], "encodings": [] })),
                is_screen: options.is_screen,
                respond_to: tx,
            })
            .await
            .map_err(|_| SfuError::Closed("callback channel closed".to_string()))?;
        let id = rx
            .await
            .map_err(|_| SfuError::Closed("produce never answered".to_string()))?
            .map_err(SfuError::Failed)?;

        let producer = Arc::new(MockProducer {
            id,
            kind: track.kind(),
            track,
            is_screen: options.is_screen,
            closed: AtomicBool::new(false),
        });
        self.producers.lock().unwrap().push(Arc::clone(&producer));
        Ok(producer)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.signals.lock().unwrap().take();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Mock inbound transport.
pub struct MockRecvTransport {
    id: TransportId,
    signals: Mutex<Option<mpsc::Sender<TransportSignal>>>,
    connected: AtomicBool,
    closed: AtomicBool,
    fail_consume: AtomicBool,
    consumers: Mutex<Vec<Arc<MockConsumer>>>,
}

impl MockRecvTransport {
    /// Raise a connection state change. Returns whether it was delivered.
    pub fn simulate_state(&self, state: ConnectionState) -> bool {
        match self.signals.lock().unwrap().as_ref() {
            Some(sender) => sender
                .try_send(TransportSignal::ConnectionStateChange(state))
                .is_ok(),
            None => false,
        }
    }

    /// Make the library refuse further `consume` calls.
    pub fn fail_consume(&self) {
        self.fail_consume.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn transport_id(&self) -> TransportId {
        self.id.clone()
    }

    /// Every consumer created on this transport.
    #[must_use]
    pub fn consumers(&self) -> Vec<Arc<MockConsumer>> {
        self.consumers.lock().unwrap().clone()
    }

    /// Consumers not yet closed.
    #[must_use]
    pub fn open_consumers(&self) -> Vec<Arc<MockConsumer>> {
        self.consumers()
            .into_iter()
            .filter(|c| !c.is_closed())
            .collect()
    }
}

#[async_trait::async_trait]
impl RecvTransport for MockRecvTransport {
    fn id(&self) -> TransportId {
        self.id.clone()
    }

    async fn consume(&self, options: ConsumeOptions) -> Result<Arc<dyn Consumer>, SfuError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SfuError::Closed(self.id.to_string()));
        }
        if self.fail_consume.load(Ordering::SeqCst) {
            return Err(SfuError::Failed("decoder unavailable".to_string()));
        }
        let sender = self
            .signals
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SfuError::Closed(self.id.to_string()))?;

        if !self.connected.swap(true, Ordering::SeqCst) {
            if let Err(e) = raise_connect(&sender).await {
                self.connected.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        let consumer = Arc::new(MockConsumer {
            id: options.id,
            producer_id: options.producer_id.clone(),
            kind: options.kind,
            track: MediaTrack::new(options.kind, format!("remote {}", options.producer_id)),
            closed: AtomicBool::new(false),
        });
        self.consumers.lock().unwrap().push(Arc::clone(&consumer));
        Ok(consumer)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.signals.lock().unwrap().take();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Mock local producer.
pub struct MockProducer {
    id: ProducerId,
    kind: TrackKind,
    track: MediaTrack,
    is_screen: bool,
    closed: AtomicBool,
}

impl MockProducer {
    #[must_use]
    pub fn is_screen(&self) -> bool {
        self.is_screen
    }
}

impl Producer for MockProducer {
    fn id(&self) -> ProducerId {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn track(&self) -> MediaTrack {
        self.track.clone()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Mock consumer. Closing it ends its track.
pub struct MockConsumer {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: TrackKind,
    track: MediaTrack,
    closed: AtomicBool,
}

impl Consumer for MockConsumer {
    fn id(&self) -> ConsumerId {
        self.id.clone()
    }

    fn producer_id(&self) -> ProducerId {
        self.producer_id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn track(&self) -> MediaTrack {
        self.track.clone()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.track.stop();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
