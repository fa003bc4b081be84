//! Consumer reconciliation against a mock signaling server and SFU.
//!
//! Covers:
//! - Initial consumption of a room's producers
//! - Idempotence when the same list is delivered twice
//! - Closing consumers whose producers disappeared
//! - Filtering of this connection's and other rooms' producers
//! - Skipping producers that fail to consume

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeSet;
use std::sync::Arc;

use common::types::{MediaKind, ProducerId, RoomId};
use meeting_client::config::ReconnectPolicy;
use meeting_client::errors::SignalingError;
use meeting_client::reconciler::ConsumerReconciler;
use meeting_client::sfu::{RecvTransport, SfuDevice};
use meeting_client::signaling::messages::{RemoteProducer, RtpCapabilities};
use meeting_client::signaling::SignalingClient;
use meeting_client::transport::{TransportEvent, TransportManager};
use meeting_client_test_utils::*;
use serde_json::json;
use tokio::sync::mpsc;

struct Harness {
    signaling: Arc<MockSignaling>,
    device: Arc<MockDevice>,
    recv: Arc<dyn RecvTransport>,
    capabilities: RtpCapabilities,
    reconciler: ConsumerReconciler,
    _transports: TransportManager,
    _events: mpsc::Receiver<TransportEvent>,
}

async fn harness() -> Harness {
    init_test_tracing();
    let signaling = MockSignaling::builder().socket_id(LOCAL_SOCKET).build();
    let client = SignalingClient::new(signaling.clone());
    let device = MockDevice::new();
    device
        .load(&RtpCapabilities(json!({ "codecs": [] })))
        .await
        .unwrap();

    let (tx, rx) = mpsc::channel(8);
    let mut transports = TransportManager::new(
        client.clone(),
        device.clone(),
        RoomId::from(TEST_ROOM),
        false,
        ReconnectPolicy::default(),
        tx,
    );
    let recv = transports.create_receive_transport().await.unwrap();
    let capabilities = device.rtp_capabilities().unwrap();

    Harness {
        reconciler: ConsumerReconciler::new(client, RoomId::from(TEST_ROOM)),
        signaling,
        device,
        recv,
        capabilities,
        _transports: transports,
        _events: rx,
    }
}

impl Harness {
    async fn apply(
        &mut self,
        producers: &[RemoteProducer],
    ) -> meeting_client::reconciler::ReconcileReport {
        self.signaling.register_producers(producers);
        self.reconciler
            .reconcile(&self.recv, &self.capabilities, producers)
            .await
    }
}

fn ids(producers: &[&str]) -> BTreeSet<ProducerId> {
    producers.iter().map(|p| ProducerId::from(*p)).collect()
}

fn room_of_two() -> Vec<RemoteProducer> {
    let mut producers = participant("sock-bob", "bob");
    producers.push(remote_producer(
        "sock-carol-audio",
        "sock-carol",
        "carol",
        MediaKind::Audio,
        TEST_ROOM,
    ));
    producers
}

// ============================================================================
// Initial consumption and idempotence
// ============================================================================

#[tokio::test]
async fn test_consumes_every_remote_producer() {
    let mut h = harness().await;

    let report = h.apply(&room_of_two()).await;

    assert_eq!(report.created.len(), 3);
    assert!(report.closed.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(
        h.reconciler.consumed(),
        ids(&["sock-bob-audio", "sock-bob-video", "sock-carol-audio"])
    );
    assert_eq!(h.signaling.count("consume"), 3);
    assert_eq!(h.signaling.count("resume"), 3);
    // The receive transport connects once, on first consume
    assert_eq!(h.signaling.count("connectConsumerTransport"), 1);
    assert_eq!(h.device.latest_recv().unwrap().open_consumers().len(), 3);
}

#[tokio::test]
async fn test_same_list_twice_is_noop() {
    let mut h = harness().await;
    let producers = room_of_two();

    h.apply(&producers).await;
    let second = h.apply(&producers).await;

    assert!(second.is_noop());
    assert_eq!(h.signaling.count("consume"), 3);
    assert_eq!(h.reconciler.len(), 3);
}

#[tokio::test]
async fn test_consumer_kinds_match_producers() {
    let mut h = harness().await;
    h.apply(&room_of_two()).await;

    for stream in h.reconciler.streams() {
        assert_eq!(stream.track.kind(), stream.kind.track_kind());
        assert!(stream.track.is_live());
    }
    let video: Vec<_> = h
        .reconciler
        .streams()
        .into_iter()
        .filter(|s| s.is_video())
        .collect();
    assert_eq!(video.len(), 1);
}

#[tokio::test]
async fn test_duplicate_entries_consumed_once() {
    let mut h = harness().await;
    let bob = participant("sock-bob", "bob");
    let mut doubled = bob.clone();
    doubled.extend(bob);

    let report = h.apply(&doubled).await;

    assert_eq!(report.created.len(), 2);
    assert_eq!(h.signaling.count("consume"), 2);
}

// ============================================================================
// Removal
// ============================================================================

#[tokio::test]
async fn test_departed_producer_consumer_closed() {
    let mut h = harness().await;
    h.apply(&room_of_two()).await;
    let carol_track = h
        .reconciler
        .streams()
        .into_iter()
        .find(|s| s.producer_id.as_str() == "sock-carol-audio")
        .unwrap()
        .track;

    let report = h.apply(&participant("sock-bob", "bob")).await;

    assert_eq!(report.closed, vec![ProducerId::from("sock-carol-audio")]);
    assert!(report.created.is_empty());
    assert!(!carol_track.is_live());
    assert_eq!(
        h.reconciler.consumed(),
        ids(&["sock-bob-audio", "sock-bob-video"])
    );
    assert_eq!(h.device.latest_recv().unwrap().open_consumers().len(), 2);
}

#[tokio::test]
async fn test_empty_list_closes_everything() {
    let mut h = harness().await;
    h.apply(&room_of_two()).await;

    let report = h.apply(&[]).await;

    assert_eq!(report.closed.len(), 3);
    assert!(h.reconciler.is_empty());
    assert!(h.device.latest_recv().unwrap().open_consumers().is_empty());
}

#[tokio::test]
async fn test_consumed_set_tracks_latest_list() {
    let mut h = harness().await;
    let lists = [
        participant("sock-bob", "bob"),
        room_of_two(),
        participant("sock-dave", "dave"),
        Vec::new(),
        room_of_two(),
    ];

    for list in &lists {
        h.apply(list).await;
        let expected: BTreeSet<ProducerId> =
            list.iter().map(|p| p.producer_id.clone()).collect();
        assert_eq!(h.reconciler.consumed(), expected);
    }
}

// ============================================================================
// Filtering
// ============================================================================

#[tokio::test]
async fn test_own_producers_never_consumed() {
    let mut h = harness().await;
    let mut producers = participant("sock-bob", "bob");
    producers.push(remote_producer(
        "mine",
        LOCAL_SOCKET,
        "me",
        MediaKind::Video,
        TEST_ROOM,
    ));

    h.apply(&producers).await;

    assert!(!h.signaling.consumed_producers().contains(&"mine".to_string()));
    assert_eq!(h.reconciler.len(), 2);
}

#[tokio::test]
async fn test_other_room_producers_ignored() {
    let mut h = harness().await;
    let producers = vec![remote_producer(
        "elsewhere",
        "sock-eve",
        "eve",
        MediaKind::Audio,
        "room-2",
    )];

    let report = h.apply(&producers).await;

    assert!(report.is_noop());
    assert_eq!(h.signaling.count("consume"), 0);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_failed_consume_skipped_and_retried() {
    let mut h = harness().await;
    h.signaling.fail_consume_for("sock-bob-video");
    let producers = room_of_two();

    let report = h.apply(&producers).await;

    assert_eq!(report.failed, vec![ProducerId::from("sock-bob-video")]);
    assert_eq!(report.created.len(), 2);
    assert_eq!(
        h.reconciler.consumed(),
        ids(&["sock-bob-audio", "sock-carol-audio"])
    );

    h.signaling.clear_failures();
    let retry = h.apply(&producers).await;

    assert_eq!(retry.created, vec![ProducerId::from("sock-bob-video")]);
    assert_eq!(h.reconciler.len(), 3);
}

#[tokio::test]
async fn test_kind_mismatch_rejected() {
    let mut h = harness().await;
    // Server claims a video track for a producer the room lists as audio
    h.signaling.register_producers(&[remote_producer(
        "odd",
        "sock-bob",
        "bob",
        MediaKind::Video,
        TEST_ROOM,
    )]);
    let listed = [remote_producer(
        "odd",
        "sock-bob",
        "bob",
        MediaKind::Audio,
        TEST_ROOM,
    )];

    let report = h
        .reconciler
        .reconcile(&h.recv, &h.capabilities, &listed)
        .await;

    assert_eq!(report.failed, vec![ProducerId::from("odd")]);
    assert!(h.reconciler.is_empty());
}

#[tokio::test]
async fn test_resume_failure_closes_local_consumer() {
    let mut h = harness().await;
    h.signaling.fail_next(
        "resume",
        SignalingError::Rejected {
            method: "resume".to_string(),
            message: "no such consumer".to_string(),
        },
    );

    let report = h
        .apply(&[remote_producer(
            "p1",
            "sock-bob",
            "bob",
            MediaKind::Audio,
            TEST_ROOM,
        )])
        .await;

    assert_eq!(report.failed, vec![ProducerId::from("p1")]);
    let recv = h.device.latest_recv().unwrap();
    assert_eq!(recv.consumers().len(), 1);
    assert!(recv.open_consumers().is_empty());
}

// ============================================================================
// Close and resync
// ============================================================================

#[tokio::test]
async fn test_close_all_then_resync_restores_consumers() {
    let mut h = harness().await;
    h.apply(&room_of_two()).await;

    assert_eq!(h.reconciler.close_all(), 3);
    assert!(h.reconciler.is_empty());
    assert!(h.device.latest_recv().unwrap().open_consumers().is_empty());

    let report = h.reconciler.resync(&h.recv, &h.capabilities).await;

    assert_eq!(report.created.len(), 3);
    assert_eq!(h.signaling.count("consume"), 6);
}

#[tokio::test]
async fn test_deferred_list_applied_on_resync() {
    let mut h = harness().await;
    let producers = participant("sock-bob", "bob");
    h.signaling.register_producers(&producers);

    h.reconciler.defer(&producers);
    assert_eq!(h.signaling.count("consume"), 0);

    let report = h.reconciler.resync(&h.recv, &h.capabilities).await;
    assert_eq!(report.created.len(), 2);
}
