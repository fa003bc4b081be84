//! End-to-end session lifecycle against mock collaborators.
//!
//! Covers:
//! - Join sequence and join failures
//! - Teardown completeness and mutually exclusive close
//! - 1:1 ringing in both directions, including timeout and busy decline
//! - Push-driven reconciliation and layout
//! - Local media start/stop/toggle and ended tracks
//! - Transport loss and reconnection

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use common::types::{MediaKind, RoomId, SocketId, TrackKind, UserId};
use meeting_client::config::Config;
use meeting_client::errors::{ClientError, SignalingError};
use meeting_client::layout::{Fit, Layout};
use meeting_client::sfu::{ConnectionState, SendTransport};
use meeting_client::session::{
    CloseReason, SessionActor, SessionContext, SessionHandle, SessionSnapshot, SessionState,
};
use meeting_client_test_utils::*;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct TestSession {
    handle: SessionHandle,
    signaling: Arc<MockSignaling>,
    device: Arc<MockDevice>,
    media: Arc<MockMediaDevices>,
    _task: JoinHandle<()>,
}

fn spawn_with(signaling: Arc<MockSignaling>, config: Config) -> TestSession {
    init_test_tracing();
    let device = MockDevice::new();
    let media = MockMediaDevices::new();
    let context = SessionContext::create(config, signaling.clone(), device.clone(), media.clone());
    let (handle, task) = SessionActor::spawn(context, CancellationToken::new());
    TestSession {
        handle,
        signaling,
        device,
        media,
        _task: task,
    }
}

fn spawn_session() -> TestSession {
    spawn_with(
        MockSignaling::builder().socket_id(LOCAL_SOCKET).build(),
        test_config(),
    )
}

async fn joined_with(signaling: Arc<MockSignaling>) -> TestSession {
    let session = spawn_with(signaling, test_config());
    session.handle.join(room()).await.unwrap();
    session
}

async fn joined() -> TestSession {
    joined_with(MockSignaling::builder().socket_id(LOCAL_SOCKET).build()).await
}

fn room() -> RoomId {
    RoomId::from(TEST_ROOM)
}

async fn wait_for_state(
    handle: &SessionHandle,
    predicate: impl Fn(&SessionState) -> bool,
) -> SessionState {
    let mut rx = handle.watch_state();
    let state = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| predicate(s)))
        .await
        .expect("state not reached in time")
        .expect("session state channel closed");
    state.clone()
}

async fn wait_for_snapshot(
    handle: &SessionHandle,
    predicate: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    for _ in 0..200 {
        let snapshot = handle.snapshot().await.unwrap();
        if predicate(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let snapshot = handle.snapshot().await.unwrap();
    assert!(predicate(&snapshot), "snapshot never matched: {snapshot:?}");
    snapshot
}

async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(condition(), "condition not reached in time");
}

fn is_in_call(state: &SessionState) -> bool {
    matches!(state, SessionState::InCall { .. })
}

// ============================================================================
// Join
// ============================================================================

#[tokio::test]
async fn test_join_reaches_in_call_with_default_producers() {
    let session = spawn_session();

    session.handle.join(room()).await.unwrap();

    assert_eq!(session.handle.state(), SessionState::InCall { room_id: room() });
    let methods: Vec<String> = session.signaling.methods().into_iter().take(4).collect();
    assert_eq!(
        methods,
        vec![
            "join",
            "getRouterRtpCapabilities",
            "createProducerTransport",
            "createConsumerTransport",
        ]
    );
    assert!(session.device.is_loaded());
    assert_eq!(session.signaling.count("produce"), 2);
    assert_eq!(session.signaling.count("connectProducerTransport"), 1);

    let snapshot = session.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.local_kinds, vec![MediaKind::Audio, MediaKind::Video]);
    assert!(snapshot.in_call_since.is_some());
    assert_eq!(snapshot.layout, Layout::Waiting);
}

#[tokio::test]
async fn test_join_consumes_existing_producers() {
    let signaling = MockSignaling::builder()
        .socket_id(LOCAL_SOCKET)
        .join_producers(participant("sock-bob", "bob"))
        .join_peer("sock-bob", "bob", "Bob")
        .build();

    let session = joined_with(signaling).await;

    let snapshot = session.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.streams.len(), 2);
    assert_eq!(snapshot.peers.len(), 1);
    let bob = snapshot.peers.first().unwrap();
    assert_eq!(bob.display_name.as_deref(), Some("Bob"));

    let Layout::Focus { main } = snapshot.layout else {
        unreachable!("expected focus layout");
    };
    assert_eq!(main.socket_id, SocketId::from("sock-bob"));
    assert_eq!(main.video.unwrap().fit, Fit::Cover);
    assert!(main.audio.is_some());
}

#[tokio::test]
async fn test_join_without_camera_is_audio_only() {
    let session = spawn_session();
    session.media.unavailable(MediaKind::Video);

    session.handle.join(room()).await.unwrap();

    let snapshot = session.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.local_kinds, vec![MediaKind::Audio]);
    assert_eq!(session.signaling.count("produce"), 1);
}

#[tokio::test]
async fn test_join_video_off_by_config() {
    let config = Config {
        start_video_on_join: false,
        ..test_config()
    };
    let session = spawn_with(MockSignaling::builder().build(), config);

    session.handle.join(room()).await.unwrap();

    assert_eq!(session.media.request_count(MediaKind::Video), 0);
    let snapshot = session.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.local_kinds, vec![MediaKind::Audio]);
}

#[tokio::test]
async fn test_microphone_denied_fails_before_signaling() {
    let session = spawn_session();
    session.media.deny(MediaKind::Audio);

    let result = session.handle.join(room()).await;

    assert!(matches!(result, Err(ClientError::PermissionDenied(_))));
    assert!(result.unwrap_err().is_user_recoverable());
    assert!(matches!(
        session.handle.state(),
        SessionState::Closed {
            reason: CloseReason::Fatal(_)
        }
    ));
    assert_eq!(session.signaling.count("join"), 0);
    assert_eq!(session.signaling.count("leave"), 0);
}

#[tokio::test]
async fn test_transport_timeout_during_join_tears_down() {
    let session = spawn_session();
    session.signaling.fail_next(
        "createProducerTransport",
        SignalingError::Timeout("createProducerTransport".to_string()),
    );
    let mut rx = session.handle.watch_state();
    let observed = tokio::spawn(async move {
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            let closed = state.is_closed();
            seen.push(state.name());
            if closed {
                break;
            }
        }
        seen
    });

    let result = session.handle.join(room()).await;

    assert!(matches!(result, Err(ClientError::SignalingTimeout(_))));
    assert!(matches!(
        session.handle.closed().await.unwrap(),
        CloseReason::Fatal(_)
    ));
    let seen = observed.await.unwrap();
    assert!(!seen.contains(&"in_call"), "states: {seen:?}");
    assert!(!seen.contains(&"closing"), "states: {seen:?}");

    // Microphone and camera were acquired before the failure and are stopped
    assert_eq!(session.media.all_issued().len(), 2);
    assert_eq!(session.media.live_tracks(), 0);
    assert_eq!(session.signaling.count("leave"), 1);
}

#[tokio::test]
async fn test_join_only_from_idle() {
    let session = joined().await;

    let result = session.handle.join(room()).await;

    assert!(matches!(
        result,
        Err(ClientError::InvalidState {
            operation: "join",
            ..
        })
    ));
    assert!(is_in_call(&session.handle.state()));
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn test_hangup_releases_everything() {
    let signaling = MockSignaling::builder()
        .socket_id(LOCAL_SOCKET)
        .join_producers(participant("sock-bob", "bob"))
        .build();
    let session = joined_with(signaling).await;
    let consumer_tracks: Vec<_> = session
        .handle
        .snapshot()
        .await
        .unwrap()
        .streams
        .into_iter()
        .map(|s| s.track)
        .collect();

    session.handle.hangup().await.unwrap();

    assert_eq!(
        session.handle.state(),
        SessionState::Closed {
            reason: CloseReason::Hangup
        }
    );
    assert_eq!(session.media.live_tracks(), 0);
    assert!(consumer_tracks.iter().all(|t| !t.is_live()));
    assert!(session.device.latest_send().unwrap().is_closed());
    assert!(session
        .device
        .latest_recv()
        .unwrap()
        .open_consumers()
        .is_empty());
    assert_eq!(session.signaling.count("remove"), 2);
    assert_eq!(session.signaling.count("leave"), 1);
    // Not a direct call; nobody to notify
    assert!(session.signaling.emitted("close").is_empty());
}

#[tokio::test]
async fn test_concurrent_close_requests_tear_down_once() {
    let session = joined().await;

    session.signaling.push(close_event(TEST_ROOM));
    let (first, second) = tokio::join!(session.handle.hangup(), session.handle.hangup());

    assert!(first.is_ok());
    assert!(second.is_ok());
    let reason = session.handle.closed().await.unwrap();
    assert!(
        matches!(reason, CloseReason::Hangup | CloseReason::RemoteClosed),
        "reason: {reason:?}"
    );
    assert_eq!(session.signaling.count("leave"), 1);
    // One remove per local producer (audio, video)
    assert_eq!(session.signaling.count("remove"), 2);
    assert_eq!(session.media.live_tracks(), 0);

    session.handle.cancel();
    assert_eq!(session.handle.closed().await.unwrap(), reason);
    assert_eq!(session.signaling.count("leave"), 1);
}

#[tokio::test]
async fn test_commands_after_close_report_session_ended() {
    let session = joined().await;
    session.handle.hangup().await.unwrap();

    let result = session.handle.start_media(MediaKind::Screen).await;

    assert!(matches!(result, Err(ClientError::SessionEnded)));
}

#[tokio::test]
async fn test_cancel_tears_down() {
    let session = joined().await;

    session.handle.cancel();

    assert_eq!(
        session.handle.closed().await.unwrap(),
        CloseReason::Cancelled
    );
    assert!(session.handle.is_cancelled());
    assert_eq!(session.media.live_tracks(), 0);
    assert_eq!(session.signaling.count("leave"), 1);
}

#[tokio::test]
async fn test_remote_close_ends_call() {
    let session = joined().await;

    session.signaling.push(close_event(TEST_ROOM));

    assert_eq!(
        session.handle.closed().await.unwrap(),
        CloseReason::RemoteClosed
    );
    assert_eq!(session.media.live_tracks(), 0);
}

#[tokio::test]
async fn test_lost_signaling_is_fatal() {
    let session = joined().await;

    session.signaling.disconnect();

    assert!(session.handle.closed().await.unwrap().is_fatal());
    assert_eq!(session.media.live_tracks(), 0);
}

// ============================================================================
// Push events
// ============================================================================

#[tokio::test]
async fn test_pushed_producers_reconciled() {
    let session = joined().await;

    let mut producers = participant("sock-bob", "bob");
    producers.extend(participant("sock-carol", "carol"));
    session
        .signaling
        .push(producer_list_event("newProducer", TEST_ROOM, &producers));
    let snapshot = wait_for_snapshot(&session.handle, |s| s.streams.len() == 4).await;
    assert_eq!(snapshot.peers.len(), 2);

    session.signaling.push(leave_event(
        TEST_ROOM,
        "sock-bob",
        &participant("sock-carol", "carol"),
    ));
    let snapshot = wait_for_snapshot(&session.handle, |s| s.streams.len() == 2).await;
    let remaining: Vec<&str> = snapshot.peers.iter().map(|p| p.socket_id.as_str()).collect();
    assert_eq!(remaining, vec!["sock-carol"]);
}

#[tokio::test]
async fn test_repeated_list_consumes_once() {
    let session = joined().await;
    let producers = participant("sock-bob", "bob");

    for _ in 0..3 {
        session
            .signaling
            .push(producer_list_event("consumers", TEST_ROOM, &producers));
    }
    wait_for_snapshot(&session.handle, |s| s.streams.len() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(session.signaling.count("consume"), 2);
}

#[tokio::test]
async fn test_other_room_events_ignored() {
    let session = joined().await;

    session.signaling.push(producer_list_event(
        "newProducer",
        "room-2",
        &[remote_producer("x", "sock-x", "x", MediaKind::Audio, "room-2")],
    ));
    session.signaling.push(close_event("room-2"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(session.signaling.count("consume"), 0);
    assert!(is_in_call(&session.handle.state()));
}

#[tokio::test]
async fn test_new_peer_profile_used_in_snapshot() {
    let session = joined().await;

    session
        .signaling
        .push(new_peer_event(TEST_ROOM, "sock-bob", "bob", "Bob B."));
    session.signaling.push(producer_list_event(
        "newProducer",
        TEST_ROOM,
        &participant("sock-bob", "bob"),
    ));

    let snapshot = wait_for_snapshot(&session.handle, |s| s.peers.len() == 1).await;
    assert_eq!(
        snapshot.peers.first().unwrap().display_name.as_deref(),
        Some("Bob B.")
    );
}

#[tokio::test]
async fn test_screen_share_preferred_in_layout() {
    let session = joined().await;
    let mut producers = participant("sock-bob", "bob");
    producers.push(remote_producer(
        "bob-screen",
        "sock-bob",
        "bob",
        MediaKind::Screen,
        TEST_ROOM,
    ));

    session
        .signaling
        .push(producer_list_event("newProducer", TEST_ROOM, &producers));
    let snapshot = wait_for_snapshot(&session.handle, |s| s.streams.len() == 3).await;

    let Layout::Focus { main } = snapshot.layout else {
        unreachable!("expected focus layout");
    };
    let video = main.video.unwrap();
    assert_eq!(video.producer_id.as_str(), "bob-screen");
    assert_eq!(video.fit, Fit::Contain);
}

#[tokio::test]
async fn test_grid_mode_and_main_selection() {
    let signaling = MockSignaling::builder()
        .socket_id(LOCAL_SOCKET)
        .join_producers(
            [participant("sock-bob", "bob"), participant("sock-carol", "carol")].concat(),
        )
        .build();
    let session = joined_with(signaling).await;

    session
        .handle
        .select_main(Some(SocketId::from("sock-bob")))
        .await
        .unwrap();
    let snapshot = session.handle.snapshot().await.unwrap();
    let Layout::Focus { main } = snapshot.layout else {
        unreachable!("expected focus layout");
    };
    assert_eq!(main.socket_id.as_str(), "sock-bob");

    session.handle.set_grid_mode(true).await.unwrap();
    let snapshot = session.handle.snapshot().await.unwrap();
    let Layout::Grid { columns, rows } = snapshot.layout else {
        unreachable!("expected grid layout");
    };
    assert_eq!(columns, 2);
    assert_eq!(rows.len(), 1);
}

// ============================================================================
// Local media
// ============================================================================

#[tokio::test]
async fn test_screen_share_start_and_stop() {
    let session = joined().await;

    session
        .handle
        .start_media(MediaKind::Screen)
        .await
        .unwrap();

    let produce = session.signaling.requests_for("produce");
    assert_eq!(produce.last().unwrap().get("isScreen"), Some(&json!(true)));
    let snapshot = session.handle.snapshot().await.unwrap();
    assert!(snapshot.local_kinds.contains(&MediaKind::Screen));

    assert!(session.handle.stop_media(MediaKind::Screen).await.unwrap());
    assert!(!session.handle.stop_media(MediaKind::Screen).await.unwrap());
    assert_eq!(session.signaling.count("remove"), 1);
    let screen = session.media.issued(MediaKind::Screen);
    assert!(screen.first().unwrap().is_ended());
}

#[tokio::test]
async fn test_stop_video_that_never_started() {
    let config = Config {
        start_video_on_join: false,
        ..test_config()
    };
    let session = spawn_with(MockSignaling::builder().build(), config);
    session.handle.join(room()).await.unwrap();

    let stopped = session.handle.stop_media(MediaKind::Video).await.unwrap();

    assert!(!stopped);
    assert_eq!(session.signaling.count("remove"), 0);
}

#[tokio::test]
async fn test_cancelled_screen_picker_keeps_call() {
    let session = joined().await;
    session.media.cancel(MediaKind::Screen);

    let result = session.handle.start_media(MediaKind::Screen).await;

    assert!(matches!(result, Err(ClientError::UserCancelled)));
    assert!(is_in_call(&session.handle.state()));
    let snapshot = session.handle.snapshot().await.unwrap();
    assert!(!snapshot.local_kinds.contains(&MediaKind::Screen));
}

#[tokio::test]
async fn test_start_active_kind_rejected() {
    let session = joined().await;

    let result = session.handle.start_media(MediaKind::Video).await;

    assert!(matches!(result, Err(ClientError::AlreadyActive(MediaKind::Video))));
    // The rejected start did not leave a second camera running
    assert_eq!(session.media.issued(MediaKind::Video).len(), 1);
}

#[tokio::test]
async fn test_toggle_video() {
    let session = joined().await;

    assert!(!session.handle.toggle_media(MediaKind::Video).await.unwrap());
    assert!(session.handle.toggle_media(MediaKind::Video).await.unwrap());

    let cameras = session.media.issued(MediaKind::Video);
    assert_eq!(cameras.len(), 2);
    assert!(cameras.first().unwrap().is_ended());
    assert!(!cameras.last().unwrap().is_ended());
}

#[tokio::test]
async fn test_media_commands_need_a_call() {
    let session = spawn_session();

    let result = session.handle.start_media(MediaKind::Audio).await;

    assert!(matches!(result, Err(ClientError::InvalidState { .. })));
    assert_eq!(session.handle.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_ended_local_track_stops_producer() {
    let session = joined().await;

    let microphone = session.media.issued(MediaKind::Audio);
    microphone
        .first()
        .unwrap()
        .track_of(TrackKind::Audio)
        .unwrap()
        .stop();

    let snapshot =
        wait_for_snapshot(&session.handle, |s| s.local_kinds == vec![MediaKind::Video]).await;
    assert!(is_in_call(&snapshot.state));
    assert_eq!(session.signaling.count("remove"), 1);
}

// ============================================================================
// Ringing
// ============================================================================

#[tokio::test]
async fn test_outbound_call_answered() {
    let session = spawn_session();

    session
        .handle
        .call(room(), UserId::from("bob"))
        .await
        .unwrap();
    assert!(matches!(
        session.handle.state(),
        SessionState::RingingOut { .. }
    ));
    let invites = session.signaling.emitted("call");
    assert_eq!(
        invites.first().unwrap().get("callee"),
        Some(&json!("bob"))
    );

    session.signaling.push(answer_event(TEST_ROOM, true));
    wait_for_state(&session.handle, is_in_call).await;

    session.handle.hangup().await.unwrap();
    assert_eq!(session.signaling.emitted("close").len(), 1);
}

#[tokio::test]
async fn test_outbound_call_declined() {
    let session = spawn_session();
    session
        .handle
        .call(room(), UserId::from("bob"))
        .await
        .unwrap();

    session.signaling.push(answer_event(TEST_ROOM, false));

    wait_for_state(&session.handle, |s| *s == SessionState::Idle).await;
    assert_eq!(session.signaling.count("join"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_call_times_out() {
    let session = spawn_session();
    session
        .handle
        .call(room(), UserId::from("bob"))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(31)).await;

    wait_for_state(&session.handle, |s| *s == SessionState::Idle).await;
    assert_eq!(session.signaling.emitted("close").len(), 1);
}

#[tokio::test]
async fn test_hangup_while_ringing_out() {
    let session = spawn_session();
    session
        .handle
        .call(room(), UserId::from("bob"))
        .await
        .unwrap();

    session.handle.hangup().await.unwrap();

    assert_eq!(session.handle.state(), SessionState::Idle);
    assert_eq!(session.signaling.emitted("close").len(), 1);
}

#[tokio::test]
async fn test_inbound_call_accepted() {
    let session = spawn_session();

    session.signaling.push(call_event(TEST_ROOM, "alice"));
    let ringing = wait_for_state(&session.handle, |s| {
        matches!(s, SessionState::RingingIn { .. })
    })
    .await;
    let SessionState::RingingIn { caller, .. } = ringing else {
        unreachable!("expected ringing");
    };
    assert_eq!(caller.user_id.as_str(), "alice");

    session.handle.accept().await.unwrap();

    assert!(is_in_call(&session.handle.state()));
    let answers = session.signaling.emitted("answer");
    assert_eq!(answers.first().unwrap().get("accepted"), Some(&json!(true)));

    // The caller hangs up
    session.signaling.push(close_event(TEST_ROOM));
    assert_eq!(
        session.handle.closed().await.unwrap(),
        CloseReason::RemoteClosed
    );
    assert!(session.signaling.emitted("close").is_empty());
}

#[tokio::test]
async fn test_inbound_call_declined() {
    let session = spawn_session();
    session.signaling.push(call_event(TEST_ROOM, "alice"));
    wait_for_state(&session.handle, |s| matches!(s, SessionState::RingingIn { .. })).await;

    session.handle.decline().await.unwrap();

    assert_eq!(session.handle.state(), SessionState::Idle);
    let answers = session.signaling.emitted("answer");
    assert_eq!(answers.first().unwrap().get("accepted"), Some(&json!(false)));
    assert_eq!(session.signaling.count("join"), 0);
}

#[tokio::test]
async fn test_caller_gives_up_while_ringing() {
    let session = spawn_session();
    session.signaling.push(call_event(TEST_ROOM, "alice"));
    wait_for_state(&session.handle, |s| matches!(s, SessionState::RingingIn { .. })).await;

    session.signaling.push(close_event(TEST_ROOM));

    wait_for_state(&session.handle, |s| *s == SessionState::Idle).await;
}

#[tokio::test]
async fn test_busy_session_declines_second_call() {
    let session = joined().await;

    session.signaling.push(call_event("room-9", "eve"));

    wait_until(|| !session.signaling.emitted("answer").is_empty()).await;
    let answers = session.signaling.emitted("answer");
    let answer = answers.first().unwrap();
    assert_eq!(answer.get("roomID"), Some(&json!("room-9")));
    assert_eq!(answer.get("accepted"), Some(&json!(false)));
    assert!(is_in_call(&session.handle.state()));
}

#[tokio::test]
async fn test_cancel_while_ringing_out_withdraws_call() {
    let session = spawn_session();
    session
        .handle
        .call(room(), UserId::from("bob"))
        .await
        .unwrap();

    session.handle.cancel();

    assert_eq!(
        session.handle.closed().await.unwrap(),
        CloseReason::Cancelled
    );
    let closes = session.signaling.emitted("close");
    assert_eq!(closes.len(), 1);
    assert_eq!(closes.first().unwrap().get("roomID"), Some(&json!(TEST_ROOM)));
}

#[tokio::test]
async fn test_cancel_while_ringing_in_declines() {
    let session = spawn_session();
    session.signaling.push(call_event(TEST_ROOM, "alice"));
    wait_for_state(&session.handle, |s| matches!(s, SessionState::RingingIn { .. })).await;

    session.handle.cancel();

    assert_eq!(
        session.handle.closed().await.unwrap(),
        CloseReason::Cancelled
    );
    let answers = session.signaling.emitted("answer");
    assert_eq!(answers.len(), 1);
    assert_eq!(answers.first().unwrap().get("accepted"), Some(&json!(false)));
}

#[tokio::test]
async fn test_dropped_handles_while_ringing_withdraw_call() {
    let TestSession {
        handle,
        signaling,
        _task: task,
        ..
    } = spawn_session();
    handle.call(room(), UserId::from("bob")).await.unwrap();

    drop(handle);
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("session did not stop")
        .unwrap();

    assert_eq!(signaling.emitted("close").len(), 1);
}

#[tokio::test]
async fn test_accept_without_ringing_rejected() {
    let session = spawn_session();

    let result = session.handle.accept().await;

    assert!(matches!(result, Err(ClientError::InvalidState { .. })));
}

// ============================================================================
// Transport loss
// ============================================================================

#[tokio::test]
async fn test_send_transport_loss_reproduces_media() {
    let session = joined().await;
    let first = session.device.latest_send().unwrap();

    first.simulate_state(ConnectionState::Failed);

    let device = Arc::clone(&session.device);
    wait_until(move || {
        device.send_transports().len() == 2
            && device
                .latest_send()
                .map(|t| t.producers().len() == 2)
                .unwrap_or(false)
    })
    .await;
    assert!(first.is_closed());
    assert!(is_in_call(&session.handle.state()));
    let snapshot = session.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.local_kinds, vec![MediaKind::Audio, MediaKind::Video]);
    // The same capture is reused; no new permission prompt
    assert_eq!(session.media.request_count(MediaKind::Audio), 1);
    // Producers are dropped locally, not removed from the room
    assert_eq!(session.signaling.count("remove"), 0);
}

#[tokio::test]
async fn test_media_start_refused_until_send_transport_restored() {
    let session = joined().await;
    session.device.fail_send_transport(1);

    session
        .device
        .latest_send()
        .unwrap()
        .simulate_state(ConnectionState::Failed);
    // First attempt is refused by the device; the second is scheduled
    let signaling = Arc::clone(&session.signaling);
    wait_until(move || signaling.count("createProducerTransport") == 2).await;

    let result = session.handle.start_media(MediaKind::Screen).await;
    assert!(matches!(result, Err(ClientError::TransportFailure(_))));
    assert_eq!(session.media.request_count(MediaKind::Screen), 0);

    let device = Arc::clone(&session.device);
    wait_until(move || {
        device
            .latest_send()
            .map(|t| t.producers().len() == 2)
            .unwrap_or(false)
    })
    .await;
    assert_eq!(session.signaling.count("createProducerTransport"), 3);

    session
        .handle
        .start_media(MediaKind::Screen)
        .await
        .unwrap();

    let live = session.device.latest_send().unwrap();
    assert!(!live.is_closed());
    assert_eq!(session.device.send_transports().len(), 2);
    let producers = live.producers();
    assert_eq!(producers.len(), 3);
    assert!(producers.iter().any(|p| p.is_screen()));
    let snapshot = session.handle.snapshot().await.unwrap();
    assert_eq!(
        snapshot.local_kinds,
        vec![MediaKind::Audio, MediaKind::Video, MediaKind::Screen]
    );
}

#[tokio::test]
async fn test_receive_transport_loss_resubscribes() {
    let signaling = MockSignaling::builder()
        .socket_id(LOCAL_SOCKET)
        .join_producers(participant("sock-bob", "bob"))
        .build();
    let session = joined_with(signaling).await;

    session
        .device
        .latest_recv()
        .unwrap()
        .simulate_state(ConnectionState::Disconnected);

    let signaling = Arc::clone(&session.signaling);
    wait_until(move || signaling.count("consume") == 4).await;
    let snapshot = wait_for_snapshot(&session.handle, |s| s.streams.len() == 2).await;
    assert!(snapshot.streams.iter().all(|s| s.track.is_live()));
    assert_eq!(session.device.recv_transports().len(), 2);
}

#[tokio::test]
async fn test_transport_loss_fatal_without_reconnection() {
    let mut config = test_config();
    config.reconnect.enabled = false;
    let session = spawn_with(MockSignaling::builder().build(), config);
    session.handle.join(room()).await.unwrap();

    session
        .device
        .latest_send()
        .unwrap()
        .simulate_state(ConnectionState::Failed);

    assert!(session.handle.closed().await.unwrap().is_fatal());
    assert_eq!(session.media.live_tracks(), 0);
    assert_eq!(session.signaling.count("leave"), 1);
}

#[tokio::test]
async fn test_reconnection_gives_up_after_budget() {
    let session = joined().await;
    session.signaling.fail_always(
        "createProducerTransport",
        SignalingError::Timeout("createProducerTransport".to_string()),
    );

    session
        .device
        .latest_send()
        .unwrap()
        .simulate_state(ConnectionState::Failed);

    let reason = tokio::time::timeout(Duration::from_secs(5), session.handle.closed())
        .await
        .unwrap()
        .unwrap();
    assert!(reason.is_fatal());
    // Join plus three failed attempts
    assert_eq!(session.signaling.count("createProducerTransport"), 4);
}
