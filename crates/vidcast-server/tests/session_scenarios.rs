//! Session scenarios driven through the public API.
//!
//! Each test opens a real [`Session`] over an in-memory channel and a
//! recording [`MockPipeline`], plays the browser through [`BrowserEnd`] and
//! the engine through `MockPipeline::emit`, and checks what reached the
//! engine, the wire and the registry.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use vidcast_core::{IceCandidate, NegotiationPhase, SessionDescription, SessionId};
use vidcast_server::application::{
    CloseReason, MediaEvent, Session, SessionError, SessionManager, SessionOptions, SessionState,
};
use vidcast_server::infrastructure::media::mock::{MediaCall, MockBehaviour, MockPipeline, MOCK_OFFER_SDP};
use vidcast_server::infrastructure::memory_channel::{memory_channel, BrowserEnd};

const WAIT: Duration = Duration::from_secs(2);
const ANSWER: &str = r#"{"sdp":{"type":"answer","sdp":"v=0..."}}"#;
const BROWSER_CANDIDATE: &str = r#"{"ice":{"candidate":"candidate:1 1 udp 2113937151 192.168.1.7 54321 typ host","sdpMLineIndex":0}}"#;

// ── Harness ───────────────────────────────────────────────────────────────────

struct Harness {
    id: SessionId,
    pipeline: MockPipeline,
    manager: SessionManager,
    browser: BrowserEnd,
    state: Arc<SessionState>,
    task: JoinHandle<CloseReason>,
}

async fn open_with(behaviour: MockBehaviour, send_timeout: Duration) -> Harness {
    let pipeline = MockPipeline::with_behaviour(behaviour);
    let manager = SessionManager::new();
    let (inbound, sender, browser) = memory_channel(send_timeout);
    let id = SessionId::new();

    let session = Session::open(
        id,
        "127.0.0.1:50000",
        &pipeline,
        sender,
        manager.clone(),
        SessionOptions::default(),
    )
    .await
    .expect("session should open");
    let state = session.state();
    let task = tokio::spawn(session.run(inbound));

    Harness {
        id,
        pipeline,
        manager,
        browser,
        state,
        task,
    }
}

async fn open() -> Harness {
    open_with(MockBehaviour::default(), Duration::from_secs(1)).await
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn wait_for_phase(state: &SessionState, phase: NegotiationPhase) {
    wait_until(|| state.phase() == phase).await;
}

async fn next_frame(browser: &mut BrowserEnd) -> Value {
    let frame = timeout(WAIT, browser.recv())
        .await
        .expect("no frame in time")
        .expect("channel closed");
    serde_json::from_str(&frame).expect("server frames are JSON")
}

async fn finished(task: JoinHandle<CloseReason>) -> CloseReason {
    timeout(WAIT, task)
        .await
        .expect("session did not end in time")
        .expect("session task panicked")
}

/// Emits `NegotiationNeeded`, reads the offer and waits for `Negotiating`.
async fn negotiate(h: &mut Harness) -> Value {
    assert!(h.pipeline.emit(MediaEvent::NegotiationNeeded));
    let offer = next_frame(&mut h.browser).await;
    wait_for_phase(&h.state, NegotiationPhase::Negotiating).await;
    offer
}

// ── Offer / answer ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_offer_answer_reaches_established() {
    // Arrange
    let mut h = open().await;

    // Act: engine asks for negotiation, browser answers
    let offer = negotiate(&mut h).await;
    h.browser.send(ANSWER);
    wait_for_phase(&h.state, NegotiationPhase::Established).await;

    // Assert
    assert_eq!(offer, json!({"sdp": {"type": "offer", "sdp": MOCK_OFFER_SDP}}));
    assert_eq!(
        h.pipeline.remote_descriptions(),
        vec![SessionDescription::answer("v=0...")]
    );
    assert_eq!(
        h.pipeline.calls()[..3],
        [
            MediaCall::Start,
            MediaCall::CreateOffer,
            MediaCall::SetLocalDescription(SessionDescription::offer(MOCK_OFFER_SDP)),
        ]
    );
}

#[tokio::test]
async fn test_answer_before_offer_never_reaches_engine() {
    // Arrange
    let h = open().await;

    // Act: answer in Idle, then a candidate to know both frames were handled
    h.browser.send(ANSWER);
    h.browser.send(BROWSER_CANDIDATE);
    wait_until(|| h.pipeline.remote_candidates().len() == 1).await;

    // Assert
    assert!(h.pipeline.remote_descriptions().is_empty());
    assert_eq!(h.state.phase(), NegotiationPhase::Idle);
    assert!(!h.task.is_finished());
}

#[tokio::test]
async fn test_duplicate_answer_is_dropped() {
    // Arrange
    let mut h = negotiating().await;

    // Act
    h.browser.send(ANSWER);
    h.browser.send(ANSWER);
    h.browser.send(BROWSER_CANDIDATE);
    wait_until(|| h.pipeline.remote_candidates().len() == 1).await;

    // Assert: only the first answer was applied and the session lives on
    assert_eq!(h.pipeline.remote_descriptions().len(), 1);
    assert_eq!(h.state.phase(), NegotiationPhase::Established);
    assert!(!h.task.is_finished());
    h.browser.hang_up();
    assert!(matches!(finished(h.task).await, CloseReason::PeerClosed));
}

#[tokio::test]
async fn test_remote_offer_is_a_protocol_violation() {
    let mut h = negotiating().await;

    h.browser.send(r#"{"sdp":{"type":"offer","sdp":"v=0..."}}"#);
    h.browser.send(BROWSER_CANDIDATE);
    wait_until(|| h.pipeline.remote_candidates().len() == 1).await;

    assert!(h.pipeline.remote_descriptions().is_empty());
    assert_eq!(h.state.phase(), NegotiationPhase::Negotiating);
}

#[tokio::test]
async fn test_repeated_negotiation_needed_creates_one_offer() {
    let mut h = open().await;

    negotiate(&mut h).await;
    h.pipeline.emit(MediaEvent::NegotiationNeeded);
    h.browser.send(BROWSER_CANDIDATE);
    wait_until(|| h.pipeline.remote_candidates().len() == 1).await;

    assert_eq!(h.pipeline.count(|c| matches!(c, MediaCall::CreateOffer)), 1);
    assert!(h.browser.try_recv().is_none());
}

async fn negotiating() -> Harness {
    let mut h = open().await;
    negotiate(&mut h).await;
    h
}

// ── Candidates ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_remote_candidate_in_idle_is_applied_immediately() {
    // Arrange
    let h = open().await;

    // Act
    h.browser.send(BROWSER_CANDIDATE);
    wait_until(|| !h.pipeline.remote_candidates().is_empty()).await;

    // Assert
    assert_eq!(
        h.pipeline.remote_candidates(),
        vec![IceCandidate::new(
            0,
            "candidate:1 1 udp 2113937151 192.168.1.7 54321 typ host"
        )]
    );
    assert_eq!(h.state.phase(), NegotiationPhase::Idle);
}

#[tokio::test]
async fn test_local_candidate_before_offer_is_forwarded() {
    // Arrange
    let mut h = open().await;

    // Act
    h.pipeline.emit(MediaEvent::LocalCandidate(IceCandidate::new(
        0,
        "candidate:842163049 1 udp 1677729535 203.0.113.5 3478 typ srflx",
    )));

    // Assert
    assert_eq!(
        next_frame(&mut h.browser).await,
        json!({"ice": {
            "candidate": "candidate:842163049 1 udp 1677729535 203.0.113.5 3478 typ srflx",
            "sdpMLineIndex": 0
        }})
    );
    assert_eq!(h.state.phase(), NegotiationPhase::Idle);
}

#[tokio::test]
async fn test_candidates_keep_flowing_after_established() {
    let mut h = negotiating().await;
    h.browser.send(ANSWER);
    wait_for_phase(&h.state, NegotiationPhase::Established).await;

    h.pipeline
        .emit(MediaEvent::LocalCandidate(IceCandidate::new(0, "candidate:9")));
    h.browser.send(BROWSER_CANDIDATE);

    assert_eq!(next_frame(&mut h.browser).await["ice"]["candidate"], "candidate:9");
    wait_until(|| h.pipeline.remote_candidates().len() == 1).await;
}

// ── Malformed frames ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_garbage_and_unknown_frames_do_not_end_session() {
    let h = open().await;

    h.browser.send("not json");
    h.browser.send("[1,2,3]");
    h.browser.send(r#"{"hello":"world"}"#);
    h.browser.send(r#"{"ice":{"candidate":"candidate:1","sdpMLineIndex":null}}"#);
    h.browser.send(r#"{"sdp":{"type":"pranswer","sdp":"v=0"}}"#);
    h.browser.send(BROWSER_CANDIDATE);
    wait_until(|| h.pipeline.remote_candidates().len() == 1).await;

    assert!(!h.task.is_finished());
    assert_eq!(h.manager.len().await, 1);
}

// ── Teardown ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_channel_end_while_negotiating_tears_down_once() {
    // Arrange
    let mut h = negotiating().await;

    // Act
    h.browser.hang_up();
    let reason = finished(h.task).await;

    // Assert
    assert!(matches!(reason, CloseReason::PeerClosed));
    assert_eq!(h.state.phase(), NegotiationPhase::Closed);
    assert_eq!(h.pipeline.stop_count(), 1);
    assert!(h.manager.is_empty().await);
}

#[tokio::test]
async fn test_unregister_after_teardown_is_a_no_op() {
    let mut h = open().await;
    h.browser.hang_up();
    finished(h.task).await;

    assert!(!h.manager.unregister(h.id).await);
    assert!(!h.manager.unregister(h.id).await);
    assert!(h.manager.is_empty().await);
}

#[tokio::test]
async fn test_transport_error_closes_session() {
    let h = open().await;

    h.browser.fail("connection reset");

    assert!(matches!(
        finished(h.task).await,
        CloseReason::Transport(reason) if reason.contains("connection reset")
    ));
    assert_eq!(h.pipeline.stop_count(), 1);
}

#[tokio::test]
async fn test_offer_to_closed_channel_closes_quietly() {
    // Arrange: the browser has stopped reading
    let mut h = open().await;
    h.browser.stop_reading();

    // Act
    h.pipeline.emit(MediaEvent::NegotiationNeeded);

    // Assert: no fault, straight to Closed, torn down once
    assert!(matches!(
        finished(h.task).await,
        CloseReason::Error(SessionError::ChannelClosed)
    ));
    assert_eq!(h.state.phase(), NegotiationPhase::Closed);
    assert_eq!(h.pipeline.stop_count(), 1);
    assert!(h.manager.is_empty().await);
}

#[tokio::test]
async fn test_stalled_browser_does_not_block_session_forever() {
    // Arrange: a reader that never drains, and a short send timeout
    let h = open_with(MockBehaviour::default(), Duration::from_millis(50)).await;

    // Act: more candidates than the outbound queue holds
    for n in 0..100 {
        h.pipeline
            .emit(MediaEvent::LocalCandidate(IceCandidate::new(0, format!("candidate:{n}"))));
    }

    // Assert
    assert!(matches!(
        finished(h.task).await,
        CloseReason::Error(SessionError::ChannelClosed)
    ));
    assert_eq!(h.pipeline.stop_count(), 1);
}

#[tokio::test]
async fn test_rejected_answer_is_fatal() {
    // Arrange
    let mut h = {
        let mut h = open_with(
            MockBehaviour {
                reject_remote_description: true,
                ..MockBehaviour::default()
            },
            Duration::from_secs(1),
        )
        .await;
        negotiate(&mut h).await;
        h
    };

    // Act
    h.browser.send(ANSWER);

    // Assert
    assert!(matches!(
        finished(h.task).await,
        CloseReason::Error(SessionError::EngineRejected(_))
    ));
    assert_eq!(h.pipeline.stop_count(), 1);
    assert!(h.manager.is_empty().await);
    // The socket just closes: nothing but the offer was ever sent.
    assert!(h.browser.recv().await.is_none());
}

#[tokio::test]
async fn test_rejected_candidate_is_fatal() {
    let h = open_with(
        MockBehaviour {
            reject_candidates: true,
            ..MockBehaviour::default()
        },
        Duration::from_secs(1),
    )
    .await;

    h.browser.send(BROWSER_CANDIDATE);

    assert!(matches!(
        finished(h.task).await,
        CloseReason::Error(SessionError::EngineRejected(_))
    ));
    assert_eq!(h.pipeline.stop_count(), 1);
}

#[tokio::test]
async fn test_pipeline_failure_closes_session() {
    let h = open().await;

    h.pipeline.emit(MediaEvent::Failed("peer connection failed".into()));

    assert!(matches!(
        finished(h.task).await,
        CloseReason::Error(SessionError::PipelineFailed(_))
    ));
    assert!(h.manager.is_empty().await);
}

#[tokio::test]
async fn test_shutdown_all_closes_every_session() {
    // Arrange: two sessions sharing one manager
    let pipeline = MockPipeline::new();
    let manager = SessionManager::new();
    let mut tasks = Vec::new();
    let mut browsers = Vec::new();
    for port in [50001, 50002] {
        let (inbound, sender, browser) = memory_channel(Duration::from_secs(1));
        let session = Session::open(
            SessionId::new(),
            format!("127.0.0.1:{port}"),
            &pipeline,
            sender,
            manager.clone(),
            SessionOptions::default(),
        )
        .await
        .unwrap();
        tasks.push(tokio::spawn(session.run(inbound)));
        browsers.push(browser);
    }
    assert_eq!(manager.len().await, 2);

    // Act
    timeout(WAIT, manager.shutdown_all())
        .await
        .expect("shutdown_all should complete");

    // Assert
    assert!(manager.is_empty().await);
    assert_eq!(pipeline.stop_count(), 2);
    for task in tasks {
        assert!(matches!(finished(task).await, CloseReason::Shutdown));
    }
}

#[tokio::test]
async fn test_construction_failure_never_registers() {
    let pipeline = MockPipeline::with_behaviour(MockBehaviour {
        fail_build: true,
        ..MockBehaviour::default()
    });
    let manager = SessionManager::new();
    let (_inbound, sender, mut browser) = memory_channel(Duration::from_secs(1));

    let result = Session::open(
        SessionId::new(),
        "127.0.0.1:50003",
        &pipeline,
        sender,
        manager.clone(),
        SessionOptions::default(),
    )
    .await;

    assert!(matches!(result, Err(SessionError::PipelineConstructionFailed(_))));
    assert!(manager.is_empty().await);
    // The sender went down with the failed session: the channel just closes.
    assert!(browser.recv().await.is_none());
}
