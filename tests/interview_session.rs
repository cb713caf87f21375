//! End-to-end interview sessions against the mock backend.
//!
//! Remote events enter through the backend's live sink and reach the
//! controller through the session event queue, as they do with real devices.

use std::time::Duration;
use wajjihni::audio::pcm::AudioPacket;
use wajjihni::live::LiveEvent;
use wajjihni::session::backend::{MockBackend, MockBackendProbe};
use wajjihni::session::{EndReason, SessionEvents};
use wajjihni::{Config, InterviewRequest, Phase, SessionController, SessionSummary, WajjihniError};

const OUT_RATE: u32 = 24000;

type Controller = SessionController<MockBackend>;

fn session(backend: MockBackend) -> (Controller, SessionEvents, MockBackendProbe) {
    let probe = backend.probe();
    let (controller, events) = SessionController::new(backend, Config::default());
    (controller, events, probe)
}

fn audio(seconds: f64) -> LiveEvent {
    let len = (seconds * OUT_RATE as f64).round() as usize;
    let packet = AudioPacket::from_samples(vec![1200; len], OUT_RATE);
    LiveEvent::AudioChunk {
        data: packet.data().to_string(),
        mime_type: packet.mime_type().to_string(),
    }
}

fn pump(controller: &mut Controller, events: &mut SessionEvents) -> Option<SessionSummary> {
    let mut summary = None;
    while let Some(dispatch) = events.try_recv() {
        if let Some(s) = controller.dispatch(dispatch) {
            summary = Some(s);
        }
    }
    summary
}

async fn opened(backend: MockBackend) -> (Controller, SessionEvents, MockBackendProbe) {
    let (mut controller, mut events, probe) = session(backend);
    assert!(
        controller
            .start(InterviewRequest::new("Backend Engineer").with_context("CS graduate"))
            .await
            .unwrap()
    );
    probe.emit_live(LiveEvent::Opened);
    assert!(pump(&mut controller, &mut events).is_none());
    assert_eq!(controller.phase(), Phase::Active);
    (controller, events, probe)
}

#[tokio::test]
async fn test_agent_audio_is_scheduled_back_to_back() {
    let (mut controller, mut events, probe) = opened(MockBackend::new(4, 16000, OUT_RATE)).await;

    probe.emit_live(audio(0.5));
    probe.emit_live(audio(0.5));
    pump(&mut controller, &mut events);

    let output = &probe.outputs()[0];
    let scheduled = output.scheduled();
    assert_eq!(scheduled.len(), 2);
    assert!(scheduled[0].start.abs() < 1e-9);
    assert!((scheduled[1].start - 0.5).abs() < 1e-9);
    assert!(controller.is_agent_speaking());

    for id in output.advance(1.0) {
        probe.complete_source(id);
    }
    pump(&mut controller, &mut events);
    assert!(!controller.is_agent_speaking());
}

#[tokio::test]
async fn test_candidate_barge_in_silences_queued_speech() {
    let (mut controller, mut events, probe) = opened(MockBackend::new(4, 16000, OUT_RATE)).await;

    probe.emit_live(audio(0.5));
    probe.emit_live(audio(0.5));
    pump(&mut controller, &mut events);
    let output = &probe.outputs()[0];
    output.advance(0.2);

    probe.emit_live(LiveEvent::Interrupted);
    pump(&mut controller, &mut events);
    assert!(!controller.is_agent_speaking());
    assert_eq!(output.stopped().len(), 2);

    // Speech after the interruption starts at the device's current time
    probe.emit_live(audio(0.25));
    pump(&mut controller, &mut events);
    let scheduled = output.scheduled();
    assert!((scheduled[2].start - 0.2).abs() < 1e-9);
}

#[tokio::test]
async fn test_microphone_frames_reach_the_link_in_order() {
    let (mut controller, mut events, probe) = opened(MockBackend::new(4, 16000, OUT_RATE)).await;

    let capture = &probe.captures()[0];
    capture.emit(&[0.25; 4]);
    capture.emit(&[-0.25; 4]);
    capture.emit(&[0.0; 2]);
    pump(&mut controller, &mut events);

    let sent = probe.links()[0].sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].samples(), &[8192; 4]);
    assert_eq!(sent[1].samples(), &[-8192; 4]);
}

#[tokio::test]
async fn test_countdown_ends_the_interview_with_transcript() {
    let (mut controller, mut events, probe) = opened(MockBackend::new(4, 16000, OUT_RATE)).await;

    probe.emit_live(LiveEvent::OutputTranscript("Tell me about".to_string()));
    probe.emit_live(LiveEvent::OutputTranscript(" yourself.".to_string()));
    probe.emit_live(LiveEvent::InputTranscript("I build services.".to_string()));
    pump(&mut controller, &mut events);

    for _ in 0..899 {
        assert!(controller.tick().is_none());
    }
    assert_eq!(controller.remaining(), Duration::from_secs(1));
    let summary = controller.tick().unwrap();

    assert_eq!(summary.reason, EndReason::TimedOut);
    assert_eq!(
        summary.transcript.render(),
        "Interviewer: Tell me about yourself.\nCandidate: I build services."
    );
    assert_eq!(controller.phase(), Phase::Closed);
    assert_eq!(probe.links()[0].closes(), 1);
}

#[tokio::test]
async fn test_stop_twice_then_late_events_are_ignored() {
    let (mut controller, mut events, probe) = opened(MockBackend::new(4, 16000, OUT_RATE)).await;

    let summary = controller.stop().unwrap();
    assert_eq!(summary.reason, EndReason::UserStopped);
    assert!(controller.stop().is_none());

    // Events from the torn-down session arrive after teardown
    probe.emit_live(audio(0.5));
    probe.emit_live(LiveEvent::Closed("bye".to_string()));
    assert!(pump(&mut controller, &mut events).is_none());

    assert_eq!(probe.outputs()[0].scheduled().len(), 0);
    assert_eq!(probe.captures()[0].stops(), 1);
    assert_eq!(probe.outputs()[0].closes(), 1);
    assert_eq!(probe.links()[0].closes(), 1);
}

#[tokio::test]
async fn test_remote_close_ends_session() {
    let (mut controller, mut events, probe) = opened(MockBackend::new(4, 16000, OUT_RATE)).await;

    probe.emit_live(LiveEvent::Closed("server is ending the session".to_string()));
    let summary = pump(&mut controller, &mut events).unwrap();
    assert!(matches!(summary.reason, EndReason::ConnectionLost(_)));
    assert!(!probe.captures()[0].is_capturing());
}

#[tokio::test]
async fn test_denied_microphone_fails_start_without_connecting() {
    let (mut controller, _events, probe) =
        session(MockBackend::new(4, 16000, OUT_RATE).with_microphone_denied());

    let result = controller.start(InterviewRequest::new("Backend Engineer")).await;
    assert!(matches!(result, Err(WajjihniError::CaptureUnavailable { .. })));
    assert_eq!(controller.phase(), Phase::Closed);
    assert!(probe.setups().is_empty());
    assert!(probe.links().is_empty());
    assert!(probe.outputs().is_empty());
}

#[tokio::test]
async fn test_speech_recorded_while_connecting_is_sent_after_open() {
    let (mut controller, mut events, probe) = session(MockBackend::new(4, 16000, OUT_RATE));
    controller.start(InterviewRequest::new("Backend Engineer")).await.unwrap();

    probe.captures()[0].emit(&[0.25; 4]);
    assert!(probe.links()[0].sent().is_empty());

    probe.emit_live(LiveEvent::Opened);
    pump(&mut controller, &mut events);
    let sent = probe.links()[0].sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].samples(), &[8192; 4]);
}

#[tokio::test]
async fn test_second_interview_after_first_closes() {
    let (mut controller, mut events, probe) = opened(MockBackend::new(4, 16000, OUT_RATE)).await;
    controller.stop();

    assert!(controller.start(InterviewRequest::new("Data Analyst")).await.unwrap());
    probe.emit_live(LiveEvent::Opened);
    pump(&mut controller, &mut events);

    assert_eq!(controller.phase(), Phase::Active);
    assert_eq!(controller.remaining(), Duration::from_secs(900));
    assert_eq!(probe.links().len(), 2);
    assert!(probe.setups()[1].system_instruction.contains("Data Analyst"));
    assert!(controller.transcript().is_empty());
}
