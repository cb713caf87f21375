//! Interview session lifecycle.
//!
//! ```text
//! Idle ─start─▶ Connecting ─Opened─▶ Active ─stop/timeout/close/error─▶ Closing ─▶ Closed
//!                    └───────────── stop/failure ──────────────────────────┘
//! Closed ─next start or reset─▶ Idle
//! ```
//!
//! The controller owns every session resource and is driven from one task:
//! device callbacks, the transport reader and the timers only post events into
//! its queue, so playback state is never touched concurrently.

pub mod backend;
pub mod countdown;
pub mod prompt;

use crate::audio::pcm::AudioPacket;
use crate::audio::playback::{PlaybackScheduler, SourceId};
use crate::audio::recorder::CaptureDevice;
use crate::audio::volume::VolumeMonitor;
use crate::config::Config;
use crate::error::{Result, WajjihniError};
use crate::live::{LiveEvent, LiveLink};
use backend::SessionBackend;
use countdown::Countdown;
use prompt::{InterviewRequest, SessionSetup, Speaker, Transcript};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Active,
    Closing,
    Closed,
}

impl Phase {
    /// True while the session holds resources.
    pub fn is_live(self) -> bool {
        matches!(self, Phase::Connecting | Phase::Active)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::Active => "active",
            Phase::Closing => "closing",
            Phase::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// Everything that drives an active session besides user actions and timers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Live(LiveEvent),
    /// One captured frame, ready to send.
    Frame(AudioPacket),
    /// A playback source finished on its own.
    SourceEnded(SourceId),
}

/// An event tagged with the session that produced it.
#[derive(Debug)]
pub struct Dispatch {
    epoch: u64,
    event: SessionEvent,
}

/// Receiving end of the controller's event queue.
#[derive(Debug)]
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<Dispatch>,
}

impl SessionEvents {
    pub async fn recv(&mut self) -> Option<Dispatch> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Dispatch> {
        self.rx.try_recv().ok()
    }
}

#[derive(Clone)]
struct EventTx {
    tx: mpsc::UnboundedSender<Dispatch>,
    epoch: u64,
}

impl EventTx {
    fn emit(&self, event: SessionEvent) {
        if self.tx.send(Dispatch { epoch: self.epoch, event }).is_err() {
            tracing::trace!("session controller gone, dropping event");
        }
    }
}

/// Read-only view for the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub phase: Phase,
    pub agent_speaking: bool,
    /// Candidate speaking level, 0..=255. Zero outside `Active`.
    pub volume: f32,
    pub remaining: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    UserStopped,
    TimedOut,
    /// The endpoint closed the session or the connection failed.
    ConnectionLost(String),
    /// A device or the connection could not be acquired, or failed mid-session.
    Failed(String),
    /// A new interview was started over this one.
    Replaced,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::UserStopped => write!(f, "stopped"),
            EndReason::TimedOut => write!(f, "time is up"),
            EndReason::ConnectionLost(why) => write!(f, "connection lost: {}", why),
            EndReason::Failed(why) => write!(f, "failed: {}", why),
            EndReason::Replaced => write!(f, "replaced by a new interview"),
        }
    }
}

/// Outcome of one interview, produced when it reaches `Closed`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub role: String,
    pub reason: EndReason,
    pub transcript: Transcript,
}

/// Owns one interview at a time and applies the lifecycle transitions.
pub struct SessionController<B: SessionBackend> {
    backend: B,
    config: Config,
    events: mpsc::UnboundedSender<Dispatch>,
    epoch: u64,
    phase: Phase,
    role: Option<String>,
    countdown: Countdown,
    capture: Option<B::Capture>,
    scheduler: Option<PlaybackScheduler<B::Output>>,
    link: Option<B::Link>,
    monitor: Option<VolumeMonitor>,
    agent_speaking: bool,
    volume: f32,
    transcript: Transcript,
    status: watch::Sender<SessionStatus>,
}

impl<B: SessionBackend> SessionController<B> {
    pub fn new(backend: B, config: Config) -> (Self, SessionEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(SessionStatus {
            phase: Phase::Idle,
            agent_speaking: false,
            volume: 0.0,
            remaining: config.interview.duration(),
        });
        let controller = Self {
            backend,
            config,
            events: tx,
            epoch: 0,
            phase: Phase::Idle,
            role: None,
            countdown: Countdown::default(),
            capture: None,
            scheduler: None,
            link: None,
            monitor: None,
            agent_speaking: false,
            volume: 0.0,
            transcript: Transcript::default(),
            status,
        };
        (controller, SessionEvents { rx })
    }

    fn event_tx(&self) -> EventTx {
        EventTx {
            tx: self.events.clone(),
            epoch: self.epoch,
        }
    }

    /// Starts an interview for `request`.
    ///
    /// A closed session goes back to `Idle` first. Returns `Ok(false)`
    /// without doing anything else when the request has no target role. A
    /// live session is torn down. Resources are acquired in order: microphone
    /// (opened and recording), speaker, connection. Any failure releases what
    /// was acquired, leaves the controller `Closed` and is returned here.
    ///
    /// If this future is dropped mid-connect, call [`stop`](Self::stop) to
    /// release the devices acquired so far.
    pub async fn start(&mut self, request: InterviewRequest) -> Result<bool> {
        self.reset();
        let Some(setup) = SessionSetup::for_interview(&request, &self.config) else {
            tracing::debug!("no target role, ignoring start");
            return Ok(false);
        };
        if self.phase.is_live() {
            let replaced = self.teardown(EndReason::Replaced);
            tracing::info!(role = %replaced.role, "previous interview replaced");
        }
        self.reset();

        let role = request.target_role().unwrap_or_default().to_string();
        tracing::info!(role = %role, "starting interview");
        self.role = Some(role);
        self.transcript.clear();
        self.agent_speaking = false;
        self.volume = 0.0;
        self.countdown.arm(self.config.interview.duration());
        self.set_phase(Phase::Connecting);

        let capture = match self.backend.open_capture() {
            Ok(capture) => capture,
            Err(e) => return self.abort_start(e),
        };
        let capture = self.capture.insert(capture);
        if let Err(e) = capture.open() {
            return self.abort_start(e);
        }

        let tx = self.event_tx();
        let on_complete = Box::new(move |id| tx.emit(SessionEvent::SourceEnded(id)));
        let output = match self.backend.open_output(on_complete) {
            Ok(output) => output,
            Err(e) => return self.abort_start(e),
        };
        self.scheduler = Some(PlaybackScheduler::new(output));

        let tx = self.event_tx();
        let live_sink = Arc::new(move |event| tx.emit(SessionEvent::Live(event)));
        let link = match self.backend.connect(&setup, live_sink).await {
            Ok(link) => link,
            Err(e) => return self.abort_start(e),
        };
        self.link = Some(link);
        tracing::debug!("waiting for session acknowledgement");
        Ok(true)
    }

    fn abort_start(&mut self, error: WajjihniError) -> Result<bool> {
        tracing::error!("interview start failed: {}", error);
        self.teardown(EndReason::Failed(error.to_string()));
        Err(error)
    }

    /// User stop. A no-op unless a session is live.
    pub fn stop(&mut self) -> Option<SessionSummary> {
        if !self.phase.is_live() {
            return None;
        }
        Some(self.teardown(EndReason::UserStopped))
    }

    /// `Closed → Idle`. Also happens at the start of the next `start` call.
    pub fn reset(&mut self) {
        if self.phase == Phase::Closed {
            self.set_phase(Phase::Idle);
        }
    }

    /// Applies a queued event if it belongs to the current session.
    pub fn dispatch(&mut self, dispatch: Dispatch) -> Option<SessionSummary> {
        if dispatch.epoch != self.epoch {
            tracing::trace!(event = ?dispatch.event, "dropping event from an ended session");
            return None;
        }
        self.handle(dispatch.event)
    }

    /// Applies one event to the current session.
    ///
    /// Returns the summary when the event ended the session.
    pub fn handle(&mut self, event: SessionEvent) -> Option<SessionSummary> {
        if !self.phase.is_live() {
            return None;
        }
        match event {
            SessionEvent::Live(LiveEvent::Opened) => self.on_opened(),
            SessionEvent::Live(LiveEvent::AudioChunk { data, mime_type }) => {
                self.on_audio(&data, &mime_type)
            }
            SessionEvent::Live(LiveEvent::Interrupted) => {
                if let Some(scheduler) = self.scheduler.as_mut() {
                    let stopped = scheduler.interrupt();
                    tracing::debug!(stopped, "agent interrupted");
                }
                self.agent_speaking = false;
                self.publish();
                None
            }
            SessionEvent::Live(LiveEvent::InputTranscript(text)) => {
                self.transcript.push(Speaker::Candidate, &text);
                None
            }
            SessionEvent::Live(LiveEvent::OutputTranscript(text)) => {
                self.transcript.push(Speaker::Interviewer, &text);
                None
            }
            SessionEvent::Live(LiveEvent::TurnComplete) => {
                tracing::debug!("agent turn complete");
                None
            }
            SessionEvent::Live(LiveEvent::Closed(reason)) => {
                Some(self.teardown(EndReason::ConnectionLost(reason)))
            }
            SessionEvent::Live(LiveEvent::Errored(message)) => {
                tracing::warn!("live session error: {}", message);
                Some(self.teardown(EndReason::ConnectionLost(message)))
            }
            SessionEvent::Frame(packet) => {
                let link = self.link.as_mut()?;
                match link.send_audio(&packet) {
                    Ok(()) => None,
                    Err(e) => Some(self.teardown(EndReason::ConnectionLost(e.to_string()))),
                }
            }
            SessionEvent::SourceEnded(id) => {
                let scheduler = self.scheduler.as_mut()?;
                if scheduler.on_source_ended(id) {
                    self.agent_speaking = false;
                    self.publish();
                }
                None
            }
        }
    }

    fn on_opened(&mut self) -> Option<SessionSummary> {
        if self.phase != Phase::Connecting {
            return None;
        }
        let tx = self.event_tx();
        let capture = self.capture.as_mut()?;
        let sink = Box::new(move |packet| tx.emit(SessionEvent::Frame(packet)));
        if let Err(e) = capture.start(sink) {
            tracing::error!("microphone failed to start: {}", e);
            return Some(self.teardown(EndReason::Failed(e.to_string())));
        }
        self.monitor = Some(VolumeMonitor::new(capture.level_tap()));
        tracing::info!("interview connected");
        self.set_phase(Phase::Active);
        None
    }

    fn on_audio(&mut self, data: &str, mime_type: &str) -> Option<SessionSummary> {
        let scheduler = self.scheduler.as_mut()?;
        match scheduler.enqueue_wire(data, mime_type) {
            Ok(source) => {
                tracing::trace!(id = source.id, start = source.start, "scheduled agent audio");
                if !self.agent_speaking {
                    self.agent_speaking = true;
                    self.publish();
                }
                None
            }
            Err(e @ WajjihniError::MalformedPacket { .. }) => {
                tracing::warn!("dropping inbound audio: {}", e);
                None
            }
            Err(e) => Some(self.teardown(EndReason::Failed(e.to_string()))),
        }
    }

    /// One-second timer tick. Ends the session when the countdown runs out.
    pub fn tick(&mut self) -> Option<SessionSummary> {
        if !self.phase.is_live() {
            return None;
        }
        if self.countdown.tick() {
            return Some(self.teardown(EndReason::TimedOut));
        }
        self.publish();
        None
    }

    /// Samples the speaking level. Only meaningful while `Active`.
    pub fn animation_frame(&mut self) -> f32 {
        self.volume = match (self.phase, self.monitor.as_mut()) {
            (Phase::Active, Some(monitor)) => monitor.sample(),
            _ => 0.0,
        };
        self.publish();
        self.volume
    }

    /// Stops the countdown, interrupts playback, then releases microphone,
    /// speaker and connection. Release failures are logged and skipped.
    fn teardown(&mut self, reason: EndReason) -> SessionSummary {
        tracing::info!(%reason, "ending interview");
        self.set_phase(Phase::Closing);
        self.countdown.disarm();

        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.interrupt();
        }
        self.agent_speaking = false;
        self.monitor = None;
        self.volume = 0.0;

        if let Some(mut capture) = self.capture.take()
            && let Err(e) = capture.stop()
        {
            tracing::warn!("{}", e);
        }
        if let Some(mut scheduler) = self.scheduler.take()
            && let Err(e) = scheduler.close()
        {
            tracing::warn!("{}", e);
        }
        if let Some(mut link) = self.link.take()
            && let Err(e) = link.close()
        {
            tracing::warn!("{}", e);
        }

        // Anything still queued from this session is now stale
        self.epoch += 1;
        self.set_phase(Phase::Closed);

        SessionSummary {
            role: self.role.take().unwrap_or_default(),
            reason,
            transcript: std::mem::take(&mut self.transcript),
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::debug!(from = %self.phase, to = %phase, "session phase");
        }
        self.phase = phase;
        self.publish();
    }

    fn publish(&self) {
        self.status.send_replace(self.status());
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            phase: self.phase,
            agent_speaking: self.agent_speaking,
            volume: self.volume,
            remaining: self.countdown.remaining(),
        }
    }

    /// Status updates, for rendering on another task.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_agent_speaking(&self) -> bool {
        self.agent_speaking
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn remaining(&self) -> Duration {
        self.countdown.remaining()
    }

    /// Transcript of the live session so far.
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn scheduler(&self) -> Option<&PlaybackScheduler<B::Output>> {
        self.scheduler.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
