//! Resource acquisition for the session controller.

use crate::audio::playback::{CompletionSink, OutputDevice, VirtualOutput, VirtualOutputProbe};
use crate::audio::recorder::{CaptureDevice, MockCapture, MockCaptureProbe};
use crate::error::{Result, WajjihniError};
use crate::live::{LiveEventSink, LiveLink, RecordingLink, RecordingLinkProbe};
use crate::session::prompt::SessionSetup;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Opens the three resources one interview holds.
///
/// The controller acquires them in declaration order; a failure at any step
/// aborts the start and releases what was already acquired.
#[async_trait]
pub trait SessionBackend: Send {
    type Capture: CaptureDevice;
    type Output: OutputDevice;
    type Link: LiveLink;

    fn open_capture(&mut self) -> Result<Self::Capture>;

    /// Opens the speaker. `on_complete` is called as each scheduled source
    /// plays to its end.
    fn open_output(&mut self, on_complete: CompletionSink) -> Result<Self::Output>;

    async fn connect(&mut self, setup: &SessionSetup, events: LiveEventSink) -> Result<Self::Link>;
}

/// Real devices and the remote endpoint.
#[cfg(feature = "cpal-audio")]
pub struct DeviceBackend {
    client: crate::live::transport::LiveClient,
    audio: crate::config::AudioConfig,
}

#[cfg(feature = "cpal-audio")]
impl DeviceBackend {
    pub fn new(
        client: crate::live::transport::LiveClient,
        audio: crate::config::AudioConfig,
    ) -> Self {
        Self { client, audio }
    }
}

#[cfg(feature = "cpal-audio")]
#[async_trait]
impl SessionBackend for DeviceBackend {
    type Capture = crate::audio::capture::CpalCapture;
    type Output = crate::audio::output::CpalOutput;
    type Link = crate::live::transport::LiveConnection;

    fn open_capture(&mut self) -> Result<Self::Capture> {
        crate::audio::capture::CpalCapture::new(
            self.audio.input_device.as_deref(),
            self.audio.input_sample_rate,
            self.audio.frame_size,
        )
    }

    fn open_output(&mut self, on_complete: CompletionSink) -> Result<Self::Output> {
        crate::audio::output::CpalOutput::new(
            self.audio.output_device.as_deref(),
            self.audio.output_sample_rate,
            on_complete,
        )
    }

    async fn connect(&mut self, setup: &SessionSetup, events: LiveEventSink) -> Result<Self::Link> {
        self.client.connect(setup, events).await
    }
}

#[derive(Default)]
struct MockLedger {
    captures: Vec<MockCaptureProbe>,
    outputs: Vec<VirtualOutputProbe>,
    links: Vec<RecordingLinkProbe>,
    setups: Vec<SessionSetup>,
    live_sinks: Vec<LiveEventSink>,
    completion_sinks: Vec<Arc<CompletionSink>>,
}

/// Fake backend handing out fresh mock devices for every session.
pub struct MockBackend {
    frame_size: usize,
    input_rate: u32,
    output_rate: u32,
    fail_capture: bool,
    deny_microphone: bool,
    fail_capture_stop: bool,
    fail_output: bool,
    fail_output_close: bool,
    fail_connect: bool,
    fail_send: bool,
    ledger: Arc<Mutex<MockLedger>>,
}

/// Inspects what a [`MockBackend`] handed out, oldest session first.
#[derive(Clone)]
pub struct MockBackendProbe {
    ledger: Arc<Mutex<MockLedger>>,
}

impl MockBackend {
    pub fn new(frame_size: usize, input_rate: u32, output_rate: u32) -> Self {
        Self {
            frame_size,
            input_rate,
            output_rate,
            fail_capture: false,
            deny_microphone: false,
            fail_capture_stop: false,
            fail_output: false,
            fail_output_close: false,
            fail_connect: false,
            fail_send: false,
            ledger: Arc::new(Mutex::new(MockLedger::default())),
        }
    }

    pub fn with_capture_failure(mut self) -> Self {
        self.fail_capture = true;
        self
    }

    /// The microphone exists but access to it is refused.
    pub fn with_microphone_denied(mut self) -> Self {
        self.deny_microphone = true;
        self
    }

    /// Releasing the microphone reports an error.
    pub fn with_capture_stop_failure(mut self) -> Self {
        self.fail_capture_stop = true;
        self
    }

    /// Closing the speaker reports an error.
    pub fn with_output_close_failure(mut self) -> Self {
        self.fail_output_close = true;
        self
    }

    /// Every outbound frame fails to send.
    pub fn with_send_failure(mut self) -> Self {
        self.fail_send = true;
        self
    }

    pub fn with_output_failure(mut self) -> Self {
        self.fail_output = true;
        self
    }

    pub fn with_connect_failure(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn probe(&self) -> MockBackendProbe {
        MockBackendProbe {
            ledger: Arc::clone(&self.ledger),
        }
    }

    fn record(&self, f: impl FnOnce(&mut MockLedger)) {
        let mut ledger = match self.ledger.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut ledger);
    }
}

impl MockBackendProbe {
    fn read<R>(&self, f: impl FnOnce(&MockLedger) -> R) -> R {
        let ledger = match self.ledger.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&ledger)
    }

    pub fn captures(&self) -> Vec<MockCaptureProbe> {
        self.read(|l| l.captures.clone())
    }

    pub fn outputs(&self) -> Vec<VirtualOutputProbe> {
        self.read(|l| l.outputs.clone())
    }

    pub fn links(&self) -> Vec<RecordingLinkProbe> {
        self.read(|l| l.links.clone())
    }

    /// Setups passed to `connect`, including failed attempts.
    pub fn setups(&self) -> Vec<SessionSetup> {
        self.read(|l| l.setups.clone())
    }

    /// Delivers an event through the most recent session's live sink, the
    /// way the transport's reader task would.
    pub fn emit_live(&self, event: crate::live::LiveEvent) {
        if let Some(sink) = self.read(|l| l.live_sinks.last().cloned()) {
            sink(event);
        }
    }

    /// Reports a finished source through the most recent output's sink.
    pub fn complete_source(&self, id: crate::audio::playback::SourceId) {
        if let Some(sink) = self.read(|l| l.completion_sinks.last().cloned()) {
            sink(id);
        }
    }
}

#[async_trait]
impl SessionBackend for MockBackend {
    type Capture = MockCapture;
    type Output = VirtualOutput;
    type Link = RecordingLink;

    fn open_capture(&mut self) -> Result<MockCapture> {
        if self.fail_capture {
            return Err(WajjihniError::CaptureUnavailable {
                message: "permission denied".to_string(),
            });
        }
        let mut capture = MockCapture::new(self.frame_size, self.input_rate);
        if self.deny_microphone {
            capture = capture.with_open_failure();
        }
        if self.fail_capture_stop {
            capture = capture.with_stop_failure();
        }
        self.record(|l| l.captures.push(capture.probe()));
        Ok(capture)
    }

    fn open_output(&mut self, on_complete: CompletionSink) -> Result<VirtualOutput> {
        if self.fail_output {
            return Err(WajjihniError::OutputUnavailable {
                message: "no speaker".to_string(),
            });
        }
        let mut output = VirtualOutput::new(self.output_rate);
        if self.fail_output_close {
            output = output.with_close_failure();
        }
        self.record(|l| {
            l.outputs.push(output.probe());
            l.completion_sinks.push(Arc::new(on_complete));
        });
        Ok(output)
    }

    async fn connect(&mut self, setup: &SessionSetup, events: LiveEventSink) -> Result<RecordingLink> {
        self.record(|l| l.setups.push(setup.clone()));
        if self.fail_connect {
            return Err(WajjihniError::Connection {
                message: "handshake rejected".to_string(),
            });
        }
        let mut link = RecordingLink::new();
        if self.fail_send {
            link = link.with_send_failure();
        }
        self.record(|l| {
            l.links.push(link.probe());
            l.live_sinks.push(events);
        });
        Ok(link)
    }
}
