//! Capture-side abstractions: the device trait, fixed-size framing, and a mock.

use crate::audio::pcm::{AudioPacket, encode_packet_at};
use crate::audio::volume::LevelTap;
use crate::error::{Result, WajjihniError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Receives each encoded frame, in capture order.
pub type FrameSink = Box<dyn FnMut(AudioPacket) + Send>;

/// Trait for microphone devices.
///
/// This trait allows swapping implementations (real audio device vs mock).
pub trait CaptureDevice: Send {
    /// Acquire the microphone and begin recording.
    ///
    /// Samples recorded before [`start`](Self::start) are held, not dropped.
    /// Opening an open device is a no-op.
    ///
    /// # Errors
    /// `CaptureUnavailable` when access is denied or no stream can be built.
    fn open(&mut self) -> Result<()>;

    /// Start delivering encoded frames to `sink` until `stop` is called.
    /// Opens the device first if needed.
    fn start(&mut self, sink: FrameSink) -> Result<()>;

    /// Stop capturing and release the underlying stream.
    ///
    /// Calling `stop` on a device that is not open is a no-op.
    fn stop(&mut self) -> Result<()>;

    /// Shared view of the most recent samples, for level metering.
    fn level_tap(&self) -> LevelTap;
}

/// Splits a continuous sample stream into fixed-size frames.
///
/// Samples that do not fill a whole frame are held until the next push.
#[derive(Debug, Clone)]
pub struct Framer {
    frame_size: usize,
    pending: Vec<f32>,
}

impl Framer {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size: frame_size.max(1),
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Appends samples and returns every frame completed by them.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let wanted = self.frame_size - self.pending.len();
            let take = wanted.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.frame_size {
                frames.push(std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.frame_size),
                ));
            }
        }
        frames
    }

    /// Number of samples waiting for a full frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}

/// Frames, meters and encodes raw capture blocks.
///
/// Shared by the real device's worker thread and the mock.
pub struct FrameEncoder {
    framer: Framer,
    sample_rate: u32,
    tap: LevelTap,
}

impl FrameEncoder {
    pub fn new(frame_size: usize, sample_rate: u32, tap: LevelTap) -> Self {
        Self {
            framer: Framer::new(frame_size),
            sample_rate,
            tap,
        }
    }

    /// Feeds one block of samples and hands every completed frame to `sink`.
    pub fn feed(&mut self, block: &[f32], sink: &mut FrameSink) {
        self.tap.push(block);
        for frame in self.framer.push(block) {
            sink(encode_packet_at(&frame, self.sample_rate));
        }
    }
}

/// Counters shared between a `MockCapture` and the test that owns it.
#[derive(Clone, Default)]
pub struct MockCaptureProbe {
    opens: Arc<AtomicUsize>,
    open: Arc<AtomicBool>,
    held: Arc<Mutex<Vec<f32>>>,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    sink: Arc<Mutex<Option<FrameSink>>>,
    encoder: Arc<Mutex<Option<FrameEncoder>>>,
}

impl std::fmt::Debug for FrameEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameEncoder")
            .field("frame_size", &self.framer.frame_size())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

impl std::fmt::Debug for MockCaptureProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCaptureProbe")
            .field("opens", &self.opens())
            .field("starts", &self.starts())
            .field("stops", &self.stops())
            .finish()
    }
}

impl MockCaptureProbe {
    /// Number of times the microphone was acquired.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// True between a successful `open` and the next `stop`.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Number of times the device was started.
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Number of times an open device was actually released.
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// True while the device holds a sink.
    pub fn is_capturing(&self) -> bool {
        self.sink.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Simulates microphone input. Held while the device is open but not
    /// started, ignored while it is closed.
    pub fn emit(&self, samples: &[f32]) {
        if !self.is_open() {
            return;
        }
        let (Ok(mut sink), Ok(mut encoder)) = (self.sink.lock(), self.encoder.lock()) else {
            return;
        };
        match (sink.as_mut(), encoder.as_mut()) {
            (Some(sink), Some(encoder)) => encoder.feed(samples, sink),
            _ => {
                if let Ok(mut held) = self.held.lock() {
                    held.extend_from_slice(samples);
                }
            }
        }
    }
}

/// Mock microphone for testing
#[derive(Debug, Clone)]
pub struct MockCapture {
    frame_size: usize,
    sample_rate: u32,
    tap: LevelTap,
    probe: MockCaptureProbe,
    should_fail_open: bool,
    should_fail_start: bool,
    should_fail_stop: bool,
}

impl MockCapture {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        Self {
            frame_size,
            sample_rate,
            tap: LevelTap::default(),
            probe: MockCaptureProbe::default(),
            should_fail_open: false,
            should_fail_start: false,
            should_fail_stop: false,
        }
    }

    /// Configure the mock to refuse microphone access
    pub fn with_open_failure(mut self) -> Self {
        self.should_fail_open = true;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on stop
    pub fn with_stop_failure(mut self) -> Self {
        self.should_fail_stop = true;
        self
    }

    /// Handle for driving and inspecting the mock after it is moved away.
    pub fn probe(&self) -> MockCaptureProbe {
        self.probe.clone()
    }
}

impl CaptureDevice for MockCapture {
    fn open(&mut self) -> Result<()> {
        if self.should_fail_open {
            return Err(WajjihniError::CaptureUnavailable {
                message: "permission denied".to_string(),
            });
        }
        if !self.probe.open.swap(true, Ordering::SeqCst) {
            self.probe.opens.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn start(&mut self, mut sink: FrameSink) -> Result<()> {
        if self.should_fail_start {
            return Err(WajjihniError::CaptureUnavailable {
                message: "mock capture refused to start".to_string(),
            });
        }
        self.open()?;
        let mut encoder = FrameEncoder::new(self.frame_size, self.sample_rate, self.tap.clone());
        if let Ok(mut held) = self.probe.held.lock() {
            encoder.feed(&std::mem::take(&mut *held), &mut sink);
        }
        let mut slot = self
            .probe
            .sink
            .lock()
            .map_err(|e| WajjihniError::Other(format!("mock sink poisoned: {}", e)))?;
        *slot = Some(sink);
        if let Ok(mut slot) = self.probe.encoder.lock() {
            *slot = Some(encoder);
        }
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Ok(mut slot) = self.probe.sink.lock() {
            slot.take();
        }
        if let Ok(mut held) = self.probe.held.lock() {
            held.clear();
        }
        if self.probe.open.swap(false, Ordering::SeqCst) {
            self.probe.stops.fetch_add(1, Ordering::SeqCst);
        }
        if self.should_fail_stop {
            return Err(WajjihniError::DeviceRelease {
                device: "mock microphone".to_string(),
                message: "mock stop failure".to_string(),
            });
        }
        Ok(())
    }

    fn level_tap(&self) -> LevelTap {
        self.tap.clone()
    }
}
