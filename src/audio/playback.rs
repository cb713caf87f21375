//! Gapless playback scheduling for streamed speech.
//!
//! Inbound packets arrive in irregular bursts. Each one is placed on the output
//! timeline at `max(next_available, device.current_time())`, so consecutive
//! packets play back-to-back with no gap and no overlap, and nothing is
//! pre-buffered when the stream is already behind real time.

use crate::audio::pcm::{AudioPacket, to_float_samples};
use crate::error::{Result, WajjihniError};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Identifies one scheduled playback unit.
pub type SourceId = u64;

/// Notified from the output device when a source plays to its end.
pub type CompletionSink = Box<dyn Fn(SourceId) + Send + Sync>;

/// Trait for audio output devices.
pub trait OutputDevice: Send {
    /// Output clock in seconds since the device was opened.
    fn current_time(&self) -> f64;

    fn sample_rate(&self) -> u32;

    /// Queue `samples` to start playing at `start_at` on the device clock.
    fn schedule(&mut self, id: SourceId, samples: Vec<f32>, start_at: f64) -> Result<()>;

    /// Silence a scheduled or playing source at once. Unknown ids are ignored.
    fn stop_source(&mut self, id: SourceId);

    /// Release the device. Calling `close` twice is a no-op.
    fn close(&mut self) -> Result<()>;
}

/// A decoded unit currently queued or playing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    /// Start on the device clock, in seconds.
    pub start: f64,
    /// Length in seconds.
    pub duration: f64,
}

impl ScheduledSource {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Orders inbound speech on an output device and handles barge-in.
pub struct PlaybackScheduler<D: OutputDevice> {
    device: D,
    live: BTreeMap<SourceId, ScheduledSource>,
    next_available: f64,
    next_id: SourceId,
}

impl<D: OutputDevice> PlaybackScheduler<D> {
    pub fn new(device: D) -> Self {
        let next_available = device.current_time();
        Self {
            device,
            live: BTreeMap::new(),
            next_available,
            next_id: 0,
        }
    }

    /// Decodes a wire payload and schedules it.
    pub fn enqueue_wire(&mut self, data: &str, mime_type: &str) -> Result<ScheduledSource> {
        let packet = AudioPacket::from_wire(
            data.to_string(),
            mime_type.to_string(),
            self.device.sample_rate(),
        )?;
        self.enqueue(&packet)
    }

    /// Schedules a packet directly after everything already queued.
    pub fn enqueue(&mut self, packet: &AudioPacket) -> Result<ScheduledSource> {
        if packet.sample_rate() != self.device.sample_rate() {
            return Err(WajjihniError::MalformedPacket {
                message: format!(
                    "packet at {}Hz cannot play on a {}Hz device",
                    packet.sample_rate(),
                    self.device.sample_rate()
                ),
            });
        }
        let samples = to_float_samples(packet.samples());
        let duration = samples.len() as f64 / self.device.sample_rate() as f64;
        let start = self.next_available.max(self.device.current_time());
        let id = self.next_id;

        self.device.schedule(id, samples, start)?;
        self.next_id += 1;
        self.next_available = start + duration;

        let source = ScheduledSource {
            id,
            start,
            duration,
        };
        self.live.insert(id, source);
        Ok(source)
    }

    /// Records a natural completion.
    ///
    /// Returns true when this completion emptied the live set, meaning the agent
    /// finished speaking.
    pub fn on_source_ended(&mut self, id: SourceId) -> bool {
        self.live.remove(&id).is_some() && self.live.is_empty()
    }

    /// Stops everything scheduled or playing and rewinds the timeline to now.
    ///
    /// Returns the number of sources that were cut off.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.live.len();
        for id in self.live.keys() {
            self.device.stop_source(*id);
        }
        self.live.clear();
        self.next_available = self.device.current_time();
        stopped
    }

    pub fn is_speaking(&self) -> bool {
        !self.live.is_empty()
    }

    pub fn next_available_time(&self) -> f64 {
        self.next_available
    }

    /// Live sources in scheduling order.
    pub fn live_sources(&self) -> impl Iterator<Item = &ScheduledSource> {
        self.live.values()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Interrupts playback and releases the device.
    pub fn close(&mut self) -> Result<()> {
        self.interrupt();
        self.device.close()
    }
}

#[derive(Debug, Default)]
struct VirtualState {
    time: f64,
    scheduled: Vec<ScheduledSource>,
    playing: BTreeMap<SourceId, ScheduledSource>,
    stopped: Vec<SourceId>,
    closes: usize,
    closed: bool,
    fail_close: bool,
}

/// Output device driven by a manually advanced clock.
///
/// Used for deterministic testing and for running a session without speakers.
#[derive(Debug, Clone)]
pub struct VirtualOutput {
    sample_rate: u32,
    state: Arc<Mutex<VirtualState>>,
}

/// Shared handle for inspecting and driving a [`VirtualOutput`].
#[derive(Debug, Clone)]
pub struct VirtualOutputProbe {
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            state: Arc::new(Mutex::new(VirtualState::default())),
        }
    }

    /// Closing releases the device but reports a release failure.
    pub fn with_close_failure(self) -> Self {
        self.probe().with_state(|s| s.fail_close = true);
        self
    }

    pub fn probe(&self) -> VirtualOutputProbe {
        VirtualOutputProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl VirtualOutputProbe {
    fn with_state<R>(&self, f: impl FnOnce(&mut VirtualState) -> R) -> R {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    pub fn time(&self) -> f64 {
        self.with_state(|s| s.time)
    }

    /// Moves the clock forward, returning sources that finished, in end order.
    pub fn advance(&self, seconds: f64) -> Vec<SourceId> {
        self.with_state(|s| {
            s.time += seconds;
            let now = s.time;
            let mut ended: Vec<ScheduledSource> = s
                .playing
                .values()
                .filter(|src| src.end() <= now + 1e-9)
                .copied()
                .collect();
            ended.sort_by(|a, b| a.end().total_cmp(&b.end()));
            for src in &ended {
                s.playing.remove(&src.id);
            }
            ended.into_iter().map(|src| src.id).collect()
        })
    }

    /// Every source ever scheduled, in scheduling order.
    pub fn scheduled(&self) -> Vec<ScheduledSource> {
        self.with_state(|s| s.scheduled.clone())
    }

    /// Ids silenced through `stop_source`.
    pub fn stopped(&self) -> Vec<SourceId> {
        self.with_state(|s| s.stopped.clone())
    }

    /// Number of times the device was actually closed.
    pub fn closes(&self) -> usize {
        self.with_state(|s| s.closes)
    }
}

impl OutputDevice for VirtualOutput {
    fn current_time(&self) -> f64 {
        self.probe().time()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn schedule(&mut self, id: SourceId, samples: Vec<f32>, start_at: f64) -> Result<()> {
        let duration = samples.len() as f64 / self.sample_rate as f64;
        self.probe().with_state(|s| {
            if s.closed {
                return Err(WajjihniError::OutputUnavailable {
                    message: "virtual output is closed".to_string(),
                });
            }
            let source = ScheduledSource {
                id,
                start: start_at,
                duration,
            };
            s.scheduled.push(source);
            s.playing.insert(id, source);
            Ok(())
        })
    }

    fn stop_source(&mut self, id: SourceId) {
        self.probe().with_state(|s| {
            if s.playing.remove(&id).is_some() {
                s.stopped.push(id);
            }
        });
    }

    fn close(&mut self) -> Result<()> {
        self.probe().with_state(|s| {
            if s.closed {
                return Ok(());
            }
            s.closed = true;
            s.closes += 1;
            s.playing.clear();
            if s.fail_close {
                return Err(WajjihniError::DeviceRelease {
                    device: "virtual speaker".to_string(),
                    message: "close failed".to_string(),
                });
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 24000;

    fn packet(seconds: f64) -> AudioPacket {
        let len = (seconds * RATE as f64).round() as usize;
        AudioPacket::from_samples(vec![1000; len], RATE)
    }

    fn scheduler() -> (PlaybackScheduler<VirtualOutput>, VirtualOutputProbe) {
        let output = VirtualOutput::new(RATE);
        let probe = output.probe();
        (PlaybackScheduler::new(output), probe)
    }

    #[test]
    fn test_packets_play_back_to_back_regardless_of_arrival() {
        let (mut scheduler, probe) = scheduler();
        probe.advance(3.0);

        let durations = [0.5, 0.25, 1.0, 0.125];
        let mut sources = Vec::new();
        for (i, d) in durations.iter().enumerate() {
            // Arrival skew shorter than the queued audio must not matter
            if i > 0 {
                probe.advance(0.05);
            }
            sources.push(scheduler.enqueue(&packet(*d)).unwrap());
        }

        assert!((sources[0].start - 3.0).abs() < 1e-9);
        for pair in sources.windows(2) {
            assert!(
                (pair[1].start - (pair[0].start + pair[0].duration)).abs() < 1e-9,
                "gap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
            assert!(pair[1].start >= pair[0].end() - 1e-9, "overlap");
        }
        assert!((scheduler.next_available_time() - (3.0 + 1.875)).abs() < 1e-9);
    }

    #[test]
    fn test_late_packet_starts_at_device_time() {
        let (mut scheduler, probe) = scheduler();
        let first = scheduler.enqueue(&packet(0.5)).unwrap();
        assert_eq!(first.start, 0.0);

        // Stream fell behind: the queue drained before the next packet arrived
        probe.advance(2.0);
        let second = scheduler.enqueue(&packet(0.5)).unwrap();
        assert!((second.start - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_completion_signals_when_last_source_ends() {
        let (mut scheduler, probe) = scheduler();
        scheduler.enqueue(&packet(0.5)).unwrap();
        scheduler.enqueue(&packet(0.5)).unwrap();
        assert!(scheduler.is_speaking());

        let ended = probe.advance(0.5);
        assert_eq!(ended, vec![0]);
        assert!(!scheduler.on_source_ended(0));
        assert!(scheduler.is_speaking());

        let ended = probe.advance(0.5);
        assert_eq!(ended, vec![1]);
        assert!(scheduler.on_source_ended(1));
        assert!(!scheduler.is_speaking());
    }

    #[test]
    fn test_unknown_completion_is_ignored() {
        let (mut scheduler, _) = scheduler();
        assert!(!scheduler.on_source_ended(42));
    }

    #[test]
    fn test_interrupt_stops_everything_and_rewinds() {
        let (mut scheduler, probe) = scheduler();
        scheduler.enqueue(&packet(0.5)).unwrap();
        scheduler.enqueue(&packet(0.5)).unwrap();
        probe.advance(0.2);

        assert_eq!(scheduler.interrupt(), 2);
        assert_eq!(scheduler.live_sources().count(), 0);
        assert!((scheduler.next_available_time() - 0.2).abs() < 1e-9);
        assert_eq!(probe.stopped(), vec![0, 1]);

        // Next packet ignores the discarded timeline
        let next = scheduler.enqueue(&packet(0.5)).unwrap();
        assert!((next.start - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_enqueue_wire_rejects_malformed_payload() {
        let (mut scheduler, probe) = scheduler();
        let result = scheduler.enqueue_wire("AAE=", "audio/pcm;rate=24000");
        assert!(result.is_ok());

        let result = scheduler.enqueue_wire("AAEC", "audio/pcm;rate=24000");
        assert!(matches!(
            result,
            Err(WajjihniError::MalformedPacket { .. })
        ));
        assert_eq!(probe.scheduled().len(), 1);
    }

    #[test]
    fn test_rate_mismatch_is_rejected() {
        let (mut scheduler, _) = scheduler();
        let wrong = AudioPacket::from_samples(vec![0; 16], 16000);
        assert!(scheduler.enqueue(&wrong).is_err());
        assert_eq!(scheduler.next_available_time(), 0.0);
    }

    #[test]
    fn test_close_interrupts_and_releases_once() {
        let (mut scheduler, probe) = scheduler();
        scheduler.enqueue(&packet(0.5)).unwrap();
        scheduler.close().unwrap();
        scheduler.close().unwrap();

        assert!(!scheduler.is_speaking());
        assert_eq!(probe.closes(), 1);
    }
}
