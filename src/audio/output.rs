//! Speaker output using CPAL.
//!
//! Scheduled sources live on a sample-accurate [`Timeline`] shared with the
//! CPAL render callback. The callback runs on a realtime OS thread, so the
//! timeline sits behind a mutex and completions are reported through a
//! non-blocking [`CompletionSink`].

use crate::audio::device::{Direction, SendableStream, find_device};
use crate::audio::playback::{CompletionSink, OutputDevice, SourceId};
use crate::error::{Result, WajjihniError};
use cpal::traits::{DeviceTrait, StreamTrait};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct TimelineSource {
    id: SourceId,
    /// First logical sample.
    start: u64,
    samples: Vec<f32>,
}

impl TimelineSource {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Mixes scheduled sources onto the device clock.
///
/// Positions are counted in logical samples at the session output rate; when
/// the device runs at another rate each device frame maps onto the nearest
/// logical sample.
#[derive(Debug)]
pub struct Timeline {
    device_frames: u64,
    /// Logical samples per device frame.
    ratio: f64,
    sources: Vec<TimelineSource>,
}

impl Timeline {
    pub fn new(logical_rate: u32, device_rate: u32) -> Self {
        Self {
            device_frames: 0,
            ratio: logical_rate as f64 / device_rate.max(1) as f64,
            sources: Vec::new(),
        }
    }

    /// Current position in logical samples.
    pub fn position(&self) -> u64 {
        (self.device_frames as f64 * self.ratio).floor() as u64
    }

    pub fn add(&mut self, id: SourceId, start: u64, samples: Vec<f32>) {
        self.sources.push(TimelineSource { id, start, samples });
    }

    pub fn remove(&mut self, id: SourceId) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.id != id);
        self.sources.len() != before
    }

    pub fn clear(&mut self) {
        self.sources.clear();
    }

    /// Renders interleaved output and returns the sources that finished.
    pub fn render(&mut self, out: &mut [f32], channels: usize) -> Vec<SourceId> {
        let channels = channels.max(1);
        for (i, frame) in out.chunks_mut(channels).enumerate() {
            let pos = ((self.device_frames + i as u64) as f64 * self.ratio).floor() as u64;
            let mut mix = 0.0f32;
            for src in &self.sources {
                if pos >= src.start
                    && let Some(&s) = src.samples.get((pos - src.start) as usize)
                {
                    mix += s;
                }
            }
            frame.fill(mix.clamp(-1.0, 1.0));
        }
        self.device_frames += (out.len() / channels) as u64;

        let now = self.position();
        let mut ended: Vec<&TimelineSource> =
            self.sources.iter().filter(|s| s.end() <= now).collect();
        ended.sort_by_key(|s| s.end());
        let ended: Vec<SourceId> = ended.into_iter().map(|s| s.id).collect();
        self.sources.retain(|s| s.end() > now);
        ended
    }
}

/// Speaker output at a fixed logical rate (24kHz mono for the live session).
pub struct CpalOutput {
    stream: Option<SendableStream>,
    timeline: Arc<Mutex<Timeline>>,
    sample_rate: u32,
}

impl CpalOutput {
    /// Opens the named speaker, or the best default, and starts rendering.
    ///
    /// # Errors
    /// `OutputUnavailable` when no usable output device or config exists.
    pub fn new(
        device_name: Option<&str>,
        sample_rate: u32,
        on_complete: CompletionSink,
    ) -> Result<Self> {
        let device = find_device(Direction::Output, device_name)?;
        let unavailable = |message: String| WajjihniError::OutputUnavailable { message };

        let preferred = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let on_complete = Arc::new(on_complete);

        let preferred_timeline = Arc::new(Mutex::new(Timeline::new(sample_rate, sample_rate)));
        let built = build_render_stream(
            &device,
            &preferred,
            Arc::clone(&preferred_timeline),
            Arc::clone(&on_complete),
        );

        let (stream, timeline) = match built {
            Ok(stream) => (stream, preferred_timeline),
            Err(e) => {
                tracing::debug!("preferred output config rejected: {}", e);
                let native = device
                    .default_output_config()
                    .map_err(|e| unavailable(format!("failed to query output config: {}", e)))?;
                if native.sample_format() != cpal::SampleFormat::F32 {
                    return Err(unavailable(format!(
                        "unsupported output sample format {:?}",
                        native.sample_format()
                    )));
                }
                let config: cpal::StreamConfig = native.into();
                tracing::info!(
                    channels = config.channels,
                    rate = config.sample_rate.0,
                    "using native speaker format"
                );
                let timeline =
                    Arc::new(Mutex::new(Timeline::new(sample_rate, config.sample_rate.0)));
                let stream =
                    build_render_stream(&device, &config, Arc::clone(&timeline), on_complete)
                        .map_err(|e| unavailable(format!("failed to build output stream: {}", e)))?;
                (stream, timeline)
            }
        };

        stream
            .play()
            .map_err(|e| unavailable(format!("failed to start output stream: {}", e)))?;

        Ok(Self {
            stream: Some(SendableStream(stream)),
            timeline,
            sample_rate,
        })
    }

    fn with_timeline<R>(&self, f: impl FnOnce(&mut Timeline) -> R) -> R {
        let mut timeline = match self.timeline.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut timeline)
    }
}

fn build_render_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    timeline: Arc<Mutex<Timeline>>,
    on_complete: Arc<CompletionSink>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError> {
    let channels = config.channels as usize;
    device.build_output_stream(
        config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let ended = match timeline.lock() {
                Ok(mut t) => t.render(data, channels),
                Err(_) => {
                    data.fill(0.0);
                    Vec::new()
                }
            };
            for id in ended {
                on_complete(id);
            }
        },
        |err: cpal::StreamError| tracing::warn!("speaker stream error: {}", err),
        None,
    )
}

impl OutputDevice for CpalOutput {
    fn current_time(&self) -> f64 {
        self.with_timeline(|t| t.position()) as f64 / self.sample_rate as f64
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn schedule(&mut self, id: SourceId, samples: Vec<f32>, start_at: f64) -> Result<()> {
        if self.stream.is_none() {
            return Err(WajjihniError::OutputUnavailable {
                message: "speaker already closed".to_string(),
            });
        }
        let start = (start_at * self.sample_rate as f64).round().max(0.0) as u64;
        self.with_timeline(|t| t.add(id, start, samples));
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) {
        self.with_timeline(|t| t.remove(id));
    }

    fn close(&mut self) -> Result<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        self.with_timeline(|t| t.clear());
        let paused = stream.0.pause();
        drop(stream);
        paused.map_err(|e| WajjihniError::DeviceRelease {
            device: "speaker".to_string(),
            message: e.to_string(),
        })
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("{}", e);
        }
    }
}
