//! Microphone capture using CPAL (Cross-Platform Audio Library).
//!
//! The CPAL data callback only copies samples into a channel. A dedicated
//! worker thread does the framing, metering and PCM encoding, so the realtime
//! callback never blocks on the rest of the session.

use crate::audio::device::{Direction, SendableStream, find_device};
use crate::audio::recorder::{CaptureDevice, FrameEncoder, FrameSink};
use crate::audio::volume::LevelTap;
use crate::error::{Result, WajjihniError};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::thread::{self, JoinHandle};

/// Microphone capture producing fixed-size 16-bit PCM frames.
///
/// Tries mono f32 at the target rate first, then mono i16, then the device's
/// native config with software down-mixing and resampling.
pub struct CpalCapture {
    device: cpal::Device,
    sample_rate: u32,
    frame_size: usize,
    tap: LevelTap,
    stream: Option<SendableStream>,
    /// Blocks recorded since `open`, drained by the worker once started.
    recorded: Option<Receiver<Vec<f32>>>,
    worker: Option<JoinHandle<()>>,
}

impl CpalCapture {
    /// Selects the named microphone, or the best default. The stream is only
    /// built by [`CaptureDevice::open`].
    ///
    /// # Errors
    /// `CaptureUnavailable` when no matching input device exists.
    pub fn new(device_name: Option<&str>, sample_rate: u32, frame_size: usize) -> Result<Self> {
        let device = find_device(Direction::Input, device_name)?;
        if let Ok(name) = device.name() {
            tracing::debug!(device = %name, "selected microphone");
        }
        Ok(Self {
            device,
            sample_rate,
            frame_size,
            tap: LevelTap::default(),
            stream: None,
            recorded: None,
            worker: None,
        })
    }

    fn build_stream(&self, tx: Sender<Vec<f32>>) -> Result<cpal::Stream> {
        let preferred = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let err_callback = |err: cpal::StreamError| tracing::warn!("microphone stream error: {}", err);

        let f32_tx = tx.clone();
        if let Ok(stream) = self.device.build_input_stream(
            &preferred,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Receiver gone means capture is shutting down
                if f32_tx.send(data.to_vec()).is_err() {
                    return;
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let i16_tx = tx.clone();
        if let Ok(stream) = self.device.build_input_stream(
            &preferred,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let block = data.iter().map(|&s| s as f32 / 32768.0).collect();
                if i16_tx.send(block).is_err() {
                    return;
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native(tx)
    }

    /// Capture at the device's native config and convert in software.
    fn build_stream_native(&self, tx: Sender<Vec<f32>>) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| WajjihniError::CaptureUnavailable {
                    message: format!("failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::info!(
            channels = native_channels,
            rate = native_rate,
            format = ?default_config.sample_format(),
            "using native microphone format, converting in software"
        );

        let err_callback = |err: cpal::StreamError| tracing::warn!("microphone stream error: {}", err);

        let stream = match default_config.sample_format() {
            SampleFormat::F32 => self.device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let block = to_mono_resampled(data, native_channels, native_rate, target_rate);
                    if tx.send(block).is_err() {
                        return;
                    }
                },
                err_callback,
                None,
            ),
            SampleFormat::I16 => self.device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let floats: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                    let block =
                        to_mono_resampled(&floats, native_channels, native_rate, target_rate);
                    if tx.send(block).is_err() {
                        return;
                    }
                },
                err_callback,
                None,
            ),
            fmt => {
                return Err(WajjihniError::CaptureUnavailable {
                    message: format!(
                        "unsupported native sample format {:?}; pick another input device",
                        fmt
                    ),
                });
            }
        };
        stream.map_err(|e| WajjihniError::CaptureUnavailable {
            message: format!("failed to build native input stream: {}", e),
        })
    }
}

/// Down-mix interleaved audio to mono and resample linearly to `target_rate`.
pub fn to_mono_resampled(
    samples: &[f32],
    channels: usize,
    source_rate: u32,
    target_rate: u32,
) -> Vec<f32> {
    let channels = channels.max(1);
    let mono: Vec<f32> = samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();

    if source_rate == target_rate || mono.is_empty() {
        return mono;
    }

    let ratio = source_rate as f64 / target_rate as f64;
    let out_len = (mono.len() as f64 / ratio).floor() as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = mono[idx.min(mono.len() - 1)];
            let b = mono[(idx + 1).min(mono.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

fn run_worker(rx: Receiver<Vec<f32>>, mut encoder: FrameEncoder, mut sink: FrameSink) {
    // Ends when the stream (and with it the last sender) is dropped
    for block in rx {
        encoder.feed(&block, &mut sink);
    }
    tracing::debug!("capture worker finished");
}

impl CaptureDevice for CpalCapture {
    fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let (tx, rx) = unbounded();
        let stream = self.build_stream(tx)?;
        stream.play().map_err(|e| WajjihniError::CaptureUnavailable {
            message: format!("failed to start microphone stream: {}", e),
        })?;

        self.stream = Some(SendableStream(stream));
        self.recorded = Some(rx);
        tracing::debug!("microphone open");
        Ok(())
    }

    fn start(&mut self, sink: FrameSink) -> Result<()> {
        self.open()?;
        let Some(rx) = self.recorded.take() else {
            return Ok(());
        };

        let encoder = FrameEncoder::new(self.frame_size, self.sample_rate, self.tap.clone());
        let worker = thread::Builder::new()
            .name("wajjihni-capture".to_string())
            .spawn(move || run_worker(rx, encoder, sink))?;
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.recorded = None;
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        let paused = stream.0.pause();
        // Dropping the stream drops the callback's sender and ends the worker
        drop(stream);

        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::warn!("capture worker panicked");
        }

        paused.map_err(|e| WajjihniError::DeviceRelease {
            device: "microphone".to_string(),
            message: e.to_string(),
        })
    }

    fn level_tap(&self) -> LevelTap {
        self.tap.clone()
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("{}", e);
        }
    }
}
