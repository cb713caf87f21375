//! Speaking-volume meter for the "who is speaking" indicator.
//!
//! The capture path writes every block into a [`LevelTap`]; the monitor reads the
//! most recent window on each animation frame, runs a small spectrum analysis and
//! reduces it to one scalar. Nothing here feeds back into the audio data path.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::{Arc, Mutex};

/// Samples analysed per animation frame (32ms at 16kHz).
pub const ANALYSER_WINDOW: usize = 512;

/// Decibel range mapped onto the 0..=255 meter scale.
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Weight of the previous frame in the smoothed spectrum.
const SMOOTHING: f32 = 0.8;

/// Shared ring of the most recent captured samples.
#[derive(Debug, Clone)]
pub struct LevelTap {
    samples: Arc<Mutex<VecDeque<f32>>>,
    capacity: usize,
}

impl Default for LevelTap {
    fn default() -> Self {
        Self::with_capacity(ANALYSER_WINDOW)
    }
}

impl LevelTap {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    /// Appends samples, discarding the oldest beyond capacity.
    pub fn push(&self, block: &[f32]) {
        if let Ok(mut samples) = self.samples.lock() {
            let skip = block.len().saturating_sub(self.capacity);
            for &s in &block[skip..] {
                if samples.len() == self.capacity {
                    samples.pop_front();
                }
                samples.push_back(s);
            }
        }
    }

    /// Copy of the buffered samples, oldest first.
    pub fn snapshot(&self) -> Vec<f32> {
        self.samples
            .lock()
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut samples) = self.samples.lock() {
            samples.clear();
        }
    }
}

/// Frequency-domain analyser producing byte-scaled bin magnitudes.
///
/// The forward FFT is planned once for the configured size and reused on
/// every frame.
#[derive(Clone)]
pub struct SpectrumAnalyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
}

impl std::fmt::Debug for SpectrumAnalyser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyser")
            .field("fft_size", &self.window.len())
            .finish()
    }
}

impl SpectrumAnalyser {
    pub fn new(fft_size: usize) -> Self {
        let n = fft_size.max(2);
        let fft = FftPlanner::new().plan_fft_forward(n);
        // Blackman window
        let window = (0..n)
            .map(|i| {
                let x = i as f32 / n as f32;
                0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
            })
            .collect();
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        Self {
            fft,
            window,
            buffer: vec![Complex::default(); n],
            scratch,
            smoothed: vec![0.0; n / 2],
        }
    }

    pub fn bin_count(&self) -> usize {
        self.smoothed.len()
    }

    /// Analyses the most recent window of `samples` (zero-padded at the front
    /// when shorter) and returns one byte-scaled magnitude per bin.
    pub fn byte_frequency_data(&mut self, samples: &[f32]) -> Vec<u8> {
        let n = self.window.len();
        let offset = n.saturating_sub(samples.len());
        let start = samples.len().saturating_sub(n);

        self.buffer.fill(Complex::default());
        for (i, &s) in samples[start..].iter().enumerate() {
            self.buffer[offset + i] = Complex::new(s * self.window[offset + i], 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        self.smoothed
            .iter_mut()
            .zip(&self.buffer)
            .map(|(smoothed, bin)| {
                let magnitude = bin.norm() / n as f32;
                *smoothed = SMOOTHING * *smoothed + (1.0 - SMOOTHING) * magnitude;

                let db = if *smoothed > 0.0 {
                    20.0 * smoothed.log10()
                } else {
                    MIN_DECIBELS
                };
                let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
                scaled.clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|m| *m = 0.0);
    }
}

/// Reduces the capture signal to a single level in 0..=255.
#[derive(Debug, Clone)]
pub struct VolumeMonitor {
    tap: LevelTap,
    analyser: SpectrumAnalyser,
}

impl VolumeMonitor {
    pub fn new(tap: LevelTap) -> Self {
        Self {
            tap,
            analyser: SpectrumAnalyser::new(ANALYSER_WINDOW),
        }
    }

    /// Mean magnitude across frequency bins of the latest window.
    pub fn sample(&mut self) -> f32 {
        let bins = self.analyser.byte_frequency_data(&self.tap.snapshot());
        if bins.is_empty() {
            return 0.0;
        }
        bins.iter().map(|&b| b as f32).sum::<f32>() / bins.len() as f32
    }

    pub fn reset(&mut self) {
        self.analyser.reset();
        self.tap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: f32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / rate).sin())
            .collect()
    }

    #[test]
    fn test_level_tap_keeps_most_recent_samples() {
        let tap = LevelTap::with_capacity(3);
        tap.push(&[1.0, 2.0]);
        tap.push(&[3.0, 4.0]);
        assert_eq!(tap.snapshot(), vec![2.0, 3.0, 4.0]);

        tap.push(&[5.0, 6.0, 7.0, 8.0]);
        assert_eq!(tap.snapshot(), vec![6.0, 7.0, 8.0]);

        tap.clear();
        assert!(tap.snapshot().is_empty());
    }

    #[test]
    fn test_silence_reads_zero() {
        let tap = LevelTap::default();
        tap.push(&vec![0.0; ANALYSER_WINDOW]);
        let mut monitor = VolumeMonitor::new(tap);
        assert_eq!(monitor.sample(), 0.0);
    }

    #[test]
    fn test_empty_tap_reads_zero() {
        let mut monitor = VolumeMonitor::new(LevelTap::default());
        assert_eq!(monitor.sample(), 0.0);
    }

    #[test]
    fn test_louder_signal_reads_higher() {
        let quiet_tap = LevelTap::default();
        quiet_tap.push(&sine(440.0, 16000.0, ANALYSER_WINDOW, 0.01));
        let loud_tap = LevelTap::default();
        loud_tap.push(&sine(440.0, 16000.0, ANALYSER_WINDOW, 0.8));

        let mut quiet = VolumeMonitor::new(quiet_tap);
        let mut loud = VolumeMonitor::new(loud_tap);
        let (mut q, mut l) = (0.0, 0.0);
        for _ in 0..10 {
            q = quiet.sample();
            l = loud.sample();
        }
        assert!(l > q, "loud {} should exceed quiet {}", l, q);
        assert!(l > 0.0);
    }

    #[test]
    fn test_analyser_bin_count_is_half_window() {
        let mut analyser = SpectrumAnalyser::new(64);
        assert_eq!(analyser.bin_count(), 32);
        assert_eq!(analyser.byte_frequency_data(&[0.5; 10]).len(), 32);
    }

    #[test]
    fn test_tone_peaks_in_its_bin() {
        // 64-point window at 16kHz: 250Hz per bin, so 2kHz lands in bin 8
        let mut analyser = SpectrumAnalyser::new(64);
        let tone = sine(2000.0, 16000.0, 64, 0.05);
        let mut bins = Vec::new();
        for _ in 0..20 {
            bins = analyser.byte_frequency_data(&tone);
        }
        let peak = bins
            .iter()
            .enumerate()
            .max_by_key(|(_, b)| **b)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 8);
        assert!(bins[8] > bins[20]);
    }

    #[test]
    fn test_reset_clears_smoothing() {
        let tap = LevelTap::default();
        tap.push(&sine(1000.0, 16000.0, ANALYSER_WINDOW, 0.5));
        let mut monitor = VolumeMonitor::new(tap.clone());
        assert!(monitor.sample() > 0.0);

        monitor.reset();
        assert_eq!(monitor.sample(), 0.0);
    }
}
