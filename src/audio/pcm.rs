//! Linear PCM codec for the live session wire format.
//!
//! Samples travel as 16-bit signed little-endian PCM, base64-encoded so they
//! can be embedded in JSON messages.

use crate::defaults;
use crate::error::{Result, WajjihniError};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Scale between normalized floats and 16-bit samples.
const PCM_SCALE: f32 = 32768.0;

/// One unit of outbound or inbound audio. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPacket {
    samples: Vec<i16>,
    sample_rate: u32,
    data: String,
    mime_type: String,
}

impl AudioPacket {
    /// Builds a packet from 16-bit samples, computing the wire encoding.
    pub fn from_samples(samples: Vec<i16>, sample_rate: u32) -> Self {
        let data = STANDARD.encode(samples_to_bytes(&samples));
        Self {
            samples,
            sample_rate,
            data,
            mime_type: defaults::pcm_mime_type(sample_rate),
        }
    }

    /// Builds a packet from its wire form.
    ///
    /// `mime_type` may carry a `rate=` parameter; when present it must match
    /// `expected_rate`.
    pub fn from_wire(data: String, mime_type: String, expected_rate: u32) -> Result<Self> {
        if let Some(rate) = parse_rate(&mime_type)
            && rate != expected_rate
        {
            return Err(WajjihniError::MalformedPacket {
                message: format!(
                    "expected {}Hz audio, got media type '{}'",
                    expected_rate, mime_type
                ),
            });
        }
        let samples = decode_packet(&data)?;
        Ok(Self {
            samples,
            sample_rate: expected_rate,
            data,
            mime_type,
        })
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Base64 transport representation.
    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Playback duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Converts one normalized sample to 16-bit PCM.
///
/// Out-of-range input saturates at `i16::MIN`/`i16::MAX` through Rust's
/// float-to-int cast, so `1.0` encodes to 32767.
pub fn float_to_i16(sample: f32) -> i16 {
    (sample * PCM_SCALE) as i16
}

/// Encodes a captured frame as an outbound 16kHz packet.
pub fn encode_packet(samples: &[f32]) -> AudioPacket {
    encode_packet_at(samples, defaults::INPUT_SAMPLE_RATE)
}

/// Encodes normalized samples as a packet at an explicit rate.
pub fn encode_packet_at(samples: &[f32], sample_rate: u32) -> AudioPacket {
    let pcm = samples.iter().map(|&s| float_to_i16(s)).collect();
    AudioPacket::from_samples(pcm, sample_rate)
}

/// Decodes a base64 payload into little-endian 16-bit samples.
pub fn decode_packet(encoded: &str) -> Result<Vec<i16>> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| WajjihniError::MalformedPacket {
            message: format!("invalid base64: {}", e),
        })?;
    if bytes.len() % 2 != 0 {
        return Err(WajjihniError::MalformedPacket {
            message: format!("odd byte length {}", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Converts 16-bit samples to normalized floats in [-1, 1).
pub fn to_float_samples(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / PCM_SCALE).collect()
}

/// Extracts the `rate=` parameter of a PCM media type.
pub fn parse_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}
