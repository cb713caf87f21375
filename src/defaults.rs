//! Default configuration constants for wajjihni.
//!
//! Shared by the config layer, the audio pipeline and the live session.

/// Capture sample rate in Hz. The live endpoint expects 16kHz mono PCM input.
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Playback sample rate in Hz. Synthesized speech arrives as 24kHz mono PCM.
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Samples per outbound frame (32ms at 16kHz).
pub const FRAME_SIZE: usize = 512;

/// Interview countdown in seconds (15 minutes).
pub const INTERVIEW_DURATION_SECS: u64 = 15 * 60;

/// Prebuilt voice used by the interviewer.
pub const VOICE_NAME: &str = "Zephyr";

/// Language the interviewer speaks.
pub const INTERVIEW_LANGUAGE: &str = "Arabic";

/// Volume monitor cadence (animation frames per second).
pub const VOLUME_FPS: u32 = 60;

/// Model used for the live audio session.
pub const LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Model used for plain text generation (evaluation).
pub const TEXT_MODEL: &str = "gemini-2.5-flash";

/// WebSocket endpoint for bidirectional generate-content sessions.
pub const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// REST base URL for text generation.
pub const REST_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Media type of a PCM payload at the given sample rate.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_mime_type_matches_wire_tag() {
        assert_eq!(pcm_mime_type(INPUT_SAMPLE_RATE), "audio/pcm;rate=16000");
        assert_eq!(pcm_mime_type(OUTPUT_SAMPLE_RATE), "audio/pcm;rate=24000");
    }

    #[test]
    fn frame_duration_is_low_latency() {
        let frame_ms = FRAME_SIZE as f64 * 1000.0 / INPUT_SAMPLE_RATE as f64;
        assert!(frame_ms <= 32.0, "frame is {}ms", frame_ms);
    }
}
