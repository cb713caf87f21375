//! Error types for wajjihni.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WajjihniError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio device errors
    #[error("Microphone unavailable: {message}")]
    CaptureUnavailable { message: String },

    #[error("Audio output unavailable: {message}")]
    OutputUnavailable { message: String },

    #[error("Failed to release {device}: {message}")]
    DeviceRelease { device: String, message: String },

    // Live session errors
    #[error("Live connection error: {message}")]
    Connection { message: String },

    #[error("Malformed audio packet: {message}")]
    MalformedPacket { message: String },

    #[error("Live protocol error: {message}")]
    Protocol { message: String },

    // Text generation errors
    #[error("Text generation failed: {message}")]
    Generation { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl WajjihniError {
    /// True for errors that abort a session start before it reaches `Active`.
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            WajjihniError::CaptureUnavailable { .. }
                | WajjihniError::OutputUnavailable { .. }
                | WajjihniError::Connection { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, WajjihniError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_capture_unavailable_display() {
        let error = WajjihniError::CaptureUnavailable {
            message: "permission denied".to_string(),
        };
        assert_eq!(error.to_string(), "Microphone unavailable: permission denied");
    }

    #[test]
    fn test_connection_display() {
        let error = WajjihniError::Connection {
            message: "handshake rejected".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Live connection error: handshake rejected"
        );
    }

    #[test]
    fn test_malformed_packet_display() {
        let error = WajjihniError::MalformedPacket {
            message: "odd byte length 3".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Malformed audio packet: odd byte length 3"
        );
    }

    #[test]
    fn test_device_release_display() {
        let error = WajjihniError::DeviceRelease {
            device: "microphone".to_string(),
            message: "stream already closed".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to release microphone: stream already closed"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = WajjihniError::ConfigInvalidValue {
            key: "audio.frame_size".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for audio.frame_size: must be positive"
        );
    }

    #[test]
    fn test_startup_failures() {
        assert!(
            WajjihniError::CaptureUnavailable {
                message: String::new()
            }
            .is_startup_failure()
        );
        assert!(
            WajjihniError::Connection {
                message: String::new()
            }
            .is_startup_failure()
        );
        assert!(
            !WajjihniError::MalformedPacket {
                message: String::new()
            }
            .is_startup_failure()
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: WajjihniError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: WajjihniError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<WajjihniError>();
        assert_sync::<WajjihniError>();
    }
}
