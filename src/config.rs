use crate::defaults;
use crate::error::{Result, WajjihniError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub interview: InterviewConfig,
    pub audio: AudioConfig,
    pub api: ApiConfig,
}

/// Interview session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InterviewConfig {
    pub duration_secs: u64,
    pub voice: String,
    pub language: String,
    pub transcripts: bool,
    pub evaluate: bool,
}

/// Audio device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub frame_size: usize,
    pub input_sample_rate: u32,
    /// Must match the endpoint's 24kHz speech; `validate` rejects anything else.
    pub output_sample_rate: u32,
    pub volume_fps: u32,
}

/// Remote endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub api_key: Option<String>,
    pub live_model: String,
    pub text_model: String,
    pub endpoint: String,
    pub rest_endpoint: String,
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            duration_secs: defaults::INTERVIEW_DURATION_SECS,
            voice: defaults::VOICE_NAME.to_string(),
            language: defaults::INTERVIEW_LANGUAGE.to_string(),
            transcripts: true,
            evaluate: true,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            frame_size: defaults::FRAME_SIZE,
            input_sample_rate: defaults::INPUT_SAMPLE_RATE,
            output_sample_rate: defaults::OUTPUT_SAMPLE_RATE,
            volume_fps: defaults::VOLUME_FPS,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            live_model: defaults::LIVE_MODEL.to_string(),
            text_model: defaults::TEXT_MODEL.to_string(),
            endpoint: defaults::LIVE_ENDPOINT.to_string(),
            rest_endpoint: defaults::REST_ENDPOINT.to_string(),
        }
    }
}

impl InterviewConfig {
    /// Countdown length as a `Duration`.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults only when the file is missing.
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(WajjihniError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(e) => Err(WajjihniError::ConfigParse {
                message: format!("{}: {}", path.display(), e),
            }),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - WAJJIHNI_API_KEY, then GEMINI_API_KEY → api.api_key
    /// - WAJJIHNI_INPUT_DEVICE → audio.input_device
    /// - WAJJIHNI_OUTPUT_DEVICE → audio.output_device
    pub fn with_env_overrides(mut self) -> Self {
        for key in ["WAJJIHNI_API_KEY", "GEMINI_API_KEY"] {
            if let Ok(value) = std::env::var(key)
                && !value.is_empty()
            {
                self.api.api_key = Some(value);
                break;
            }
        }

        if let Ok(device) = std::env::var("WAJJIHNI_INPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.input_device = Some(device);
        }

        if let Ok(device) = std::env::var("WAJJIHNI_OUTPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.output_device = Some(device);
        }

        self
    }

    /// Reject values the audio pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, bool); 5] = [
            ("interview.duration_secs", self.interview.duration_secs > 0),
            ("audio.frame_size", self.audio.frame_size > 0),
            ("audio.input_sample_rate", self.audio.input_sample_rate > 0),
            ("audio.output_sample_rate", self.audio.output_sample_rate > 0),
            ("audio.volume_fps", self.audio.volume_fps > 0),
        ];
        for (key, ok) in checks {
            if !ok {
                return Err(WajjihniError::ConfigInvalidValue {
                    key: key.to_string(),
                    message: "must be positive".to_string(),
                });
            }
        }
        // Inbound speech is always tagged at this rate
        if self.audio.output_sample_rate != defaults::OUTPUT_SAMPLE_RATE {
            return Err(WajjihniError::ConfigInvalidValue {
                key: "audio.output_sample_rate".to_string(),
                message: format!(
                    "must be {} to match the endpoint's audio",
                    defaults::OUTPUT_SAMPLE_RATE
                ),
            });
        }
        Ok(())
    }

    /// API key, or a connection error explaining how to provide one.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| WajjihniError::Connection {
                message: "no API key configured (set GEMINI_API_KEY or api.api_key)"
                    .to_string(),
            })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/wajjihni/config.toml on Linux
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("wajjihni").join("config.toml"))
            .ok_or_else(|| WajjihniError::Other("could not determine config directory".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Serializes tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: only called with ENV_LOCK held.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_env() {
        for key in [
            "WAJJIHNI_API_KEY",
            "GEMINI_API_KEY",
            "WAJJIHNI_INPUT_DEVICE",
            "WAJJIHNI_OUTPUT_DEVICE",
        ] {
            remove_env(key);
        }
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.interview.duration_secs, 900);
        assert_eq!(config.interview.voice, "Zephyr");
        assert!(config.interview.transcripts);

        assert_eq!(config.audio.frame_size, 512);
        assert_eq!(config.audio.input_sample_rate, 16000);
        assert_eq!(config.audio.output_sample_rate, 24000);
        assert_eq!(config.audio.input_device, None);

        assert_eq!(config.api.api_key, None);
        assert_eq!(config.api.text_model, "gemini-2.5-flash");
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [interview]
            duration_secs = 1200
            voice = "Puck"
            transcripts = false

            [audio]
            input_device = "pulse"
            frame_size = 4096

            [api]
            api_key = "secret"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.interview.duration_secs, 1200);
        assert_eq!(config.interview.voice, "Puck");
        assert!(!config.interview.transcripts);
        assert_eq!(config.audio.input_device, Some("pulse".to_string()));
        assert_eq!(config.audio.frame_size, 4096);
        assert_eq!(config.api.api_key, Some("secret".to_string()));

        // Unset fields keep their defaults
        assert_eq!(config.audio.output_sample_rate, 24000);
        assert_eq!(config.interview.language, "Arabic");
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[audio\nframe_size = ").unwrap();

        assert!(Config::load(temp_file.path()).is_err());
        assert!(matches!(
            Config::load_or_default(temp_file.path()),
            Err(WajjihniError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing = Path::new("/tmp/nonexistent_wajjihni_config_12345.toml");
        let config = Config::load_or_default(missing).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_validate_rejects_unsupported_output_rate() {
        let mut config = Config::default();
        config.audio.output_sample_rate = 48000;
        match config.validate() {
            Err(WajjihniError::ConfigInvalidValue { key, message }) => {
                assert_eq!(key, "audio.output_sample_rate");
                assert!(message.contains("24000"));
            }
            other => panic!("expected invalid value, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_zero_frame_size() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.audio.frame_size = 0;
        match config.validate() {
            Err(WajjihniError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "audio.frame_size");
            }
            other => panic!("expected ConfigInvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_env_override_api_key_prefers_own_variable() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        set_env("GEMINI_API_KEY", "from-gemini");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.api.api_key.as_deref(), Some("from-gemini"));

        set_env("WAJJIHNI_API_KEY", "from-wajjihni");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.api.api_key.as_deref(), Some("from-wajjihni"));

        clear_env();
    }

    #[test]
    fn test_env_override_devices_and_empty_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        set_env("WAJJIHNI_INPUT_DEVICE", "hw:1,0");
        set_env("WAJJIHNI_OUTPUT_DEVICE", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.audio.input_device, Some("hw:1,0".to_string()));
        assert_eq!(config.audio.output_device, None);

        clear_env();
    }

    #[test]
    fn test_require_api_key() {
        let mut config = Config::default();
        assert!(matches!(
            config.require_api_key(),
            Err(WajjihniError::Connection { .. })
        ));

        config.api.api_key = Some("k".to_string());
        assert_eq!(config.require_api_key().unwrap(), "k");
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        if let Ok(path) = Config::default_path() {
            let path_str = path.to_string_lossy();
            assert!(path_str.contains("wajjihni"));
            assert!(path_str.ends_with("config.toml"));
        }
    }
}
