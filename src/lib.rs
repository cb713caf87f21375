//! wajjihni - Career guidance with a live voice mock interview
//!
//! Streams microphone audio to a conversational model, plays its synthesized
//! speech back gaplessly, and scores the conversation afterwards.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod evaluation;
pub mod live;
pub mod session;

// Composition root - needs everything
#[cfg(all(feature = "cpal-audio", feature = "cli"))]
pub mod app;

// Device and transport seams
pub use audio::playback::{OutputDevice, PlaybackScheduler};
pub use audio::recorder::CaptureDevice;
pub use live::{LiveEvent, LiveLink};
pub use session::backend::SessionBackend;

// Session
pub use session::prompt::{InterviewRequest, Transcript};
pub use session::{Phase, SessionController, SessionEvent, SessionStatus, SessionSummary};

// Evaluation
pub use evaluation::{AnalysisResult, InterviewEvaluation, TextClient, evaluate_interview};

// Error handling
pub use error::{Result, WajjihniError};

// Config
pub use config::Config;

/// Package version, suffixed with `+<short hash>` when built from a git checkout.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    option_env!("GIT_HASH")
        .filter(|hash| !hash.is_empty())
        .map_or_else(|| version.to_string(), |hash| format!("{version}+{hash}"))
}
