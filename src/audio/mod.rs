//! Audio: PCM codec, microphone capture, gapless playback, level metering.

pub mod pcm;
pub mod playback;
pub mod recorder;
pub mod volume;

#[cfg(feature = "cpal-audio")]
pub mod capture;
#[cfg(feature = "cpal-audio")]
pub mod device;
#[cfg(feature = "cpal-audio")]
pub mod output;
