//! CPAL device discovery shared by capture and playback.

use crate::error::{Result, WajjihniError};
use cpal::traits::{DeviceTrait, HostTrait};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// CPAL probes several backends (ALSA, JACK, PipeWire) while enumerating and
/// they print harmless but confusing messages.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore fd 2. Safe as long as no
/// other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Device names preferred on PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse"];

/// Device name patterns never useful for a voice call.
const FILTERED_PATTERNS: &[&str] = &["surround", "front:", "rear:", "center:", "side:", "s/pdif"];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES.iter().any(|pref| lower.contains(pref))
}

/// Direction of an audio endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Input => "microphone",
            Direction::Output => "speaker",
        }
    }

    fn unavailable(self, message: String) -> WajjihniError {
        match self {
            Direction::Input => WajjihniError::CaptureUnavailable { message },
            Direction::Output => WajjihniError::OutputUnavailable { message },
        }
    }
}

/// Usable device names for one direction, recommended ones marked.
pub fn list_devices(direction: Direction) -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        match direction {
            Direction::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
            Direction::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
        }
    })
    .map_err(|e| direction.unavailable(format!("failed to enumerate devices: {}", e)))?;

    Ok(devices
        .iter()
        .filter_map(|device| device.name().ok())
        .filter(|name| !should_filter_device(name))
        .map(|name| {
            if is_preferred_device(&name) {
                format!("{} [recommended]", name)
            } else {
                name
            }
        })
        .collect())
}

/// Finds a device by exact name, or the best default when `name` is `None`.
///
/// The default prefers PipeWire/PulseAudio so the desktop's routing is
/// respected, then falls back to the host default.
pub fn find_device(direction: Direction, name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices: Vec<cpal::Device> = match direction {
            Direction::Input => host.input_devices().map(|d| d.collect()),
            Direction::Output => host.output_devices().map(|d| d.collect()),
        }
        .map_err(|e| direction.unavailable(format!("failed to enumerate devices: {}", e)))?;

        if let Some(wanted) = name {
            return devices
                .into_iter()
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| direction.unavailable(format!("{} '{}' not found", direction.label(), wanted)));
        }

        if let Some(device) = devices
            .into_iter()
            .find(|d| d.name().map(|n| is_preferred_device(&n)).unwrap_or(false))
        {
            return Ok(device);
        }

        let default = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        default.ok_or_else(|| direction.unavailable(format!("no default {}", direction.label())))
    })
}

/// Wrapper making `cpal::Stream` movable across threads.
///
/// SAFETY: the stream is only touched by the owning device, which is itself
/// accessed from one thread at a time.
pub(crate) struct SendableStream(pub(crate) cpal::Stream);

unsafe impl Send for SendableStream {}
