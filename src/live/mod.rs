//! Streaming connection to the remote conversational endpoint.

pub mod protocol;
pub mod transport;

use crate::audio::pcm::AudioPacket;
use crate::error::{Result, WajjihniError};
use std::sync::{Arc, Mutex};

/// Inbound lifecycle, audio and control events, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// The endpoint accepted the session setup.
    Opened,
    /// Synthesized speech, still in wire form.
    AudioChunk { data: String, mime_type: String },
    /// The agent was cut off by the candidate speaking.
    Interrupted,
    InputTranscript(String),
    OutputTranscript(String),
    TurnComplete,
    Closed(String),
    Errored(String),
}

/// Receives inbound events from the transport's reader task.
pub type LiveEventSink = Arc<dyn Fn(LiveEvent) + Send + Sync>;

/// Send half of an open session.
pub trait LiveLink: Send {
    /// Queues one captured frame for sending.
    ///
    /// Frames sent before the endpoint acknowledged the setup are held, not
    /// dropped, and go out in order once it does.
    fn send_audio(&mut self, packet: &AudioPacket) -> Result<()>;

    /// Closes the connection. Calling `close` twice is a no-op.
    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Default)]
struct RecordingState {
    sent: Vec<AudioPacket>,
    closes: usize,
    closed: bool,
    fail_send: bool,
}

/// Link that records outbound frames instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct RecordingLink {
    state: Arc<Mutex<RecordingState>>,
}

/// Inspection handle for a [`RecordingLink`] moved into a session.
#[derive(Debug, Clone)]
pub struct RecordingLinkProbe {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send fails with a connection error, as a dropped socket would.
    pub fn with_send_failure(self) -> Self {
        self.probe().with_state(|s| s.fail_send = true);
        self
    }

    pub fn probe(&self) -> RecordingLinkProbe {
        RecordingLinkProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl RecordingLinkProbe {
    fn with_state<R>(&self, f: impl FnOnce(&mut RecordingState) -> R) -> R {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    pub fn sent(&self) -> Vec<AudioPacket> {
        self.with_state(|s| s.sent.clone())
    }

    /// Number of times the link was actually closed.
    pub fn closes(&self) -> usize {
        self.with_state(|s| s.closes)
    }

    pub fn is_closed(&self) -> bool {
        self.with_state(|s| s.closed)
    }
}

impl LiveLink for RecordingLink {
    fn send_audio(&mut self, packet: &AudioPacket) -> Result<()> {
        self.probe().with_state(|s| {
            if s.closed || s.fail_send {
                return Err(WajjihniError::Connection {
                    message: "link is closed".to_string(),
                });
            }
            s.sent.push(packet.clone());
            Ok(())
        })
    }

    fn close(&mut self) -> Result<()> {
        self.probe().with_state(|s| {
            if !s.closed {
                s.closed = true;
                s.closes += 1;
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_link_keeps_send_order() {
        let mut link = RecordingLink::new();
        let probe = link.probe();
        link.send_audio(&AudioPacket::from_samples(vec![1], 16000)).unwrap();
        link.send_audio(&AudioPacket::from_samples(vec![2], 16000)).unwrap();

        let sent = probe.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].samples(), &[1]);
        assert_eq!(sent[1].samples(), &[2]);
    }

    #[test]
    fn test_recording_link_close_is_idempotent() {
        let mut link = RecordingLink::new();
        let probe = link.probe();
        link.close().unwrap();
        link.close().unwrap();
        assert_eq!(probe.closes(), 1);
        assert!(link.send_audio(&AudioPacket::from_samples(vec![0], 16000)).is_err());
    }
}
