//! WebSocket transport for live sessions.
//!
//! The socket is split into a reader task, which turns server messages into
//! [`LiveEvent`]s, and a writer task, which drains the outbound frame queue.
//! The writer holds every frame until the server acknowledges the setup.

use crate::audio::pcm::AudioPacket;
use crate::config::Config;
use crate::error::{Result, WajjihniError};
use crate::live::protocol::{RealtimeInputMessage, ServerMessage, SetupMessage};
use crate::live::{LiveEvent, LiveEventSink, LiveLink};
use crate::session::prompt::SessionSetup;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens live sessions against one endpoint with one API key.
#[derive(Debug, Clone)]
pub struct LiveClient {
    api_key: String,
    endpoint: String,
}

impl LiveClient {
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        }
    }

    /// # Errors
    /// `Connection` when no API key is configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.require_api_key()?, config.api.endpoint.clone()))
    }

    fn url(&self) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.endpoint, separator, self.api_key)
    }

    /// Opens the socket, sends `setup`, and starts the reader and writer.
    ///
    /// Returns once the setup message is on the wire; the endpoint's
    /// acknowledgement arrives later as [`LiveEvent::Opened`].
    pub async fn connect(&self, setup: &SessionSetup, events: LiveEventSink) -> Result<LiveConnection> {
        let setup_json = SetupMessage::new(setup).to_json()?;

        let (socket, response) = tokio_tungstenite::connect_async(self.url())
            .await
            .map_err(|e| WajjihniError::Connection {
                message: format!("failed to open live session: {}", redact(&e.to_string(), &self.api_key)),
            })?;
        tracing::debug!(status = %response.status(), "live socket open");

        let (mut write, read) = socket.split();
        write
            .send(Message::Text(setup_json.into()))
            .await
            .map_err(|e| WajjihniError::Connection {
                message: format!("failed to send session setup: {}", e),
            })?;
        tracing::info!(model = %setup.model, voice = %setup.voice, "session setup sent");

        let (ready_tx, ready_rx) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(run_reader(read, events, ready_tx));
        tokio::spawn(run_writer(write, ready_rx, outbound_rx));

        Ok(LiveConnection {
            outbound: Some(outbound_tx),
            reader: Some(reader),
        })
    }
}

/// An open live session.
pub struct LiveConnection {
    outbound: Option<mpsc::UnboundedSender<String>>,
    reader: Option<JoinHandle<()>>,
}

impl LiveLink for LiveConnection {
    fn send_audio(&mut self, packet: &AudioPacket) -> Result<()> {
        let Some(outbound) = &self.outbound else {
            return Err(WajjihniError::Connection {
                message: "live session already closed".to_string(),
            });
        };
        let json = RealtimeInputMessage::new(packet).to_json()?;
        outbound.send(json).map_err(|_| WajjihniError::Connection {
            message: "live session writer has stopped".to_string(),
        })
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the queue lets the writer flush and send a close frame
        if self.outbound.take().is_none() {
            return Ok(());
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        tracing::debug!("live session closed");
        Ok(())
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("{}", e);
        }
    }
}

async fn run_reader(
    mut read: SplitStream<Socket>,
    events: LiveEventSink,
    ready: watch::Sender<bool>,
) {
    while let Some(message) = read.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text.as_str().to_string(),
            // The endpoint sends JSON in binary frames too
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("dropping non-UTF-8 binary frame: {}", e);
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                    .unwrap_or_else(|| "closed by server".to_string());
                events(LiveEvent::Closed(reason));
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                events(LiveEvent::Errored(e.to_string()));
                return;
            }
        };

        match ServerMessage::from_json(&text) {
            Ok(message) => {
                if message.is_setup_complete() {
                    ready.send_replace(true);
                }
                for event in message.into_events() {
                    events(event);
                }
            }
            Err(e) => tracing::warn!("{}", e),
        }
    }
    events(LiveEvent::Closed("connection ended".to_string()));
}

async fn run_writer(
    mut write: SplitSink<Socket, Message>,
    mut ready: watch::Receiver<bool>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    // Fails only when the reader is gone without ever seeing the acknowledgement
    if ready.wait_for(|ready| *ready).await.is_err() {
        return;
    }
    tracing::debug!(queued = outbound.len(), "setup acknowledged, sending audio");

    while let Some(json) = outbound.recv().await {
        if let Err(e) = write.send(Message::Text(json.into())).await {
            tracing::warn!("live send failed: {}", e);
            return;
        }
    }
    if let Err(e) = write.close().await {
        tracing::debug!("close frame not sent: {}", e);
    }
}

/// Removes the API key from error text that may echo the request URL.
fn redact(text: &str, api_key: &str) -> String {
    if api_key.is_empty() {
        return text.to_string();
    }
    text.replace(api_key, "***")
}
