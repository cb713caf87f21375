//! JSON messages exchanged with the bidirectional generate-content endpoint.

use crate::audio::pcm::AudioPacket;
use crate::error::{Result, WajjihniError};
use crate::live::LiveEvent;
use crate::session::prompt::SessionSetup;
use serde::{Deserialize, Serialize};

/// First message on every connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetupMessage {
    setup: Setup,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup {
    model: String,
    generation_config: GenerationConfig,
    system_instruction: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<Empty>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    speech_config: SpeechConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Content {
    parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct TextPart {
    text: String,
}

/// Serializes as `{}`; its presence switches a feature on.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct Empty {}

impl SetupMessage {
    pub fn new(setup: &SessionSetup) -> Self {
        let model = if setup.model.starts_with("models/") {
            setup.model.clone()
        } else {
            format!("models/{}", setup.model)
        };
        let transcription = setup.transcripts.then_some(Empty {});
        Self {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: setup.voice.clone(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![TextPart {
                        text: setup.system_instruction.clone(),
                    }],
                },
                input_audio_transcription: transcription.clone(),
                output_audio_transcription: transcription,
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// One captured frame as a realtime input message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage<'a> {
    realtime_input: RealtimeInput<'a>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct RealtimeInput<'a> {
    audio: Blob<'a>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct Blob<'a> {
    data: &'a str,
    mime_type: &'a str,
}

impl<'a> RealtimeInputMessage<'a> {
    pub fn new(packet: &'a AudioPacket) -> Self {
        Self {
            realtime_input: RealtimeInput {
                audio: Blob {
                    data: packet.data(),
                    mime_type: packet.mime_type(),
                },
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Any message the server sends. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<ServerPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerPart {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoAway {
    time_left: Option<String>,
}

impl ServerMessage {
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| WajjihniError::Protocol {
            message: format!("unreadable server message: {}", e),
        })
    }

    /// True when this message acknowledges the session setup.
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Flattens the message into events: open acknowledgement, audio,
    /// interruption, transcripts, turn end, then a server-initiated close.
    pub fn into_events(self) -> Vec<LiveEvent> {
        let mut events = Vec::new();
        if self.setup_complete.is_some() {
            events.push(LiveEvent::Opened);
        }

        if let Some(content) = self.server_content {
            let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
            for inline in parts.into_iter().filter_map(|p| p.inline_data) {
                if !inline.mime_type.starts_with("audio/") {
                    tracing::debug!(mime_type = %inline.mime_type, "ignoring non-audio inline data");
                    continue;
                }
                events.push(LiveEvent::AudioChunk {
                    data: inline.data,
                    mime_type: inline.mime_type,
                });
            }
            if content.interrupted {
                events.push(LiveEvent::Interrupted);
            }
            if let Some(t) = content.input_transcription
                && !t.text.is_empty()
            {
                events.push(LiveEvent::InputTranscript(t.text));
            }
            if let Some(t) = content.output_transcription
                && !t.text.is_empty()
            {
                events.push(LiveEvent::OutputTranscript(t.text));
            }
            if content.turn_complete {
                events.push(LiveEvent::TurnComplete);
            }
        }

        if let Some(go_away) = self.go_away {
            let reason = match go_away.time_left {
                Some(left) => format!("server is ending the session ({} left)", left),
                None => "server is ending the session".to_string(),
            };
            events.push(LiveEvent::Closed(reason));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn setup(transcripts: bool) -> SessionSetup {
        SessionSetup {
            model: "gemini-live-test".to_string(),
            voice: "Zephyr".to_string(),
            system_instruction: "Interview for Backend Engineer".to_string(),
            transcripts,
        }
    }

    #[test]
    fn test_setup_message_shape() {
        let json: Value =
            serde_json::from_str(&SetupMessage::new(&setup(true)).to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            json!({
                "setup": {
                    "model": "models/gemini-live-test",
                    "generationConfig": {
                        "responseModalities": ["AUDIO"],
                        "speechConfig": {
                            "voiceConfig": {"prebuiltVoiceConfig": {"voiceName": "Zephyr"}}
                        }
                    },
                    "systemInstruction": {"parts": [{"text": "Interview for Backend Engineer"}]},
                    "inputAudioTranscription": {},
                    "outputAudioTranscription": {}
                }
            })
        );
    }

    #[test]
    fn test_setup_without_transcripts_omits_fields() {
        let mut s = setup(false);
        s.model = "models/already-prefixed".to_string();
        let text = SetupMessage::new(&s).to_json().unwrap();
        assert!(!text.contains("Transcription"));
        assert!(text.contains("\"model\":\"models/already-prefixed\""));
    }

    #[test]
    fn test_realtime_input_carries_packet() {
        let packet = AudioPacket::from_samples(vec![0, 1], 16000);
        let json: Value =
            serde_json::from_str(&RealtimeInputMessage::new(&packet).to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            json!({"realtimeInput": {"audio": {"data": "AAABAA==", "mimeType": "audio/pcm;rate=16000"}}})
        );
    }

    #[test]
    fn test_setup_complete_opens() {
        let msg = ServerMessage::from_json(r#"{"setupComplete":{}}"#).unwrap();
        assert!(msg.is_setup_complete());
        assert_eq!(msg.into_events(), vec![LiveEvent::Opened]);
    }

    #[test]
    fn test_audio_parts_in_order() {
        let msg = ServerMessage::from_json(
            r#"{"serverContent":{"modelTurn":{"parts":[
                {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAE="}},
                {"text":"ignored"},
                {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AgM="}}
            ]}}}"#,
        )
        .unwrap();
        assert_eq!(
            msg.into_events(),
            vec![
                LiveEvent::AudioChunk {
                    data: "AAE=".to_string(),
                    mime_type: "audio/pcm;rate=24000".to_string()
                },
                LiveEvent::AudioChunk {
                    data: "AgM=".to_string(),
                    mime_type: "audio/pcm;rate=24000".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_combined_message_event_order() {
        let msg = ServerMessage::from_json(
            r#"{"serverContent":{
                "turnComplete":true,
                "outputTranscription":{"text":"Welcome"},
                "inputTranscription":{"text":"Hi"},
                "interrupted":true,
                "modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAE="}}]}
            }}"#,
        )
        .unwrap();
        let events = msg.into_events();
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], LiveEvent::AudioChunk { .. }));
        assert_eq!(events[1], LiveEvent::Interrupted);
        assert_eq!(events[2], LiveEvent::InputTranscript("Hi".to_string()));
        assert_eq!(events[3], LiveEvent::OutputTranscript("Welcome".to_string()));
        assert_eq!(events[4], LiveEvent::TurnComplete);
    }

    #[test]
    fn test_go_away_closes() {
        let msg = ServerMessage::from_json(r#"{"goAway":{"timeLeft":"5s"}}"#).unwrap();
        match msg.into_events().as_slice() {
            [LiveEvent::Closed(reason)] => assert!(reason.contains("5s")),
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn test_unknown_message_yields_nothing() {
        let msg = ServerMessage::from_json(r#"{"usageMetadata":{"totalTokenCount":12}}"#).unwrap();
        assert!(msg.into_events().is_empty());
    }

    #[test]
    fn test_invalid_json_is_protocol_error() {
        assert!(matches!(
            ServerMessage::from_json("not json"),
            Err(WajjihniError::Protocol { .. })
        ));
    }
}
