//! Interview request, live session setup, and the running transcript.

use crate::config::Config;
use std::fmt;

/// What the caller supplies to start an interview.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterviewRequest {
    role: String,
    context: Option<String>,
}

impl InterviewRequest {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            context: None,
        }
    }

    /// Adds free-form candidate context (background, major, goals).
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        if !context.trim().is_empty() {
            self.context = Some(context);
        }
        self
    }

    /// The target role, or `None` when blank.
    pub fn target_role(&self) -> Option<&str> {
        let role = self.role.trim();
        (!role.is_empty()).then_some(role)
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref().map(str::trim)
    }
}

/// Everything sent to the remote endpoint when the session opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetup {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub transcripts: bool,
}

impl SessionSetup {
    /// Builds the setup for `request`. Returns `None` when the request has no
    /// target role.
    pub fn for_interview(request: &InterviewRequest, config: &Config) -> Option<Self> {
        let role = request.target_role()?;
        Some(Self {
            model: config.api.live_model.clone(),
            voice: config.interview.voice.clone(),
            system_instruction: system_instruction(
                role,
                request.context(),
                &config.interview.language,
            ),
            transcripts: config.interview.transcripts,
        })
    }
}

/// HR-manager persona prompt for the given role.
pub fn system_instruction(role: &str, context: Option<&str>, language: &str) -> String {
    let mut prompt = format!(
        "You are a professional HR Manager conducting a job interview in {language}.\n\
         The job role is: \"{role}\".\n"
    );
    if let Some(context) = context {
        prompt.push_str(&format!("Candidate background: {context}\n"));
    }
    prompt.push_str(
        "\nStart the conversation by introducing yourself briefly and asking the first question.\n\
         Keep your questions concise.\n\
         Wait for the candidate to answer before asking the next question.",
    );
    prompt
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Candidate,
    Interviewer,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::Candidate => write!(f, "Candidate"),
            Speaker::Interviewer => write!(f, "Interviewer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

/// Conversation transcript assembled from streamed transcription fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    /// Appends a fragment, merging it into the last turn when the speaker is
    /// unchanged. Fragments carry their own spacing.
    pub fn push(&mut self, speaker: Speaker, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        match self.turns.last_mut() {
            Some(last) if last.speaker == speaker => last.text.push_str(fragment),
            _ => self.turns.push(Turn {
                speaker,
                text: fragment.to_string(),
            }),
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// True when nothing but whitespace was transcribed.
    pub fn is_empty(&self) -> bool {
        self.turns.iter().all(|t| t.text.trim().is_empty())
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Reads the output of [`render`](Self::render) back. Lines without a
    /// speaker prefix continue the previous turn.
    pub fn parse(text: &str) -> Self {
        let mut transcript = Self::default();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (speaker, body) = if let Some(rest) = line.strip_prefix("Candidate:") {
                (Speaker::Candidate, rest.trim())
            } else if let Some(rest) = line.strip_prefix("Interviewer:") {
                (Speaker::Interviewer, rest.trim())
            } else {
                match transcript.turns.last_mut() {
                    Some(last) => {
                        last.text.push('\n');
                        last.text.push_str(line);
                    }
                    None => transcript.push(Speaker::Candidate, line),
                }
                continue;
            };
            transcript.turns.push(Turn {
                speaker,
                text: body.to_string(),
            });
        }
        transcript
    }

    /// One `Speaker: text` line per turn.
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .filter(|t| !t.text.trim().is_empty())
            .map(|t| format!("{}: {}", t.speaker, t.text.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
