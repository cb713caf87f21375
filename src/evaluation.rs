//! Post-call evaluation through the text-generation endpoint.
//!
//! The transcript of a finished interview is scored by the text model, which
//! is asked for a JSON response. Evaluation never fails the caller: any error
//! becomes a zero-score result with an explanatory feedback string.

use crate::config::Config;
use crate::error::{Result, WajjihniError};
use crate::session::prompt::Transcript;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Produces a JSON document for a prompt.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_json(&self, prompt: &str) -> Result<String>;
}

/// Client for the REST `generateContent` call.
#[derive(Debug, Clone)]
pub struct TextClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl TextClient {
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }

    /// # Errors
    /// `Connection` when no API key is configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.require_api_key()?,
            config.api.rest_endpoint.clone(),
            config.api.text_model.clone(),
        ))
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(self) -> Option<String> {
        let parts = self.candidates.into_iter().next()?.content?.parts;
        let text: String = parts.into_iter().filter_map(|p| p.text).collect();
        (!text.is_empty()).then_some(text)
    }
}

#[async_trait]
impl TextGenerator for TextClient {
    async fn generate_json(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {"responseMimeType": "application/json"}
        });

        let response = self
            .http
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| WajjihniError::Generation {
                message: format!("request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(WajjihniError::Generation {
                message: format!("endpoint returned status {}", response.status()),
            });
        }

        let parsed: GenerateResponse =
            response.json().await.map_err(|e| WajjihniError::Generation {
                message: format!("unreadable response: {e}"),
            })?;
        parsed.text().ok_or_else(|| WajjihniError::Generation {
            message: "response contained no text".to_string(),
        })
    }
}

/// Feedback on one interview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewEvaluation {
    /// 0..=100.
    pub score: u8,
    pub feedback: String,
    pub improvements: Vec<String>,
    pub strengths: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawEvaluation {
    score: f64,
    feedback: String,
    improvements: Vec<String>,
    strengths: Vec<String>,
}

impl InterviewEvaluation {
    /// Zero-score result carrying why no real evaluation exists.
    pub fn unavailable(feedback: impl Into<String>) -> Self {
        Self {
            score: 0,
            feedback: feedback.into(),
            improvements: Vec::new(),
            strengths: Vec::new(),
        }
    }

    /// Parses the model's JSON, tolerating a surrounding code fence and
    /// out-of-range scores.
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: RawEvaluation = serde_json::from_str(strip_code_fence(text))?;
        let score = if raw.score.is_finite() {
            raw.score.round().clamp(0.0, 100.0) as u8
        } else {
            0
        };
        Ok(Self {
            score,
            feedback: raw.feedback,
            improvements: raw.improvements,
            strengths: raw.strengths,
        })
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Prompt asking for a scored review of `transcript` for `role`.
pub fn evaluation_prompt(transcript: &str, role: &str) -> String {
    format!(
        "Evaluate a simulated job interview for the role: \"{role}\".\n\n\
         Transcript:\n{transcript}\n\n\
         Assess the candidate's confidence, technical knowledge and the way they answered.\n\n\
         JSON Output Format:\n\
         {{\n  \"score\": number (0-100),\n  \"feedback\": \"detailed overall assessment\",\n  \
         \"improvements\": [\"point to improve\"],\n  \"strengths\": [\"strength\"]\n}}"
    )
}

/// Scores a finished interview. Never fails; see the module docs.
pub async fn evaluate_interview(
    generator: &dyn TextGenerator,
    transcript: &Transcript,
    role: &str,
) -> InterviewEvaluation {
    if transcript.is_empty() {
        return InterviewEvaluation::unavailable("No conversation was recorded to evaluate.");
    }
    let prompt = evaluation_prompt(&transcript.render(), role);
    let result = match generator.generate_json(&prompt).await {
        Ok(text) => InterviewEvaluation::from_json(&text),
        Err(e) => Err(e),
    };
    match result {
        Ok(evaluation) => evaluation,
        Err(e) => {
            tracing::warn!("interview evaluation failed: {}", e);
            InterviewEvaluation::unavailable("An error occurred during evaluation.")
        }
    }
}

/// Profile analysis produced earlier in the guidance flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisResult {
    pub summary: String,
    pub strengths: Vec<String>,
    pub recommended_roles: Vec<String>,
}

impl AnalysisResult {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(strip_code_fence(text))?)
    }

    /// First recommended role, the interview's target.
    pub fn target_role(&self) -> Option<&str> {
        self.recommended_roles
            .first()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
    }
}
