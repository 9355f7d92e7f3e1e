//! REST client for the Gemini `generateContent` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::context::{GenerateClient, GenerateError, GenerateOptions, PipelineError, PromptPart};

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Harm categories relaxed to `BLOCK_NONE` when a caller asks for
/// permissive safety.
const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    /// Reads the API key from `GOOGLE_AI_API_KEY`, falling back to
    /// `GEMINI_API_KEY`.
    pub fn from_env(timeout: Duration) -> Result<Self, PipelineError> {
        let api_key = std::env::var("GOOGLE_AI_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map_err(|_| PipelineError::MissingGeminiApiKey)?;
        Self::new(api_key, GEMINI_API_BASE, timeout)
    }

    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl GenerateClient for GeminiClient {
    async fn generate(
        &self,
        model_id: &str,
        parts: &[PromptPart],
        options: GenerateOptions,
    ) -> Result<String, GenerateError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, model_id, self.api_key
        );
        let request = GenerateRequest::assemble(parts, options);

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| GenerateError::Other(format!("failed to read response: {error}")))?;

        if !status.is_success() {
            let message = api_error_message(&body)
                .unwrap_or_else(|| format!("HTTP {} from {model_id}", status.as_u16()));
            if status.as_u16() == 429 || is_quota_message(&message) {
                return Err(GenerateError::QuotaExceeded(message));
            }
            return Err(GenerateError::Other(message));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|error| GenerateError::Other(format!("unparseable response body: {error}")))?;

        if let Some(reason) = parsed
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
        {
            return Err(GenerateError::ContentBlocked(format!(
                "prompt blocked ({reason})"
            )));
        }
        if let Some(reason) = parsed.safety_finish_reason() {
            return Err(GenerateError::ContentBlocked(format!(
                "candidate stopped ({reason})"
            )));
        }

        let text = parsed.joined_text();
        debug!(
            model = model_id,
            parts = parts.len(),
            permissive = options.permissive_safety,
            chars = text.len(),
            "generation call completed"
        );
        Ok(text)
    }
}

fn transport_error(error: reqwest::Error) -> GenerateError {
    if error.is_timeout() {
        GenerateError::Other("request timed out".to_string())
    } else {
        GenerateError::Other(format!("transport error: {error}"))
    }
}

/// Provider quota signals that arrive without a 429 status line.
fn is_quota_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("quota")
        || lowered.contains("rate limit")
        || lowered.contains("resource_exhausted")
        || lowered.contains("resource has been exhausted")
        || lowered.contains("429")
}

fn api_error_message(body: &str) -> Option<String> {
    let envelope: ApiErrorEnvelope = serde_json::from_str(body).ok()?;
    let error = envelope.error?;
    match (error.status, error.message) {
        (Some(status), Some(message)) => Some(format!("{status}: {message}")),
        (None, Some(message)) => Some(message),
        (Some(status), None) => Some(status),
        (None, None) => None,
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
    #[serde(rename = "safetySettings", skip_serializing_if = "Vec::is_empty")]
    safety_settings: Vec<SafetySetting>,
}

impl GenerateRequest {
    fn assemble(parts: &[PromptPart], options: GenerateOptions) -> Self {
        let encoded = parts
            .iter()
            .map(|part| match part {
                PromptPart::Text(text) => Part::Text { text: text.clone() },
                PromptPart::Document { mime_type, bytes } => Part::InlineData {
                    inline_data: InlineData {
                        mime_type: (*mime_type).to_string(),
                        data: BASE64_STANDARD.encode(bytes),
                    },
                },
            })
            .collect();
        let safety_settings = if options.permissive_safety {
            SAFETY_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category,
                    threshold: "BLOCK_NONE",
                })
                .collect()
        } else {
            Vec::new()
        };
        Self {
            contents: vec![Content { parts: encoded }],
            generation_config: GenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_output_tokens,
            },
            safety_settings,
        }
    }
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

impl GenerateResponse {
    fn safety_finish_reason(&self) -> Option<&str> {
        self.candidates
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|candidate| candidate.finish_reason.as_deref())
            .find(|reason| *reason == "SAFETY")
    }

    fn joined_text(&self) -> String {
        self.candidates
            .as_deref()
            .unwrap_or_default()
            .iter()
            .flat_map(|candidate| candidate.content.iter())
            .flat_map(|content| content.parts.iter().flatten())
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<ResponsePart>>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
    status: Option<String>,
}
