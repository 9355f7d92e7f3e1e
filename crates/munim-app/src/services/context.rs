//! Shared dependency wiring for the extraction pipeline: the generation
//! client abstraction, pipeline errors, and [`PipelineContext`].

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::ExtractionConfig;
use crate::constants::DEFAULT_MODEL_CHAIN;

use super::gemini::GeminiClient;
use super::quota::QuotaCounter;
use super::registry::ModelRegistry;

pub type GenericRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// One element of a generation prompt: instruction text or an inline
/// document payload.
#[derive(Debug, Clone)]
pub enum PromptPart {
    Text(String),
    Document {
        mime_type: &'static str,
        bytes: Arc<[u8]>,
    },
}

/// Generation parameters forwarded with every call.
#[derive(Debug, Clone, Copy)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Ask the backend to relax safety thresholds. Set for fallback-prompt
    /// attempts after a content block.
    pub permissive_safety: bool,
}

/// Classified failure of a single generation call.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("content blocked: {0}")]
    ContentBlocked(String),
    #[error("{0}")]
    Other(String),
}

/// The external generation capability. Implementations classify their
/// failures into [`GenerateError`] variants; an empty `Ok` string is a valid
/// outcome and is judged by the caller.
#[async_trait]
pub trait GenerateClient: Send + Sync {
    async fn generate(
        &self,
        model_id: &str,
        parts: &[PromptPart],
        options: GenerateOptions,
    ) -> Result<String, GenerateError>;
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Message(String),
    #[error("set GOOGLE_AI_API_KEY or GEMINI_API_KEY to call the extraction backend")]
    MissingGeminiApiKey,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl PipelineError {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Everything the extraction services need, built once at startup and shared
/// across tasks.
pub struct PipelineContext {
    pub models: Arc<Mutex<ModelRegistry>>,
    pub quota: Arc<Mutex<QuotaCounter>>,
    pub client: Arc<dyn GenerateClient>,
    pub limiter: Arc<GenericRateLimiter>,
    pub extraction: ExtractionConfig,
}

/// Builds the runtime context from configuration. `model_override` pins the
/// registry to a single candidate instead of the default chain.
pub fn build_pipeline_context(
    extraction: &ExtractionConfig,
    model_override: Option<&str>,
) -> PipelineResult<PipelineContext> {
    let registry = match model_override {
        Some(id) => ModelRegistry::single(id, extraction.failure_limit),
        None => ModelRegistry::from_chain(DEFAULT_MODEL_CHAIN, extraction.failure_limit),
    };
    if registry.is_empty() {
        return Err(PipelineError::message("no extraction models configured"));
    }

    let calls_per_second =
        NonZeroU32::new(extraction.calls_per_second.max(1)).expect("quota must be non-zero");
    let limiter = Arc::new(RateLimiter::direct(Quota::per_second(calls_per_second)));

    let client = GeminiClient::from_env(Duration::from_secs(extraction.request_timeout_secs))?;

    Ok(PipelineContext {
        models: Arc::new(Mutex::new(registry)),
        quota: Arc::new(Mutex::new(QuotaCounter::new(extraction.daily_call_limit))),
        client: Arc::new(client),
        limiter,
        extraction: extraction.clone(),
    })
}
