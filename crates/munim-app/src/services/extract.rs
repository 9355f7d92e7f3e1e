//! Resilient model invocation: candidate selection, failure classification,
//! safety-prompt fallback, and cross-candidate escalation.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::constants::{MAX_INLINE_DOCUMENT_BYTES, SAFETY_FALLBACK_PROMPTS};

use super::context::{
    GenerateClient, GenerateError, GenerateOptions, GenericRateLimiter, PipelineContext,
    PromptPart,
};
use super::quota::QuotaCounter;
use super::registry::{FailureKind, ModelRegistry, SelectedModel};

/// Terminal outcome of one logical extraction call.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no extraction models are currently available")]
    NoCandidatesAvailable,
    #[error("call capacity exhausted across all extraction models")]
    AllCapacityExhausted,
    #[error("content blocked by model safety filters: {0}")]
    ContentBlocked(String),
    #[error("extraction backend error: {0}")]
    Backend(String),
    #[error("invalid input document: {0}")]
    Validation(String),
}

/// What the previous dispatch round ended with, for picking the right error
/// once no candidate remains.
enum LastFailure {
    Quota,
    Safety(String),
}

enum FallbackOutcome {
    Success(String),
    QuotaSignal(String),
    StillBlocked(String),
}

/// Drives a single generation call through the model chain until it either
/// produces text or every recovery path is spent.
pub struct ExtractorService {
    client: Arc<dyn GenerateClient>,
    models: Arc<Mutex<ModelRegistry>>,
    quota: Arc<Mutex<QuotaCounter>>,
    limiter: Arc<GenericRateLimiter>,
    options: GenerateOptions,
}

impl ExtractorService {
    pub fn from_context(context: &PipelineContext) -> Self {
        Self {
            client: Arc::clone(&context.client),
            models: Arc::clone(&context.models),
            quota: Arc::clone(&context.quota),
            limiter: Arc::clone(&context.limiter),
            options: GenerateOptions {
                temperature: context.extraction.temperature,
                max_output_tokens: context.extraction.max_output_tokens,
                permissive_safety: false,
            },
        }
    }

    /// One logical extraction call. Rotates through candidates on quota
    /// errors, retries the same candidate with progressively blander prompts
    /// on safety blocks, escalates past persistently blocked candidates
    /// without marking them failed, and gives up fast on anything else.
    pub async fn invoke(
        &self,
        prompt: &str,
        documents: &[PromptPart],
    ) -> Result<String, ExtractError> {
        validate_documents(documents)?;

        let mut reset_attempted = false;
        let mut escalated: BTreeSet<String> = BTreeSet::new();
        let mut last_failure: Option<LastFailure> = None;

        loop {
            let Some(selected) = self
                .select_candidate(&escalated, last_failure.is_none(), &mut reset_attempted)
                .await
            else {
                return Err(match last_failure {
                    Some(LastFailure::Quota) => ExtractError::AllCapacityExhausted,
                    Some(LastFailure::Safety(reason)) => ExtractError::ContentBlocked(reason),
                    None => ExtractError::NoCandidatesAvailable,
                });
            };

            match self.dispatch(&selected, prompt, documents, false).await {
                Ok(text) if !text.trim().is_empty() => {
                    self.models.lock().await.record_success(&selected.id);
                    return Ok(text);
                }
                Ok(_) => {
                    let reason = "model returned an empty response";
                    self.models
                        .lock()
                        .await
                        .record_failure(&selected.id, FailureKind::Hard, reason);
                    return Err(ExtractError::Backend(reason.to_string()));
                }
                Err(GenerateError::QuotaExceeded(message)) => {
                    warn!(model = %selected.id, %message, "quota signal, rotating candidate");
                    self.models
                        .lock()
                        .await
                        .record_failure(&selected.id, FailureKind::Hard, &message);
                    last_failure = Some(LastFailure::Quota);
                }
                Err(GenerateError::ContentBlocked(message)) => {
                    info!(model = %selected.id, %message, "content blocked, trying fallback prompts");
                    match self.run_fallback_prompts(&selected, documents, message).await {
                        FallbackOutcome::Success(text) => {
                            self.models.lock().await.record_success(&selected.id);
                            return Ok(text);
                        }
                        FallbackOutcome::QuotaSignal(quota_message) => {
                            warn!(model = %selected.id, message = %quota_message, "quota signal during fallback, rotating candidate");
                            self.models.lock().await.record_failure(
                                &selected.id,
                                FailureKind::Hard,
                                &quota_message,
                            );
                            last_failure = Some(LastFailure::Quota);
                        }
                        FallbackOutcome::StillBlocked(reason) => {
                            info!(model = %selected.id, "safety block persisted, escalating to next candidate");
                            self.models.lock().await.record_failure(
                                &selected.id,
                                FailureKind::SafetyBlock,
                                &reason,
                            );
                            escalated.insert(selected.id.clone());
                            last_failure = Some(LastFailure::Safety(reason));
                        }
                    }
                }
                Err(GenerateError::Other(message)) => {
                    self.models
                        .lock()
                        .await
                        .record_failure(&selected.id, FailureKind::Hard, &message);
                    return Err(ExtractError::Backend(message));
                }
            }
        }
    }

    /// Picks the next candidate. A full registry reset is attempted at most
    /// once per invocation, and only when the very first selection comes up
    /// empty; mid-flight exhaustion must surface as an error instead of
    /// looping forever.
    async fn select_candidate(
        &self,
        escalated: &BTreeSet<String>,
        first_selection: bool,
        reset_attempted: &mut bool,
    ) -> Option<SelectedModel> {
        let mut registry = self.models.lock().await;
        if let Some(selected) = registry.select_excluding(escalated) {
            return Some(selected);
        }
        if first_selection && !*reset_attempted {
            warn!("no model candidates available, resetting the registry once");
            *reset_attempted = true;
            registry.reset_all();
            return registry.select_excluding(escalated);
        }
        None
    }

    /// Replays the call on the same candidate with each fallback prompt in
    /// order, relaxed safety settings applied.
    async fn run_fallback_prompts(
        &self,
        selected: &SelectedModel,
        documents: &[PromptPart],
        first_reason: String,
    ) -> FallbackOutcome {
        let mut block_reason = first_reason;
        for (index, fallback) in SAFETY_FALLBACK_PROMPTS.iter().enumerate() {
            debug!(model = %selected.id, attempt = index + 1, "retrying with fallback prompt");
            match self.dispatch(selected, fallback, documents, true).await {
                Ok(text) if !text.trim().is_empty() => {
                    return FallbackOutcome::Success(text);
                }
                Ok(_) => {}
                Err(GenerateError::QuotaExceeded(message)) => {
                    return FallbackOutcome::QuotaSignal(message);
                }
                Err(GenerateError::ContentBlocked(message)) => {
                    block_reason = message;
                }
                Err(GenerateError::Other(message)) => {
                    debug!(model = %selected.id, %message, "fallback attempt errored, trying next prompt");
                }
            }
        }
        FallbackOutcome::StillBlocked(block_reason)
    }

    /// One wire call: waits for rate-limit headroom, counts the attempt, and
    /// forwards to the client.
    async fn dispatch(
        &self,
        selected: &SelectedModel,
        prompt: &str,
        documents: &[PromptPart],
        permissive: bool,
    ) -> Result<String, GenerateError> {
        self.limiter.until_ready().await;
        let call_number = self.quota.lock().await.record_call();
        debug!(
            model = %selected.id,
            call = call_number,
            permissive,
            "dispatching generation call"
        );
        let options = GenerateOptions {
            permissive_safety: permissive,
            ..self.options
        };
        self.client
            .generate(&selected.id, &assemble_parts(prompt, documents), options)
            .await
    }
}

fn assemble_parts(prompt: &str, documents: &[PromptPart]) -> Vec<PromptPart> {
    let mut parts = Vec::with_capacity(documents.len() + 1);
    parts.push(PromptPart::Text(prompt.to_string()));
    parts.extend_from_slice(documents);
    parts
}

fn validate_documents(documents: &[PromptPart]) -> Result<(), ExtractError> {
    for part in documents {
        if let PromptPart::Document { mime_type, bytes } = part {
            if bytes.is_empty() {
                return Err(ExtractError::Validation(format!(
                    "empty {mime_type} payload"
                )));
            }
            if bytes.len() > MAX_INLINE_DOCUMENT_BYTES {
                return Err(ExtractError::Validation(format!(
                    "{mime_type} payload of {} bytes exceeds the {} byte inline limit",
                    bytes.len(),
                    MAX_INLINE_DOCUMENT_BYTES
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::num::NonZeroU32;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use governor::{Quota, RateLimiter};

    use super::*;

    struct RecordedCall {
        model: String,
        prompt: String,
        permissive: bool,
    }

    /// Client that replays a scripted sequence of outcomes and records every
    /// call it receives.
    struct ScriptedClient {
        script: StdMutex<VecDeque<Result<String, GenerateError>>>,
        calls: StdMutex<Vec<RecordedCall>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<String, GenerateError>>) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(script.into()),
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().expect("calls lock").len()
        }

        fn call(&self, index: usize) -> (String, String, bool) {
            let calls = self.calls.lock().expect("calls lock");
            let call = &calls[index];
            (call.model.clone(), call.prompt.clone(), call.permissive)
        }
    }

    #[async_trait]
    impl GenerateClient for ScriptedClient {
        async fn generate(
            &self,
            model_id: &str,
            parts: &[PromptPart],
            options: GenerateOptions,
        ) -> Result<String, GenerateError> {
            let prompt = parts
                .iter()
                .find_map(|part| match part {
                    PromptPart::Text(text) => Some(text.clone()),
                    PromptPart::Document { .. } => None,
                })
                .unwrap_or_default();
            self.calls.lock().expect("calls lock").push(RecordedCall {
                model: model_id.to_string(),
                prompt,
                permissive: options.permissive_safety,
            });
            self.script
                .lock()
                .expect("script lock")
                .pop_front()
                .unwrap_or_else(|| Err(GenerateError::Other("script exhausted".to_string())))
        }
    }

    fn service(
        client: Arc<ScriptedClient>,
        registry: ModelRegistry,
    ) -> (ExtractorService, Arc<Mutex<ModelRegistry>>, Arc<Mutex<QuotaCounter>>) {
        let models = Arc::new(Mutex::new(registry));
        let quota = Arc::new(Mutex::new(QuotaCounter::new(10_000)));
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(
            NonZeroU32::new(1_000).expect("non-zero quota"),
        )));
        let service = ExtractorService {
            client,
            models: Arc::clone(&models),
            quota: Arc::clone(&quota),
            limiter,
            options: GenerateOptions {
                temperature: 0.0,
                max_output_tokens: 8_192,
                permissive_safety: false,
            },
        };
        (service, models, quota)
    }

    fn two_candidates(failure_limit: u32) -> ModelRegistry {
        ModelRegistry::from_chain(&[("m-a", "Model A"), ("m-b", "Model B")], failure_limit)
    }

    fn png_document() -> PromptPart {
        PromptPart::Document {
            mime_type: "image/png",
            bytes: Arc::from(b"\x89PNG fake".as_slice()),
        }
    }

    fn ok(text: &str) -> Result<String, GenerateError> {
        Ok(text.to_string())
    }

    #[tokio::test]
    async fn quota_errors_rotate_to_the_next_candidate() {
        let client = ScriptedClient::new(vec![
            Err(GenerateError::QuotaExceeded("429".to_string())),
            ok(r#"{"party_name": "Acme"}"#),
        ]);
        let (service, _, quota) = service(Arc::clone(&client), two_candidates(1));

        let text = service
            .invoke("extract", &[png_document()])
            .await
            .expect("second candidate succeeds");

        assert!(text.contains("Acme"));
        assert_eq!(client.call_count(), 2);
        assert_eq!(client.call(0).0, "m-a");
        assert_eq!(client.call(1).0, "m-b");
        assert_eq!(quota.lock().await.calls_made(), 2);
    }

    #[tokio::test]
    async fn quota_exhaustion_across_the_chain_terminates() {
        let client = ScriptedClient::new(vec![
            Err(GenerateError::QuotaExceeded("429".to_string())),
            Err(GenerateError::QuotaExceeded("429".to_string())),
            Err(GenerateError::QuotaExceeded("429".to_string())),
            Err(GenerateError::QuotaExceeded("429".to_string())),
        ]);
        let (service, models, _) = service(Arc::clone(&client), two_candidates(2));

        let error = service
            .invoke("extract", &[png_document()])
            .await
            .expect_err("chain exhausted");

        assert!(matches!(error, ExtractError::AllCapacityExhausted));
        assert_eq!(client.call_count(), 4);
        assert_eq!(models.lock().await.available_count(), 0);
    }

    #[tokio::test]
    async fn safety_block_recovers_via_fallback_prompt_on_the_same_candidate() {
        let client = ScriptedClient::new(vec![
            Err(GenerateError::ContentBlocked("SAFETY".to_string())),
            ok(r#"{"party_name": "Acme"}"#),
        ]);
        let (service, models, _) = service(Arc::clone(&client), two_candidates(3));

        let text = service
            .invoke("extract", &[png_document()])
            .await
            .expect("fallback prompt succeeds");

        assert!(text.contains("Acme"));
        let (first_model, first_prompt, first_permissive) = client.call(0);
        let (second_model, second_prompt, second_permissive) = client.call(1);
        assert_eq!(first_model, second_model);
        assert_eq!(first_prompt, "extract");
        assert_eq!(second_prompt, SAFETY_FALLBACK_PROMPTS[0]);
        assert!(!first_permissive);
        assert!(second_permissive);
        // Safety blocks leave the failure counter untouched.
        assert_eq!(models.lock().await.snapshot().candidates[0].failures, 0);
    }

    #[tokio::test]
    async fn persistent_safety_blocks_escalate_without_disabling_candidates() {
        let blocked = || Err(GenerateError::ContentBlocked("SAFETY".to_string()));
        let calls_per_candidate = 1 + SAFETY_FALLBACK_PROMPTS.len();
        let script = (0..2 * calls_per_candidate).map(|_| blocked()).collect();
        let client = ScriptedClient::new(script);
        let (service, models, _) = service(Arc::clone(&client), two_candidates(3));

        let error = service
            .invoke("extract", &[png_document()])
            .await
            .expect_err("every candidate blocked");

        assert!(matches!(error, ExtractError::ContentBlocked(_)));
        assert_eq!(client.call_count(), 2 * calls_per_candidate);
        assert_eq!(client.call(calls_per_candidate).0, "m-b");
        // Both candidates stay selectable for the next invocation.
        let registry = models.lock().await;
        assert_eq!(registry.available_count(), 2);
    }

    #[tokio::test]
    async fn backend_errors_fail_fast_without_retry() {
        let client = ScriptedClient::new(vec![Err(GenerateError::Other("boom".to_string()))]);
        let (service, models, _) = service(Arc::clone(&client), two_candidates(3));

        let error = service
            .invoke("extract", &[png_document()])
            .await
            .expect_err("backend error surfaces");

        assert!(matches!(error, ExtractError::Backend(message) if message == "boom"));
        assert_eq!(client.call_count(), 1);
        assert_eq!(models.lock().await.snapshot().candidates[0].failures, 1);
    }

    #[tokio::test]
    async fn empty_response_text_is_a_backend_error() {
        let client = ScriptedClient::new(vec![ok("   \n")]);
        let (service, models, _) = service(Arc::clone(&client), two_candidates(3));

        let error = service
            .invoke("extract", &[png_document()])
            .await
            .expect_err("empty text rejected");

        assert!(matches!(error, ExtractError::Backend(_)));
        assert_eq!(models.lock().await.snapshot().candidates[0].failures, 1);
    }

    #[tokio::test]
    async fn exhausted_registry_recovers_through_a_single_reset() {
        let client = ScriptedClient::new(vec![ok(r#"{"party_name": "Acme"}"#)]);
        let mut registry = two_candidates(1);
        registry.record_failure("m-a", FailureKind::Hard, "stale");
        registry.record_failure("m-b", FailureKind::Hard, "stale");
        assert_eq!(registry.available_count(), 0);
        let (service, models, _) = service(Arc::clone(&client), registry);

        let text = service
            .invoke("extract", &[png_document()])
            .await
            .expect("reset restores the chain");

        assert!(text.contains("Acme"));
        assert_eq!(client.call_count(), 1);
        assert!(models.lock().await.available_count() > 0);
    }

    #[tokio::test]
    async fn oversized_documents_are_rejected_before_any_call() {
        let client = ScriptedClient::new(Vec::new());
        let (service, _, quota) = service(Arc::clone(&client), two_candidates(3));
        let oversized = PromptPart::Document {
            mime_type: "application/pdf",
            bytes: Arc::from(vec![0u8; MAX_INLINE_DOCUMENT_BYTES + 1]),
        };

        let error = service
            .invoke("extract", &[oversized])
            .await
            .expect_err("document too large");

        assert!(matches!(error, ExtractError::Validation(_)));
        assert_eq!(client.call_count(), 0);
        assert_eq!(quota.lock().await.calls_made(), 0);
    }
}
