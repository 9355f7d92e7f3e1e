//! Extraction services: model registry, quota accounting, the Gemini REST
//! client, resilient invocation, and batch orchestration.

pub mod batch;
pub mod context;
pub mod extract;
pub mod gemini;
pub mod quota;
pub mod registry;

pub use batch::{BatchOptions, BatchOrchestrator, MISSED_RECORD_ERROR};
pub use context::{
    GenerateClient, GenerateError, GenerateOptions, GenericRateLimiter, PipelineContext,
    PipelineError, PipelineResult, PromptPart, build_pipeline_context,
};
pub use extract::{ExtractError, ExtractorService};
pub use gemini::{GEMINI_API_BASE, GeminiClient};
pub use quota::{QuotaCounter, QuotaStatus};
pub use registry::{
    CandidateStatus, FailureKind, ModelCandidate, ModelRegistry, RegistrySnapshot, SelectedModel,
};
