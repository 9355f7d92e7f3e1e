//! Application-level error type shared across the binary and services.

use std::path::PathBuf;

use thiserror::Error;

use crate::config;
use crate::services::PipelineError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    ConfigLoad(#[from] config::AppConfigError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("failed to read input file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported document type `{path}` (expected png, jpg, jpeg, webp or pdf)")]
    UnsupportedInput { path: PathBuf },
    #[error("{path} is {size} bytes, above the {limit} byte inline limit")]
    InputTooLarge {
        path: PathBuf,
        size: u64,
        limit: usize,
    },
    #[error("no supported documents found under {path}")]
    EmptyInputDir { path: PathBuf },
}
