//! Configuration loading and XDG path helpers.

use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

const CONFIG_FILE: &str = "config/settings";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("unable to resolve project directories")]
    MissingProjectDirs,
    #[error(transparent)]
    Build(#[from] config::ConfigError),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub extraction: ExtractionConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Documents per processing group.
    pub batch_size: usize,
    /// Pause between groups, in milliseconds.
    pub group_pause_ms: u64,
    /// Concurrent individual calls within one group.
    pub concurrency: usize,
    /// Hard failures before a model candidate is taken out of rotation.
    pub failure_limit: u32,
    /// Advisory daily call budget across all candidates.
    pub daily_call_limit: u64,
    pub request_timeout_secs: u64,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Upper bound on outbound calls per second.
    pub calls_per_second: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    pub output_dir: PathBuf,
}

pub fn load() -> Result<AppConfig, AppConfigError> {
    let default_output = default_output_dir()?;
    let builder = Config::builder()
        .set_default("extraction.batch_size", 5)?
        .set_default("extraction.group_pause_ms", 2_000)?
        .set_default("extraction.concurrency", 4)?
        .set_default("extraction.failure_limit", 3)?
        .set_default("extraction.daily_call_limit", 1_500)?
        .set_default("extraction.request_timeout_secs", 90)?
        .set_default("extraction.temperature", 0.0)?
        .set_default("extraction.max_output_tokens", 8_192)?
        .set_default("extraction.calls_per_second", 2)?
        .set_default(
            "export.output_dir",
            default_output.to_string_lossy().to_string(),
        )?
        .add_source(File::with_name(CONFIG_FILE).required(false))
        .add_source(Environment::with_prefix("MUNIM").separator("__"));

    let cfg = builder.build()?.try_deserialize()?;
    Ok(cfg)
}

pub fn project_dirs() -> Result<ProjectDirs, AppConfigError> {
    ProjectDirs::from("in", "munim", "munim").ok_or(AppConfigError::MissingProjectDirs)
}

fn default_output_dir() -> Result<PathBuf, AppConfigError> {
    Ok(project_dirs()?.data_dir().join("exports"))
}
