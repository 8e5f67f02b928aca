use std::{env, path::PathBuf};

use prospector_core::orchestration::OrchestratorConfig;
use serde::{Deserialize, Serialize};

/// Raw document as written in `prospector.toml` or its JSON twin.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    pub database: FileDatabaseConfig,
    pub executor: FileExecutorConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileExecutorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_file: Option<PathBuf>,
}

/// Values read from the process environment.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub config_json: Option<String>,
    pub database_url: Option<String>,
    pub database_url_file: Option<PathBuf>,
    pub instance_id: Option<String>,
    pub executor_url: Option<String>,
    pub executor_token: Option<String>,
    /// Kept raw so a malformed value can be reported instead of ignored.
    pub max_concurrent: Option<String>,
    /// Seeds the toggle when the state row is first created. Afterwards the
    /// persisted value wins; `prospector full-spectrum` changes it.
    pub full_spectrum: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: var("PROSPECTOR_CONFIG_PATH").map(PathBuf::from),
            config_json: var("PROSPECTOR_CONFIG_JSON"),
            database_url: var("DATABASE_URL"),
            database_url_file: var("DATABASE_URL_FILE").map(PathBuf::from),
            instance_id: var("PROSPECTOR_INSTANCE_ID"),
            executor_url: var("RESEARCH_EXECUTOR_URL"),
            executor_token: var("RESEARCH_EXECUTOR_TOKEN"),
            max_concurrent: var("PROSPECTOR_MAX_CONCURRENT"),
            full_spectrum: var("PROSPECTOR_FULL_SPECTRUM"),
        }
    }
}

/// Set and non-blank.
fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
