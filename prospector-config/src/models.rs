use std::path::PathBuf;

use prospector_core::orchestration::OrchestratorConfig;
use serde::Serialize;

/// Where the file layer of a [`Config`] came from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum ConfigSource {
    #[default]
    Defaults,
    /// Path passed on the command line.
    Explicit(PathBuf),
    /// `PROSPECTOR_CONFIG_PATH`.
    EnvPath(PathBuf),
    /// `PROSPECTOR_CONFIG_JSON`.
    EnvInline,
    /// First existing well-known location.
    File(PathBuf),
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseConfig {
    /// `None` when neither the file nor the environment names a database.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 8,
        }
    }
}

/// HTTP endpoint of the research executor.
#[derive(Clone, Serialize)]
pub struct ExecutorEndpoint {
    pub url: Option<String>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl std::fmt::Debug for ExecutorEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorEndpoint")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigMetadata {
    pub source: ConfigSource,
    pub env_file_loaded: bool,
}

/// Fully resolved settings for one orchestrator process.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    pub database: DatabaseConfig,
    pub executor: ExecutorEndpoint,
    pub metadata: ConfigMetadata,
}
