use std::{
    fs,
    path::{Path, PathBuf},
};

use prospector_core::error::OrchestratorError;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
    models::{
        Config, ConfigMetadata, ConfigSource, DatabaseConfig, ExecutorEndpoint,
    },
    sources::{EnvConfig, FileConfig, parse_bool},
    validation::{self, ConfigWarnings},
};

const DEFAULT_CONFIG_LOCATIONS: [&str; 3] = [
    "prospector.toml",
    "config/prospector.toml",
    "prospector.json",
];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Directory searched for the well-known file names. Defaults to the
    /// working directory.
    pub search_dir: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to parse JSON configuration {origin}")]
    ParseJson {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid database URL")]
    InvalidDatabaseUrl {
        #[source]
        source: url::ParseError,
    },
    #[error("invalid executor URL '{url}'")]
    InvalidExecutorUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid value for {key}: '{value}'")]
    InvalidEnv { key: &'static str, value: String },
    #[error("failed to read secret file {path}")]
    SecretFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn with_search_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.options.search_dir = Some(dir.into());
        self
    }

    /// Load `.env`, read the environment and compose the final config.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };
        let mut load = self.load_with_env(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Compose from an explicit environment snapshot. `.env` is not read.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file, source) = self.load_file_config(&env)?;
        debug!(source = ?source, "configuration file layer resolved");
        let mut warnings = ConfigWarnings::default();
        if source == ConfigSource::Defaults {
            warnings.push_with_hint(
                "no configuration file found; using built-in defaults",
                "create prospector.toml or set PROSPECTOR_CONFIG_PATH",
            );
        }
        let config = compose(file, env, source)?;
        config.orchestrator.validate()?;
        validation::check(&config, &mut warnings);
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(FileConfig, ConfigSource), ConfigLoadError> {
        if let Some(path) = &self.options.config_path {
            if !path.exists() {
                return Err(ConfigLoadError::MissingConfig { path: path.clone() });
            }
            return Ok((read_file(path)?, ConfigSource::Explicit(path.clone())));
        }
        if let Some(path) = &env.config_path {
            if !path.exists() {
                return Err(ConfigLoadError::MissingConfig { path: path.clone() });
            }
            return Ok((read_file(path)?, ConfigSource::EnvPath(path.clone())));
        }
        if let Some(raw) = &env.config_json {
            let file = serde_json::from_str(raw).map_err(|source| {
                ConfigLoadError::ParseJson {
                    origin: "PROSPECTOR_CONFIG_JSON".to_string(),
                    source,
                }
            })?;
            return Ok((file, ConfigSource::EnvInline));
        }
        let base = self.options.search_dir.clone().unwrap_or_default();
        if let Some(path) = DEFAULT_CONFIG_LOCATIONS
            .iter()
            .map(|candidate| base.join(candidate))
            .find(|candidate| candidate.exists())
        {
            return Ok((read_file(&path)?, ConfigSource::File(path)));
        }
        Ok((FileConfig::default(), ConfigSource::Defaults))
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents =
        fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&contents).map_err(|source| {
            ConfigLoadError::ParseJson {
                origin: path.display().to_string(),
                source,
            }
        }),
        _ => toml::from_str(&contents).map_err(|source| {
            ConfigLoadError::Parse {
                path: path.to_path_buf(),
                source,
            }
        }),
    }
}

/// Environment wins over the file, the file over defaults.
fn compose(
    file: FileConfig,
    env: EnvConfig,
    source: ConfigSource,
) -> Result<Config, ConfigLoadError> {
    let FileConfig {
        database: file_database,
        executor: file_executor,
        orchestrator: mut orchestrator,
    } = file;

    if let Some(instance_id) = env.instance_id.clone() {
        orchestrator.instance_id = instance_id;
    }
    if let Some(raw) = env.max_concurrent.as_deref() {
        orchestrator.max_concurrent =
            raw.trim().parse().map_err(|_| ConfigLoadError::InvalidEnv {
                key: "PROSPECTOR_MAX_CONCURRENT",
                value: raw.to_string(),
            })?;
    }
    if let Some(raw) = env.full_spectrum.as_deref() {
        orchestrator.full_spectrum_enabled =
            parse_bool(raw).ok_or_else(|| ConfigLoadError::InvalidEnv {
                key: "PROSPECTOR_FULL_SPECTRUM",
                value: raw.to_string(),
            })?;
    }

    let database = DatabaseConfig {
        url: resolve_database_url(&env, file_database.url)?,
        max_connections: file_database
            .max_connections
            .unwrap_or(DatabaseConfig::default().max_connections),
    };

    let url = env
        .executor_url
        .clone()
        .or(file_executor.url)
        .filter(|value| !value.trim().is_empty());
    if let Some(raw) = &url {
        Url::parse(raw).map_err(|source| ConfigLoadError::InvalidExecutorUrl {
            url: raw.clone(),
            source,
        })?;
    }
    let token = match env.executor_token.clone() {
        Some(token) => Some(token),
        None => match &file_executor.token_file {
            Some(path) => read_secret_file(path)?,
            None => None,
        },
    };

    Ok(Config {
        orchestrator,
        database,
        executor: ExecutorEndpoint { url, token },
        metadata: ConfigMetadata {
            source,
            env_file_loaded: false,
        },
    })
}

fn resolve_database_url(
    env: &EnvConfig,
    file_url: Option<String>,
) -> Result<Option<String>, ConfigLoadError> {
    let raw = match (&env.database_url, &env.database_url_file) {
        (Some(url), _) => Some(url.clone()),
        (None, Some(path)) => read_secret_file(path)?,
        (None, None) => file_url.filter(|value| !value.trim().is_empty()),
    };
    let Some(raw) = raw else {
        return Ok(None);
    };
    let parsed = Url::parse(raw.trim())
        .map_err(|source| ConfigLoadError::InvalidDatabaseUrl { source })?;
    Ok(Some(parsed.to_string()))
}

pub fn read_secret_file(path: &Path) -> Result<Option<String>, ConfigLoadError> {
    let contents =
        fs::read_to_string(path).map_err(|source| ConfigLoadError::SecretFileIo {
            path: path.to_path_buf(),
            source,
        })?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}
