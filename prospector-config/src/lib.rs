//! Configuration for the Prospector orchestrator.
//!
//! Settings are composed from, in increasing precedence: built-in defaults,
//! a TOML or JSON file (or inline JSON), and environment variables, with an
//! optional `.env` file loaded first. Guard rails that do not stop the
//! process are reported as [`ConfigWarnings`].
#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{
    Config, ConfigMetadata, ConfigSource, DatabaseConfig, ExecutorEndpoint,
};
pub use sources::{EnvConfig, FileConfig};
pub use validation::{ConfigWarning, ConfigWarnings};
