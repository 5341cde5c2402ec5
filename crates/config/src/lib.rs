//! Configuration loading, validation and env substitution.
//!
//! Config files: `gatekeeper.toml`, `gatekeeper.yaml` or `gatekeeper.json`,
//! searched in `./` then `~/.config/gatekeeper/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution in the raw text.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{config_dir, data_dir, database_path, discover_and_load, load_config},
    schema::{
        CompletionConfig, ConnectionsConfig, CorrelationConfig, DatabaseConfig, GatekeeperConfig,
        LogSourceConfig, LogsConfig, MetricsConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
