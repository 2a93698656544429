use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::prediction::ArtifactPaths;

/// Application-level constants
pub const APP_NAME: &str = "drug-pipeline";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const ENV_BIND: &str = "DRUG_PIPELINE_BIND";
pub const ENV_RELATIONAL_DB: &str = "DRUG_PIPELINE_RELATIONAL_DB";
pub const ENV_DOCUMENT_DB: &str = "DRUG_PIPELINE_DOCUMENT_DB";
pub const ENV_PREPROCESSOR: &str = "DRUG_PIPELINE_PREPROCESSOR";
pub const ENV_MODEL: &str = "DRUG_PIPELINE_MODEL";
pub const ENV_ARTIFACT_CACHE: &str = "DRUG_PIPELINE_ARTIFACT_CACHE";

const DEFAULT_BIND: &str = "127.0.0.1:8000";

/// Get the application data directory.
/// Platform data dir (e.g. ~/.local/share/drug-pipeline), falling back to
/// the working directory when none can be determined.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Get the models directory (preprocessor and classifier artifacts)
pub fn models_dir() -> PathBuf {
    app_data_dir().join("models")
}

/// Filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "drug_pipeline=info,tower_http=info"
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{var} is not a valid socket address: {value}")]
    InvalidAddress { var: &'static str, value: String },

    #[error("{var} must be true or false, got '{value}'")]
    InvalidBool { var: &'static str, value: String },

    #[error("{var} is set but empty")]
    EmptyPath { var: &'static str },
}

/// Service configuration resolved from `DRUG_PIPELINE_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub bind: SocketAddr,
    pub relational_db: PathBuf,
    pub document_db: PathBuf,
    pub artifacts: ArtifactPaths,
    pub artifact_cache: bool,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Resolve from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_raw = lookup(ENV_BIND).unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw.trim().parse().map_err(|_| ConfigError::InvalidAddress {
            var: ENV_BIND,
            value: bind_raw.clone(),
        })?;

        let path = |var: &'static str, default: PathBuf| -> Result<PathBuf, ConfigError> {
            match lookup(var) {
                None => Ok(default),
                Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyPath { var }),
                Some(v) => Ok(PathBuf::from(v)),
            }
        };

        let data = app_data_dir();
        let models = models_dir();

        Ok(Self {
            bind,
            relational_db: path(ENV_RELATIONAL_DB, data.join("relational.db"))?,
            document_db: path(ENV_DOCUMENT_DB, data.join("documents.db"))?,
            artifacts: ArtifactPaths {
                preprocessor: path(ENV_PREPROCESSOR, models.join("preprocessor.json"))?,
                model: path(ENV_MODEL, models.join("drug_classifier.json"))?,
            },
            artifact_cache: match lookup(ENV_ARTIFACT_CACHE) {
                None => true,
                Some(v) => parse_bool(ENV_ARTIFACT_CACHE, &v)?,
            },
        })
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            var,
            value: value.to_string(),
        }),
    }
}
