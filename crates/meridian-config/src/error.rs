//! Configuration errors.

use meridian_chain::ChainError;
use std::path::PathBuf;
use thiserror::Error;

/// Why a configuration could not be loaded or is unusable.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The named file does not exist.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// Path that was tried.
        path: PathBuf,
    },

    /// The file exists but could not be read.
    #[error("cannot read configuration file {path}")]
    Read {
        /// Path of the file.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A source in a format the loader does not know.
    #[error("unsupported configuration format: {0}")]
    Format(String),

    /// A `.env` file that exists but cannot be parsed.
    #[error("invalid .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),

    /// Malformed TOML, or a key no section declares.
    #[error("invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Malformed JSON, or a key no section declares.
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// A single field holds a value outside its domain.
    #[error("{field}: {reason}")]
    InvalidValue {
        /// Dotted path of the field, such as `chain.pause_timeout_ms`.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The phase declarations of one direction cannot be ordered.
    #[error("invalid {direction} phases: {source}")]
    Phases {
        /// `inbound` or `outbound`.
        direction: &'static str,
        /// Duplicate, unknown reference or cycle.
        #[source]
        source: ChainError,
    },

    /// An environment override could not be parsed.
    #[error("environment override {var}: {reason}")]
    EnvOverride {
        /// Variable name.
        var: String,
        /// Expected shape of the value.
        reason: String,
    },

    /// Settings that are fine alone but inconsistent together.
    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

impl ConfigError {
    pub(crate) fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn phases(direction: &'static str, source: ChainError) -> Self {
        Self::Phases { direction, source }
    }

    pub(crate) fn env_override(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvOverride {
            var: var.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error comes from the phase declarations.
    #[must_use]
    pub const fn is_phase_error(&self) -> bool {
        matches!(self, Self::Phases { .. })
    }
}
