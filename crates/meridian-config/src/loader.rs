//! Layered configuration loading.
//!
//! Layers apply in order, each overriding the previous one:
//!
//! 1. A starting point: defaults or a preset
//! 2. A file or string, TOML or JSON
//! 3. Environment overrides named `PREFIX__SECTION__KEY`
//!
//! Validation runs last, so a phase cycle introduced by any layer is caught
//! before a chain is ever built.

use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::{ConfigError, LogFormat, MeridianConfig};

/// Serialization format of a configuration source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML.
    Toml,
    /// JSON.
    Json,
}

impl ConfigFormat {
    /// Picks the format from a file extension.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Format`] for anything but `.toml` and `.json`.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        path.extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| {
                ConfigError::Format(format!("no extension on {}", path.display()))
            })?
            .parse()
    }

    fn parse(self, content: &str) -> Result<MeridianConfig, ConfigError> {
        Ok(match self {
            Self::Toml => toml::from_str(content)?,
            Self::Json => serde_json::from_str(content)?,
        })
    }
}

impl FromStr for ConfigFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Format(other.to_string())),
        }
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Toml => "toml",
            Self::Json => "json",
        })
    }
}

/// Builds a [`MeridianConfig`] from layered sources.
///
/// # Example
///
/// ```no_run
/// use meridian_config::ConfigLoader;
///
/// # fn main() -> Result<(), meridian_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_production()
///     .with_optional_file("/etc/meridian/bus.toml")?
///     .with_env_prefix("MERIDIAN")
///     .load()?;
///
/// assert!(config.pause_timeout().is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config: MeridianConfig,
    env_prefix: Option<String>,
    env: Option<Vec<(String, String)>>,
}

impl ConfigLoader {
    /// A loader starting from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets to the default configuration.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = MeridianConfig::default();
        self
    }

    /// Resets to [`MeridianConfig::development`].
    ///
    /// ```
    /// use meridian_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert!(config.chain.expose_internal_errors);
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = MeridianConfig::development();
        self
    }

    /// Resets to [`MeridianConfig::production`].
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = MeridianConfig::production();
        self
    }

    /// Replaces the configuration with the contents of `path`.
    ///
    /// The format follows the extension. Sections the file leaves out take
    /// their serde defaults, not the values of an earlier preset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileNotFound`] for a missing file, and read or
    /// parse errors otherwise. Unknown keys are parse errors.
    pub fn with_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path).map_err(|e| ConfigError::read(path, e))?;
        self.with_source(&content, format)
    }

    /// Like [`with_file`](Self::with_file), but a missing file leaves the
    /// configuration untouched.
    ///
    /// # Errors
    ///
    /// Returns read or parse errors for a file that exists.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Replaces the configuration with `content` in the named format
    /// (`"toml"` or `"json"`).
    ///
    /// ```
    /// use meridian_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[chain]\npause_timeout_ms = 3000", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.chain.pause_timeout_ms, Some(3000));
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown format or unparseable content.
    pub fn with_string(self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.with_source(content, format.parse()?)
    }

    /// Replaces the configuration with `content` in `format`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] or [`ConfigError::Json`].
    pub fn with_source(mut self, content: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        self.config = format.parse(content)?;
        Ok(self)
    }

    /// Reads overrides from variables named `PREFIX__SECTION__KEY`, for
    /// example `MERIDIAN__CHAIN__PAUSE_TIMEOUT_MS=5000` or
    /// `MERIDIAN__TELEMETRY__LOGGING__LEVEL=debug`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_ascii_uppercase());
        self
    }

    /// Uses `vars` instead of the process environment for overrides.
    #[must_use]
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    /// Loads `.env` from the working directory or a parent into the process
    /// environment. A missing file is fine.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Dotenv`] if the file cannot be parsed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(e.into()),
        }
    }

    /// Applies environment overrides and validates.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EnvOverride`] for a malformed override and
    /// any error from [`MeridianConfig::validate`].
    pub fn load(self) -> Result<MeridianConfig, ConfigError> {
        let config = self.load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides without validating.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EnvOverride`] for a malformed override.
    pub fn load_unvalidated(self) -> Result<MeridianConfig, ConfigError> {
        let Self {
            mut config,
            env_prefix,
            env,
        } = self;
        let Some(prefix) = env_prefix else {
            return Ok(config);
        };

        let vars = env.unwrap_or_else(|| env::vars().collect());
        let mut applied = 0usize;
        for (key, value) in &vars {
            let Some(path) = key
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix("__"))
            else {
                continue;
            };
            if apply_override(&mut config, path, value)
                .map_err(|reason| ConfigError::env_override(key, reason))?
            {
                applied += 1;
            }
        }
        if applied > 0 {
            tracing::debug!(prefix = %prefix, applied, "Applied environment overrides");
        }
        Ok(config)
    }
}

/// Applies one override. Returns `Ok(false)` for keys that name nothing.
fn apply_override(config: &mut MeridianConfig, path: &str, value: &str) -> Result<bool, &'static str> {
    let segments: Vec<&str> = path.split("__").collect();
    let chain = &mut config.chain;
    let telemetry = &mut config.telemetry;

    match segments.as_slice() {
        ["PHASES", "REPLACE_STANDARD"] => config.phases.replace_standard = flag(value)?,

        ["CHAIN", "PAUSE_TIMEOUT_MS"] => {
            chain.pause_timeout_ms = if value.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(value.parse().map_err(|_| "expected integer or 'none'")?)
            };
        }
        ["CHAIN", "LOG_FAULTS"] => chain.log_faults = flag(value)?,
        ["CHAIN", "EXPOSE_INTERNAL_ERRORS"] => chain.expose_internal_errors = flag(value)?,

        ["TELEMETRY", "SERVICE_NAME"] => telemetry.service_name = value.to_string(),
        ["TELEMETRY", "SERVICE_VERSION"] => telemetry.service_version = optional(value),
        ["TELEMETRY", "ENVIRONMENT"] => telemetry.environment = value.to_string(),

        ["TELEMETRY", "METRICS", "ENABLED"] => telemetry.metrics.enabled = flag(value)?,
        ["TELEMETRY", "METRICS", "ADDR"] => telemetry.metrics.addr = value.to_string(),

        ["TELEMETRY", "TRACING", "ENABLED"] => telemetry.tracing.enabled = flag(value)?,
        ["TELEMETRY", "TRACING", "OTLP_ENDPOINT"] => {
            telemetry.tracing.otlp_endpoint = optional(value);
        }
        ["TELEMETRY", "TRACING", "SAMPLING_RATIO"] => {
            telemetry.tracing.sampling_ratio = value.parse().map_err(|_| "expected float")?;
        }

        ["TELEMETRY", "LOGGING", "ENABLED"] => telemetry.logging.enabled = flag(value)?,
        ["TELEMETRY", "LOGGING", "LEVEL"] => telemetry.logging.level = value.to_string(),
        ["TELEMETRY", "LOGGING", "FORMAT"] => {
            telemetry.logging.format = match value.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                _ => return Err("expected 'json' or 'pretty'"),
            };
        }
        ["TELEMETRY", "LOGGING", "THREAD_IDS"] => telemetry.logging.thread_ids = flag(value)?,
        ["TELEMETRY", "LOGGING", "INCLUDE_LOCATION"] => {
            telemetry.logging.include_location = flag(value)?;
        }

        _ => return Ok(false),
    }
    Ok(true)
}

fn flag(value: &str) -> Result<bool, &'static str> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err("expected boolean"),
    }
}

fn optional(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}
