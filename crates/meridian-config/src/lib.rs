//! Configuration for a Meridian bus.
//!
//! A [`MeridianConfig`] has three sections. [`PhasesConfig`] adds to or
//! replaces the standard phase sets, [`ChainConfig`] covers pause timeouts
//! and fault handling, and [`TelemetryConfigSection`] describes logging,
//! metrics and span export.
//!
//! [`ConfigLoader`] builds one in layers: a preset, then TOML or JSON
//! sources, then `PREFIX__SECTION__KEY` environment variables. Sources
//! reject unknown keys, and loading ends with [`MeridianConfig::validate`],
//! which resolves both phase sets so a bad phase reference fails at load
//! time.
//!
//! # Example
//!
//! ```no_run
//! use meridian_config::{ConfigLoader, MeridianConfig};
//!
//! # fn main() -> Result<(), meridian_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_file("meridian.toml")?
//!     .with_env_prefix("MERIDIAN")
//!     .load()?;
//!
//! println!("Paused chains time out after {:?}", config.pause_timeout());
//! # Ok(())
//! # }
//! ```
//!
//! # File layout
//!
//! ```toml
//! [phases]
//! replace_standard = false
//!
//! [[phases.inbound]]
//! name = "audit"
//! after = ["pre-invoke"]
//! before = ["invoke"]
//!
//! [chain]
//! pause_timeout_ms = 30000
//! log_faults = true
//! expose_internal_errors = false
//!
//! [telemetry]
//! service_name = "greeter"
//! environment = "production"
//!
//! [telemetry.metrics]
//! enabled = true
//! addr = "0.0.0.0:9090"
//!
//! [telemetry.tracing]
//! enabled = true
//! otlp_endpoint = "http://localhost:4317"
//! sampling_ratio = 1.0
//!
//! [telemetry.logging]
//! enabled = true
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment overrides
//!
//! Scalar keys only; phase declarations come from files.
//!
//! - `MERIDIAN__CHAIN__PAUSE_TIMEOUT_MS=5000`
//! - `MERIDIAN__TELEMETRY__SERVICE_NAME=greeter`
//! - `MERIDIAN__TELEMETRY__METRICS__ENABLED=false`

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::*;
pub use error::ConfigError;
pub use loader::{ConfigFormat, ConfigLoader};
pub use schema::*;
