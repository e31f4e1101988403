//! The root configuration, its presets and validation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ChainConfig, ConfigError, LogFormat, PhasesConfig, TelemetryConfigSection};
use meridian_chain::PhaseRegistry;
use meridian_telemetry::{LogConfig, LogOutput, TelemetryConfig};

/// Everything a bus needs to know before it starts.
///
/// Usually produced by [`ConfigLoader`](crate::ConfigLoader), which layers
/// files and environment variables over a preset.
///
/// # Example
///
/// ```
/// use meridian_config::MeridianConfig;
///
/// let config = MeridianConfig::default();
/// assert!(config.chain.log_faults);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct MeridianConfig {
    /// `[phases]`
    #[serde(default)]
    pub phases: PhasesConfig,
    /// `[chain]`
    #[serde(default)]
    pub chain: ChainConfig,
    /// `[telemetry]`
    #[serde(default)]
    pub telemetry: TelemetryConfigSection,
}

impl MeridianConfig {
    /// Assembles a configuration section by section.
    ///
    /// # Example
    ///
    /// ```
    /// use meridian_config::{ChainConfig, MeridianConfig};
    ///
    /// let config = MeridianConfig::builder()
    ///     .chain(ChainConfig {
    ///         pause_timeout_ms: Some(30_000),
    ///         ..Default::default()
    ///     })
    ///     .build();
    ///
    /// assert_eq!(config.pause_timeout().unwrap().as_secs(), 30);
    /// ```
    #[must_use]
    pub fn builder() -> MeridianConfigBuilder {
        MeridianConfigBuilder::new()
    }

    /// Checks the configuration as a whole.
    ///
    /// Both phase sets are resolved, so an unknown phase reference or an
    /// ordering cycle surfaces here rather than when the bus is built.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Phases`] for a phase set that does not order,
    /// [`ConfigError::InvalidValue`] for a zero pause timeout, an unparsable
    /// metrics address or a sampling ratio outside `0.0..=1.0`, and
    /// [`ConfigError::Inconsistent`] when tracing has no endpoint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.inbound_phases()?;
        self.outbound_phases()?;

        if self.chain.pause_timeout_ms == Some(0) {
            return Err(ConfigError::invalid_value(
                "chain.pause_timeout_ms",
                "must be positive; omit it to wait indefinitely",
            ));
        }

        let metrics = &self.telemetry.metrics;
        if metrics.enabled
            && !metrics.addr.is_empty()
            && metrics.addr.parse::<std::net::SocketAddr>().is_err()
        {
            return Err(ConfigError::invalid_value(
                "telemetry.metrics.addr",
                format!("invalid socket address: {}", metrics.addr),
            ));
        }

        if !(0.0..=1.0).contains(&self.telemetry.tracing.sampling_ratio) {
            return Err(ConfigError::invalid_value(
                "telemetry.tracing.sampling_ratio",
                "outside 0.0..=1.0",
            ));
        }

        if self.telemetry.tracing.enabled && self.telemetry.tracing.otlp_endpoint.is_none() {
            return Err(ConfigError::Inconsistent(
                "telemetry.tracing.otlp_endpoint must be set when tracing is enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// The inbound phase registry, resolved once to check it orders.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Phases`] for a duplicate, unknown or cyclic
    /// declaration.
    pub fn inbound_phases(&self) -> Result<PhaseRegistry, ConfigError> {
        checked("inbound", self.phases.inbound_registry())
    }

    /// The outbound phase registry, resolved once to check it orders.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Phases`] for a duplicate, unknown or cyclic
    /// declaration.
    pub fn outbound_phases(&self) -> Result<PhaseRegistry, ConfigError> {
        checked("outbound", self.phases.outbound_registry())
    }

    /// How long a chain may stay paused.
    #[must_use]
    pub fn pause_timeout(&self) -> Option<Duration> {
        self.chain.pause_timeout_ms.map(Duration::from_millis)
    }

    /// Converts the telemetry section into the telemetry crate's config.
    #[must_use]
    pub fn to_telemetry_config(&self) -> TelemetryConfig {
        let section = &self.telemetry;

        let metrics = meridian_telemetry::MetricsConfig {
            enabled: section.metrics.enabled,
            addr: section.metrics.addr.clone(),
            duration_buckets: section.metrics.duration_buckets.clone(),
            ..meridian_telemetry::MetricsConfig::default()
        };

        let defaults = meridian_telemetry::TracingConfig::default();
        let tracing = meridian_telemetry::TracingConfig {
            enabled: section.tracing.enabled,
            otlp_endpoint: section
                .tracing
                .otlp_endpoint
                .clone()
                .unwrap_or(defaults.otlp_endpoint.clone()),
            sample_ratio: section.tracing.sampling_ratio,
            ..defaults
        };

        let logging = LogConfig {
            enabled: section.logging.enabled,
            filter: section.logging.level.clone(),
            output: match section.logging.format {
                LogFormat::Json => LogOutput::Json,
                LogFormat::Pretty => LogOutput::Pretty,
            },
            source_location: section.logging.include_location,
            thread_ids: section.logging.thread_ids,
            ..LogConfig::default()
        };

        let mut builder = TelemetryConfig::builder()
            .service_name(&section.service_name)
            .environment(&section.environment)
            .metrics(metrics)
            .tracing(tracing)
            .logging(logging);
        if let Some(version) = &section.service_version {
            builder = builder.service_version(version);
        }
        builder.build()
    }

    /// Local development: pretty debug logs with locations and thread ids,
    /// internal fault details passed to peers, metrics recorded but not
    /// served.
    ///
    /// # Example
    ///
    /// ```
    /// use meridian_config::MeridianConfig;
    ///
    /// let config = MeridianConfig::development();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.include_location = true;
        config.telemetry.logging.thread_ids = true;
        config.telemetry.environment = "development".to_string();
        config.telemetry.metrics.addr = String::new();

        config.chain.expose_internal_errors = true;

        config
    }

    /// Production: JSON logs at info, internal fault details masked, and
    /// chains paused for more than 30 seconds cancelled.
    ///
    /// # Example
    ///
    /// ```
    /// use meridian_config::{LogFormat, MeridianConfig};
    ///
    /// let config = MeridianConfig::production();
    /// assert_eq!(config.telemetry.logging.format, LogFormat::Json);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.environment = "production".to_string();

        config.chain.expose_internal_errors = false;
        config.chain.pause_timeout_ms = Some(30_000);

        config
    }
}

/// Builder for [`MeridianConfig`]. Sections left unset keep their
/// defaults.
#[derive(Debug, Default)]
pub struct MeridianConfigBuilder {
    config: MeridianConfig,
}

impl MeridianConfigBuilder {
    /// Starts from [`MeridianConfig::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces `[phases]`.
    #[must_use]
    pub fn phases(mut self, phases: PhasesConfig) -> Self {
        self.config.phases = phases;
        self
    }

    /// Replaces `[chain]`.
    #[must_use]
    pub fn chain(mut self, chain: ChainConfig) -> Self {
        self.config.chain = chain;
        self
    }

    /// Replaces `[telemetry]`.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetryConfigSection) -> Self {
        self.config.telemetry = telemetry;
        self
    }

    /// Returns the configuration without checking it.
    #[must_use]
    pub fn build(self) -> MeridianConfig {
        self.config
    }

    /// Returns the configuration once [`MeridianConfig::validate`] accepts it.
    ///
    /// # Errors
    ///
    /// Whatever [`MeridianConfig::validate`] reports.
    pub fn build_validated(self) -> Result<MeridianConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn checked(
    direction: &'static str,
    registry: Result<PhaseRegistry, meridian_chain::ChainError>,
) -> Result<PhaseRegistry, ConfigError> {
    let registry = registry.map_err(|e| ConfigError::phases(direction, e))?;
    registry
        .order()
        .map_err(|e| ConfigError::phases(direction, e))?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MetricsConfig, PhaseDeclaration, TracingConfig};

    fn declaration(name: &str, before: &[&str], after: &[&str]) -> PhaseDeclaration {
        PhaseDeclaration {
            name: name.to_string(),
            before: before.iter().map(ToString::to_string).collect(),
            after: after.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn test_default_config() {
        let config = MeridianConfig::default();
        assert!(config.phases.inbound.is_empty());
        assert!(config.pause_timeout().is_none());
        assert_eq!(config.telemetry.service_name, "meridian");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_all_sections() {
        let config = MeridianConfig::builder()
            .phases(PhasesConfig {
                outbound: vec![declaration("sign", &["send"], &["encode"])],
                ..Default::default()
            })
            .chain(ChainConfig {
                log_faults: false,
                ..Default::default()
            })
            .telemetry(TelemetryConfigSection {
                service_name: "greeter".to_string(),
                ..Default::default()
            })
            .build();

        assert_eq!(config.phases.outbound.len(), 1);
        assert!(!config.chain.log_faults);
        assert_eq!(config.telemetry.service_name, "greeter");
        assert!(config.outbound_phases().unwrap().contains("sign"));
    }

    #[test]
    fn test_validate_rejects_phase_cycle() {
        let config = MeridianConfig::builder()
            .phases(PhasesConfig {
                inbound: vec![
                    declaration("a", &["b"], &[]),
                    declaration("b", &["a"], &[]),
                ],
                ..Default::default()
            })
            .build();

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Phases {
                direction: "inbound",
                ..
            }
        ));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_validate_rejects_unknown_phase_reference() {
        let config = MeridianConfig::builder()
            .phases(PhasesConfig {
                outbound: vec![declaration("sign", &["transmit"], &[])],
                ..Default::default()
            })
            .build();

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Phases {
                direction: "outbound",
                ..
            }
        ));
        assert!(err.to_string().contains("transmit"));
    }

    #[test]
    fn test_validate_rejects_zero_pause_timeout() {
        let config = MeridianConfig::builder()
            .chain(ChainConfig {
                pause_timeout_ms: Some(0),
                ..Default::default()
            })
            .build();

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("pause_timeout_ms"));
    }

    #[test]
    fn test_validate_invalid_metrics_addr() {
        let config = MeridianConfig::builder()
            .telemetry(TelemetryConfigSection {
                metrics: MetricsConfig {
                    enabled: true,
                    addr: "invalid".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            })
            .build();

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("metrics.addr"));
    }

    #[test]
    fn test_validate_invalid_sampling_ratio() {
        let config = MeridianConfig::builder()
            .telemetry(TelemetryConfigSection {
                tracing: TracingConfig {
                    sampling_ratio: 2.0,
                    ..Default::default()
                },
                ..Default::default()
            })
            .build();

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("sampling_ratio"));
    }

    #[test]
    fn test_validate_tracing_without_endpoint() {
        let config = MeridianConfig::builder()
            .telemetry(TelemetryConfigSection {
                tracing: TracingConfig {
                    enabled: true,
                    ..Default::default()
                },
                ..Default::default()
            })
            .build();

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("otlp_endpoint"));
    }

    #[test]
    fn test_to_telemetry_config() {
        let mut config = MeridianConfig::development();
        config.telemetry.service_name = "greeter".to_string();
        config.telemetry.service_version = Some("2.1.0".to_string());

        let telemetry = config.to_telemetry_config();
        assert_eq!(telemetry.service.name, "greeter");
        assert_eq!(telemetry.tracing.service_version, "2.1.0");
        assert_eq!(telemetry.logging.filter, "debug");
        assert_eq!(telemetry.logging.output, LogOutput::Pretty);
        assert!(telemetry.logging.thread_ids);
        assert_eq!(telemetry.logging.service_name, "greeter");
        assert!(telemetry.metrics.addr.is_empty());
        assert!(!telemetry.tracing.enabled);
    }

    #[test]
    fn test_development_preset() {
        let config = MeridianConfig::development();
        assert_eq!(config.telemetry.logging.format, LogFormat::Pretty);
        assert!(config.chain.expose_internal_errors);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_production_preset() {
        let config = MeridianConfig::production();
        assert_eq!(config.telemetry.logging.level, "info");
        assert!(!config.chain.expose_internal_errors);
        assert_eq!(config.pause_timeout(), Some(Duration::from_secs(30)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_build_validated_failure() {
        let result = MeridianConfig::builder()
            .phases(PhasesConfig {
                inbound: vec![declaration("receive", &[], &[])],
                ..Default::default()
            })
            .build_validated();

        assert!(matches!(result, Err(ConfigError::Phases { .. })));
    }

    #[test]
    fn test_toml_serialization() {
        let config = MeridianConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[chain]"));
        assert!(toml_str.contains("[telemetry]"));
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
            [chain]
            pause_timeout_ms = 1500

            [[phases.inbound]]
            name = "audit"
            after = ["pre-invoke"]
            before = ["invoke"]
        "#;

        let config: MeridianConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.pause_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.phases.inbound[0].name, "audit");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml_str = r#"
            [chain]
            pause_timeout_ms = 1500
            unknown_field = "value"
        "#;

        let result: Result<MeridianConfig, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }
}
