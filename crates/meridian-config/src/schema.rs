//! Sections of a Meridian configuration file.
//!
//! Every section rejects unknown keys and falls back to its `Default` for
//! keys it does not mention.

use meridian_chain::{ChainError, Phase, PhaseRegistry};
use serde::{Deserialize, Serialize};

/// A phase declared in configuration.
///
/// # Example
///
/// ```
/// use meridian_config::PhaseDeclaration;
///
/// let audit: PhaseDeclaration = toml::from_str(r#"
///     name = "audit"
///     after = ["user-logical"]
///     before = ["pre-invoke"]
/// "#).unwrap();
/// assert_eq!(audit.to_phase().runs_after(), ["user-logical".to_string()]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PhaseDeclaration {
    /// Phase name.
    pub name: String,

    /// Phases this one must precede.
    #[serde(default)]
    pub before: Vec<String>,

    /// Phases this one must follow.
    #[serde(default)]
    pub after: Vec<String>,
}

impl PhaseDeclaration {
    /// Converts the declaration to a [`Phase`].
    #[must_use]
    pub fn to_phase(&self) -> Phase {
        let phase = self
            .before
            .iter()
            .fold(Phase::new(&self.name), |phase, other| phase.before(other));
        self.after
            .iter()
            .fold(phase, |phase, other| phase.after(other))
    }
}

/// `[phases]`: phases added to, or replacing, the standard sets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct PhasesConfig {
    /// Start from empty registries instead of the standard ones.
    pub replace_standard: bool,
    /// `[[phases.inbound]]` declarations.
    pub inbound: Vec<PhaseDeclaration>,
    /// `[[phases.outbound]]` declarations.
    pub outbound: Vec<PhaseDeclaration>,
}

impl PhasesConfig {
    /// Builds the inbound phase registry.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::DuplicatePhase`] if a declaration repeats a
    /// phase name.
    pub fn inbound_registry(&self) -> Result<PhaseRegistry, ChainError> {
        self.registry(PhaseRegistry::inbound, &self.inbound)
    }

    /// Builds the outbound phase registry.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::DuplicatePhase`] if a declaration repeats a
    /// phase name.
    pub fn outbound_registry(&self) -> Result<PhaseRegistry, ChainError> {
        self.registry(PhaseRegistry::outbound, &self.outbound)
    }

    fn registry(
        &self,
        standard: fn() -> PhaseRegistry,
        declarations: &[PhaseDeclaration],
    ) -> Result<PhaseRegistry, ChainError> {
        let mut registry = if self.replace_standard {
            PhaseRegistry::new()
        } else {
            standard()
        };
        for declaration in declarations {
            registry.declare(declaration.to_phase())?;
        }
        Ok(registry)
    }
}

/// `[chain]`: how chains behave once running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ChainConfig {
    /// Milliseconds a chain may stay paused before it is cancelled as
    /// abandoned. Unset waits forever.
    pub pause_timeout_ms: Option<u64>,
    /// Log faults no [`FaultListener`](meridian_chain::FaultListener)
    /// claimed.
    pub log_faults: bool,
    /// Let fault responses carry internal messages and details. Never turn
    /// this on for untrusted peers.
    pub expose_internal_errors: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            pause_timeout_ms: None,
            log_faults: true,
            expose_internal_errors: false,
        }
    }
}

/// `[telemetry.metrics]`: the Prometheus recorder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    /// Install the recorder.
    pub enabled: bool,
    /// Scrape listener, `host:port`. Empty records without serving.
    pub addr: String,
    /// Upper bounds, in seconds, of the chain duration histogram.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: "0.0.0.0:9090".to_string(),
            duration_buckets: vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0,
            ],
        }
    }
}

/// `[telemetry.tracing]`: OTLP span export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TracingConfig {
    /// Export spans.
    pub enabled: bool,
    /// Collector endpoint. Unset uses the exporter's default.
    pub otlp_endpoint: Option<String>,
    /// Share of traces kept, `0.0..=1.0`.
    pub sampling_ratio: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: None,
            sampling_ratio: 1.0,
        }
    }
}

/// Rendering of log lines.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `"json"`
    #[default]
    Json,
    /// `"pretty"`
    Pretty,
}

/// `[telemetry.logging]`: the tracing subscriber.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Install a subscriber.
    pub enabled: bool,
    /// Filter directives, such as `info,meridian_chain=debug`.
    pub level: String,
    /// `"json"` or `"pretty"`.
    pub format: LogFormat,
    /// Record file and line of each event.
    pub include_location: bool,
    /// Record thread ids, to follow chains resumed on another thread.
    pub thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Json,
            include_location: false,
            thread_ids: false,
        }
    }
}

/// `[telemetry]`: service identity plus the three subsystems.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfigSection {
    /// Name reported in logs, metric labels and span resources.
    pub service_name: String,
    /// Version reported in span resources. Unset uses the crate version.
    pub service_version: Option<String>,
    /// Deployment environment, such as `staging`.
    pub environment: String,
    /// `[telemetry.metrics]`
    pub metrics: MetricsConfig,
    /// `[telemetry.tracing]`
    pub tracing: TracingConfig,
    /// `[telemetry.logging]`
    pub logging: LoggingConfig,
}

impl Default for TelemetryConfigSection {
    fn default() -> Self {
        Self {
            service_name: "meridian".to_string(),
            service_version: None,
            environment: "development".to_string(),
            metrics: MetricsConfig::default(),
            tracing: TracingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_declaration_deserialize() {
        let toml = r#"
            name = "audit"
            after = ["receive"]
        "#;
        let declaration: PhaseDeclaration = toml::from_str(toml).unwrap();
        assert_eq!(declaration.name, "audit");
        assert!(declaration.before.is_empty());

        let phase = declaration.to_phase();
        assert_eq!(phase.name(), "audit");
        assert_eq!(phase.runs_after(), ["receive".to_string()]);
    }

    #[test]
    fn test_phase_declaration_unknown_field_rejected() {
        let toml = r#"
            name = "audit"
            priority = 3
        "#;
        let result: Result<PhaseDeclaration, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_phases_extend_standard_sets() {
        let config = PhasesConfig {
            inbound: vec![PhaseDeclaration {
                name: "audit".to_string(),
                before: vec!["invoke".to_string()],
                after: vec!["pre-invoke".to_string()],
            }],
            ..Default::default()
        };

        let order = config.inbound_registry().unwrap().order().unwrap();
        let names: Vec<&str> = order.names().collect();
        let position = |name: &str| names.iter().position(|n| *n == name).unwrap();
        assert!(position("pre-invoke") < position("audit"));
        assert!(position("audit") < position("invoke"));
        assert_eq!(
            config.outbound_registry().unwrap().len(),
            PhaseRegistry::outbound().len()
        );
    }

    #[test]
    fn test_phases_replace_standard_sets() {
        let config = PhasesConfig {
            replace_standard: true,
            inbound: vec![
                PhaseDeclaration {
                    name: "read".to_string(),
                    before: Vec::new(),
                    after: Vec::new(),
                },
                PhaseDeclaration {
                    name: "dispatch".to_string(),
                    before: Vec::new(),
                    after: vec!["read".to_string()],
                },
            ],
            ..Default::default()
        };

        let order = config.inbound_registry().unwrap().order().unwrap();
        assert_eq!(order.names().collect::<Vec<_>>(), ["read", "dispatch"]);
        assert!(config.outbound_registry().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_phase_rejected() {
        let config = PhasesConfig {
            inbound: vec![PhaseDeclaration {
                name: "receive".to_string(),
                before: Vec::new(),
                after: Vec::new(),
            }],
            ..Default::default()
        };
        assert!(matches!(
            config.inbound_registry(),
            Err(ChainError::DuplicatePhase(name)) if name == "receive"
        ));
    }

    #[test]
    fn test_chain_config_default() {
        let config = ChainConfig::default();
        assert!(config.pause_timeout_ms.is_none());
        assert!(config.log_faults);
        assert!(!config.expose_internal_errors);
    }

    #[test]
    fn test_chain_config_deserialize() {
        let toml = r#"
            pause_timeout_ms = 5000
        "#;
        let config: ChainConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.pause_timeout_ms, Some(5000));
        // Defaults applied
        assert!(config.log_faults);
    }

    #[test]
    fn test_chain_config_unknown_field_rejected() {
        let toml = r#"
            pause_timeout_ms = 5000
            retries = 3
        "#;
        let result: Result<ChainConfig, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_metrics_config_default() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.addr, "0.0.0.0:9090");
        assert!(!config.duration_buckets.is_empty());
    }

    #[test]
    fn test_tracing_config_default() {
        let config = TracingConfig::default();
        assert!(!config.enabled);
        assert!(config.otlp_endpoint.is_none());
        assert!((config.sampling_ratio - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert!(config.enabled);
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_log_format_deserialize() {
        let format: LogFormat = serde_json::from_str(r#""json""#).unwrap();
        assert_eq!(format, LogFormat::Json);

        let format: LogFormat = serde_json::from_str(r#""pretty""#).unwrap();
        assert_eq!(format, LogFormat::Pretty);
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: TelemetryConfigSection = toml::from_str(
            r#"
            service_name = "greeter"

            [logging]
            format = "pretty"
        "#,
        )
        .unwrap();
        assert_eq!(config.service_name, "greeter");
        assert_eq!(config.environment, "development");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.logging.level, "info");
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfigSection::default();
        assert_eq!(config.service_name, "meridian");
        assert_eq!(config.environment, "development");
    }
}
