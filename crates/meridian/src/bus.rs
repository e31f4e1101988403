//! The bus: configuration turned into ready-to-run chains.

use crate::BusError;
use meridian_chain::interceptors::{
    FaultEnvelopeInterceptor, LoggingInterceptor, MessageIdInterceptor, TelemetryInterceptor,
};
use meridian_chain::{
    ChainError, ChainOutcome, FaultChainObserver, FaultObserver, Interceptor, InterceptorChain,
    PhaseOrder, SharedInterceptor,
};
use meridian_config::MeridianConfig;
use meridian_core::{Exchange, MessageRole};
use std::sync::Arc;
use std::time::Duration;

/// Holds the resolved phase orders and interceptor lists of one deployment,
/// and builds a fresh chain for every message.
///
/// There is no global bus; create one explicitly and share it.
///
/// # Example
///
/// ```
/// use meridian::prelude::*;
/// use meridian_core::fixtures;
///
/// let bus = Bus::builder()
///     .inbound(FnInterceptor::new("invoker", "invoke", |ctx| {
///         ctx.exchange_mut()
///             .set_out_message(Message::with_content(ContentFormat::TEXT, "hi".to_string()));
///         Ok(Flow::Continue)
///     }))
///     .build()
///     .unwrap();
///
/// let outcome = bus.dispatch(fixtures::request_exchange("<sayHi/>")).unwrap();
/// assert_eq!(outcome.state(), ChainState::Complete);
/// ```
pub struct Bus {
    config: MeridianConfig,
    inbound: Arc<PhaseOrder>,
    outbound: Arc<PhaseOrder>,
    inbound_interceptors: Vec<SharedInterceptor>,
    outbound_interceptors: Vec<SharedInterceptor>,
    fault_observer: Arc<dyn FaultObserver>,
}

impl Bus {
    /// Creates a builder with the default configuration.
    #[must_use]
    pub fn builder() -> BusBuilder {
        BusBuilder::new()
    }

    /// Builds a bus with the standard interceptors from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Config`] if the configuration does not validate.
    pub fn from_config(config: MeridianConfig) -> Result<Self, BusError> {
        BusBuilder::new().config(config).build()
    }

    /// The configuration the bus was built from.
    #[must_use]
    pub fn config(&self) -> &MeridianConfig {
        &self.config
    }

    /// Resolved inbound phases.
    #[must_use]
    pub fn inbound_phases(&self) -> &Arc<PhaseOrder> {
        &self.inbound
    }

    /// Resolved outbound phases.
    #[must_use]
    pub fn outbound_phases(&self) -> &Arc<PhaseOrder> {
        &self.outbound
    }

    /// How long chains built by this bus may stay paused.
    #[must_use]
    pub fn pause_timeout(&self) -> Option<Duration> {
        self.config.pause_timeout()
    }

    /// A new inbound chain with every inbound interceptor.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError`] if an interceptor cannot be placed.
    pub fn inbound_chain(&self) -> Result<InterceptorChain, ChainError> {
        self.chain(&self.inbound, &self.inbound_interceptors)
    }

    /// A new outbound chain with every outbound interceptor.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError`] if an interceptor cannot be placed.
    pub fn outbound_chain(&self) -> Result<InterceptorChain, ChainError> {
        self.chain(&self.outbound, &self.outbound_interceptors)
    }

    /// Processes the exchange's inbound message.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError`] if the chain cannot be assembled.
    pub fn dispatch(&self, exchange: Exchange) -> Result<ChainOutcome, ChainError> {
        Ok(self.inbound_chain()?.do_intercept(exchange, MessageRole::In))
    }

    /// Processes the exchange's outbound message.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError`] if the chain cannot be assembled.
    pub fn send(&self, exchange: Exchange) -> Result<ChainOutcome, ChainError> {
        Ok(self.outbound_chain()?.do_intercept(exchange, MessageRole::Out))
    }

    fn chain(
        &self,
        order: &Arc<PhaseOrder>,
        interceptors: &[SharedInterceptor],
    ) -> Result<InterceptorChain, ChainError> {
        let mut chain = InterceptorChain::new(Arc::clone(order))
            .with_fault_observer(Arc::clone(&self.fault_observer))
            .with_fault_logging(self.config.chain.log_faults);
        if let Some(timeout) = self.pause_timeout() {
            chain = chain.with_pause_timeout(timeout);
        }
        chain.add_all(interceptors.iter().cloned())?;
        Ok(chain)
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("inbound", &self.inbound)
            .field("outbound", &self.outbound)
            .field("inbound_interceptors", &self.inbound_interceptors)
            .field("outbound_interceptors", &self.outbound_interceptors)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Bus`].
pub struct BusBuilder {
    config: MeridianConfig,
    standard_interceptors: bool,
    inbound: Vec<SharedInterceptor>,
    outbound: Vec<SharedInterceptor>,
    fault: Vec<SharedInterceptor>,
    fault_observer: Option<Arc<dyn FaultObserver>>,
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BusBuilder {
    /// Creates a builder with the default configuration and the standard
    /// interceptors enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: MeridianConfig::default(),
            standard_interceptors: true,
            inbound: Vec::new(),
            outbound: Vec::new(),
            fault: Vec::new(),
            fault_observer: None,
        }
    }

    /// Uses `config` for phases, chain settings and the fault envelope.
    #[must_use]
    pub fn config(mut self, config: MeridianConfig) -> Self {
        self.config = config;
        self
    }

    /// Whether to add message id, telemetry and logging interceptors to every
    /// chain, and the fault envelope interceptor to the fault chain.
    #[must_use]
    pub fn standard_interceptors(mut self, enabled: bool) -> Self {
        self.standard_interceptors = enabled;
        self
    }

    /// Adds an interceptor to every inbound chain.
    #[must_use]
    pub fn inbound<I: Interceptor>(mut self, interceptor: I) -> Self {
        self.inbound.push(Arc::new(interceptor));
        self
    }

    /// Adds an interceptor to every outbound chain.
    #[must_use]
    pub fn outbound<I: Interceptor>(mut self, interceptor: I) -> Self {
        self.outbound.push(Arc::new(interceptor));
        self
    }

    /// Adds an interceptor to the chain that processes outbound fault
    /// messages.
    #[must_use]
    pub fn fault<I: Interceptor>(mut self, interceptor: I) -> Self {
        self.fault.push(Arc::new(interceptor));
        self
    }

    /// Replaces the default fault chain with a custom observer.
    #[must_use]
    pub fn fault_observer(mut self, observer: Arc<dyn FaultObserver>) -> Self {
        self.fault_observer = Some(observer);
        self
    }

    /// Validates the configuration and resolves both phase orders.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Config`] for invalid configuration and
    /// [`BusError::Chain`] for an interceptor in an unknown phase.
    pub fn build(self) -> Result<Bus, BusError> {
        self.config.validate()?;
        let inbound = self.config.inbound_phases()?.order()?;
        let outbound = self.config.outbound_phases()?.order()?;

        let mut inbound_interceptors: Vec<SharedInterceptor> = Vec::new();
        let mut outbound_interceptors: Vec<SharedInterceptor> = Vec::new();
        let mut fault: Vec<SharedInterceptor> = Vec::new();
        if self.standard_interceptors {
            inbound_interceptors.push(Arc::new(MessageIdInterceptor::inbound()));
            inbound_interceptors.push(Arc::new(TelemetryInterceptor::inbound()));
            inbound_interceptors.push(Arc::new(LoggingInterceptor::inbound()));
            outbound_interceptors.push(Arc::new(MessageIdInterceptor::outbound()));
            outbound_interceptors.push(Arc::new(TelemetryInterceptor::outbound()));
            outbound_interceptors.push(Arc::new(LoggingInterceptor::outbound()));
            fault.push(Arc::new(MessageIdInterceptor::outbound()));
            fault.push(Arc::new(
                FaultEnvelopeInterceptor::new()
                    .expose_internal_errors(self.config.chain.expose_internal_errors),
            ));
            fault.push(Arc::new(LoggingInterceptor::outbound()));
        }
        inbound_interceptors.extend(self.inbound);
        outbound_interceptors.extend(self.outbound);
        fault.extend(self.fault);

        check_phases(&inbound, &inbound_interceptors)?;
        check_phases(&outbound, &outbound_interceptors)?;

        let fault_observer = match self.fault_observer {
            Some(observer) => observer,
            None => Arc::new(FaultChainObserver::outbound(Arc::clone(&outbound), fault)?),
        };

        tracing::debug!(
            inbound_phases = inbound.len(),
            outbound_phases = outbound.len(),
            inbound_interceptors = inbound_interceptors.len(),
            outbound_interceptors = outbound_interceptors.len(),
            "Bus assembled"
        );

        Ok(Bus {
            config: self.config,
            inbound,
            outbound,
            inbound_interceptors,
            outbound_interceptors,
            fault_observer,
        })
    }
}

fn check_phases(order: &PhaseOrder, interceptors: &[SharedInterceptor]) -> Result<(), ChainError> {
    match interceptors.iter().find(|i| !order.contains(i.phase())) {
        Some(bad) => Err(ChainError::UnknownPhase {
            phase: bad.phase().to_string(),
            referenced_by: Some(bad.id().to_string()),
        }),
        None => Ok(()),
    }
}

impl std::fmt::Debug for BusBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusBuilder")
            .field("standard_interceptors", &self.standard_interceptors)
            .field("inbound", &self.inbound)
            .field("outbound", &self.outbound)
            .field("fault", &self.fault)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use meridian_chain::{ChainState, Flow, FnInterceptor};
    use meridian_config::{ChainConfig, PhaseDeclaration, PhasesConfig};
    use meridian_core::fixtures::{request_exchange, response_exchange};
    use meridian_core::{ContentFormat, Fault, Message};
    use tokio_test::{assert_err, assert_ok};

    fn echo() -> impl Interceptor {
        FnInterceptor::new("echo", "invoke", |ctx| {
            let raw = ctx
                .message()?
                .content::<Bytes>(ContentFormat::RAW_BYTES)?
                .cloned()
                .unwrap_or_default();
            ctx.exchange_mut()
                .set_out_message(Message::with_content(ContentFormat::RAW_BYTES, raw));
            Ok(Flow::Continue)
        })
    }

    #[test]
    fn test_default_bus_has_standard_phases() {
        let bus = assert_ok!(Bus::from_config(MeridianConfig::default()));
        assert!(bus.inbound_phases().contains("invoke"));
        assert!(bus.outbound_phases().contains("send"));
        assert!(bus.pause_timeout().is_none());

        let chain = bus.inbound_chain().unwrap();
        assert_eq!(chain.ids(), ["message-id", "telemetry", "logging"]);
    }

    #[test]
    fn test_dispatch_runs_inbound_chain() {
        let bus = Bus::builder().inbound(echo()).build().unwrap();
        let outcome = bus.dispatch(request_exchange("ping")).unwrap();

        assert_eq!(outcome.state(), ChainState::Complete);
        let exchange = outcome.into_exchange().unwrap();
        assert!(exchange.in_message().unwrap().id().is_some());
        assert!(exchange.out_message().is_some());
    }

    #[test]
    fn test_send_runs_outbound_chain() {
        let bus = Bus::builder().build().unwrap();
        let outcome = bus.send(response_exchange("pong")).unwrap();

        let exchange = outcome.into_exchange().unwrap();
        let out = exchange.out_message().unwrap();
        assert!(out.protocol_headers().unwrap().get("message-id").is_some());
    }

    #[test]
    fn test_fault_produces_envelope() {
        let bus = Bus::builder()
            .inbound(FnInterceptor::new("invoker", "invoke", |_ctx| {
                Err(Fault::client("unknown operation"))
            }))
            .build()
            .unwrap();

        let outcome = bus.dispatch(request_exchange("ping")).unwrap();
        assert_eq!(outcome.state(), ChainState::AbortedFault);

        let exchange = outcome.exchange().unwrap();
        let text = exchange
            .out_fault_message()
            .unwrap()
            .content::<String>(ContentFormat::TEXT)
            .unwrap()
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(body["fault"]["message"], "unknown operation");
        assert_eq!(body["fault"]["code"], "client");
    }

    #[test]
    fn test_configured_phase_is_usable() {
        let config = MeridianConfig::builder()
            .phases(PhasesConfig {
                inbound: vec![PhaseDeclaration {
                    name: "audit".to_string(),
                    before: vec!["invoke".to_string()],
                    after: vec!["pre-invoke".to_string()],
                }],
                ..Default::default()
            })
            .build();

        let bus = Bus::builder()
            .config(config)
            .standard_interceptors(false)
            .inbound(echo())
            .inbound(FnInterceptor::new("auditor", "audit", |ctx| {
                ctx.message_mut()?.insert("audited", true);
                Ok(Flow::Continue)
            }))
            .build()
            .unwrap();

        assert_eq!(bus.inbound_chain().unwrap().ids(), ["auditor", "echo"]);
    }

    #[test]
    fn test_unknown_phase_rejected_at_build() {
        let err = assert_err!(Bus::builder()
            .inbound(FnInterceptor::new("auditor", "audit", |_ctx| Ok(Flow::Continue)))
            .build());

        assert!(matches!(
            err,
            BusError::Chain(ChainError::UnknownPhase { .. })
        ));
    }

    #[test]
    fn test_invalid_config_rejected_at_build() {
        let config = MeridianConfig::builder()
            .chain(ChainConfig {
                pause_timeout_ms: Some(0),
                ..Default::default()
            })
            .build();

        assert!(matches!(
            Bus::from_config(config),
            Err(BusError::Config(_))
        ));
    }

    #[test]
    fn test_each_chain_is_fresh() {
        let bus = Bus::builder().build().unwrap();
        let first = bus.inbound_chain().unwrap();
        let second = bus.inbound_chain().unwrap();
        assert_ne!(first.id(), second.id());
    }
}
