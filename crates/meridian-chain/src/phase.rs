//! Named phases and their total order.
//!
//! A [`PhaseRegistry`] collects [`Phase`] declarations, each of which may ask
//! to run before or after other phases, and resolves them into a
//! [`PhaseOrder`]. Phases with no constraint between them keep the order in
//! which they were declared, so a registry declared as a plain list resolves
//! to exactly that list.
//!
//! ```
//! use meridian_chain::{Phase, PhaseRegistry};
//!
//! let mut registry = PhaseRegistry::new();
//! registry.declare(Phase::new("receive"))?;
//! registry.declare(Phase::new("invoke"))?;
//! registry.declare(Phase::new("decode").after("receive").before("invoke"))?;
//!
//! let order = registry.order()?;
//! assert_eq!(order.names().collect::<Vec<_>>(), ["receive", "decode", "invoke"]);
//! # Ok::<(), meridian_chain::ChainError>(())
//! ```

use crate::ChainError;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Standard phase names used by [`PhaseRegistry::inbound`] and
/// [`PhaseRegistry::outbound`].
pub mod names {
    /// Message arrives from the transport.
    pub const RECEIVE: &str = "receive";
    /// Raw stream handling before decoding.
    pub const PRE_STREAM: &str = "pre-stream";
    /// Application hooks on the raw stream.
    pub const USER_STREAM: &str = "user-stream";
    /// After raw stream handling.
    pub const POST_STREAM: &str = "post-stream";
    /// Wire bytes are decoded into a document.
    pub const DECODE: &str = "decode";
    /// Protocol-level processing before application hooks.
    pub const PRE_PROTOCOL: &str = "pre-protocol";
    /// Application hooks at the protocol level.
    pub const USER_PROTOCOL: &str = "user-protocol";
    /// Protocol-level processing after application hooks.
    pub const POST_PROTOCOL: &str = "post-protocol";
    /// Document is bound to an argument list.
    pub const UNMARSHAL: &str = "unmarshal";
    /// Logical processing before application hooks.
    pub const PRE_LOGICAL: &str = "pre-logical";
    /// Application hooks on the logical message.
    pub const USER_LOGICAL: &str = "user-logical";
    /// Logical processing after application hooks.
    pub const POST_LOGICAL: &str = "post-logical";
    /// Last checks before the operation runs.
    pub const PRE_INVOKE: &str = "pre-invoke";
    /// The operation runs.
    pub const INVOKE: &str = "invoke";
    /// Bookkeeping after the operation.
    pub const POST_INVOKE: &str = "post-invoke";

    /// Outbound message is prepared.
    pub const SETUP: &str = "setup";
    /// Conduit is selected and prepared.
    pub const PREPARE_SEND: &str = "prepare-send";
    /// Argument list is bound to a document.
    pub const MARSHAL: &str = "marshal";
    /// Document is encoded into wire bytes.
    pub const ENCODE: &str = "encode";
    /// Message is handed to the transport.
    pub const SEND: &str = "send";

    /// Inbound phases in resolution order.
    pub const INBOUND: &[&str] = &[
        RECEIVE,
        PRE_STREAM,
        USER_STREAM,
        POST_STREAM,
        DECODE,
        PRE_PROTOCOL,
        USER_PROTOCOL,
        POST_PROTOCOL,
        UNMARSHAL,
        PRE_LOGICAL,
        USER_LOGICAL,
        POST_LOGICAL,
        PRE_INVOKE,
        INVOKE,
        POST_INVOKE,
    ];

    /// Outbound phases in resolution order.
    pub const OUTBOUND: &[&str] = &[
        SETUP,
        PRE_LOGICAL,
        USER_LOGICAL,
        POST_LOGICAL,
        PREPARE_SEND,
        MARSHAL,
        PRE_PROTOCOL,
        USER_PROTOCOL,
        POST_PROTOCOL,
        ENCODE,
        PRE_STREAM,
        USER_STREAM,
        POST_STREAM,
        SEND,
    ];
}

/// A phase declaration with optional ordering constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    name: String,
    before: Vec<String>,
    after: Vec<String>,
}

impl Phase {
    /// Declares a phase with no constraints.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    /// Requires this phase to run before `other`.
    #[must_use]
    pub fn before(mut self, other: impl Into<String>) -> Self {
        self.before.push(other.into());
        self
    }

    /// Requires this phase to run after `other`.
    #[must_use]
    pub fn after(mut self, other: impl Into<String>) -> Self {
        self.after.push(other.into());
        self
    }

    /// The phase name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Phases this one must precede.
    #[must_use]
    pub fn runs_before(&self) -> &[String] {
        &self.before
    }

    /// Phases this one must follow.
    #[must_use]
    pub fn runs_after(&self) -> &[String] {
        &self.after
    }
}

/// Position of a phase within a [`PhaseOrder`]. Lower runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhaseId(u16);

impl PhaseId {
    /// The zero-based position.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A resolved, immutable phase sequence.
#[derive(Clone, PartialEq, Eq)]
pub struct PhaseOrder {
    names: Vec<String>,
    ids: HashMap<String, PhaseId>,
}

impl PhaseOrder {
    fn from_names(names: Vec<String>) -> Result<Self, ChainError> {
        if names.len() > usize::from(u16::MAX) {
            return Err(ChainError::TooManyPhases(names.len()));
        }
        let ids = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), PhaseId(i as u16)))
            .collect();
        Ok(Self { names, ids })
    }

    /// Looks up a phase by name.
    #[must_use]
    pub fn id(&self, name: &str) -> Option<PhaseId> {
        self.ids.get(name).copied()
    }

    /// The name of a phase. Ids from another order yield `None`.
    #[must_use]
    pub fn name(&self, id: PhaseId) -> Option<&str> {
        self.names.get(id.index()).map(String::as_str)
    }

    /// Returns `true` if `name` is part of this order.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.ids.contains_key(name)
    }

    /// Phase names, first to last.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Number of phases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` if there are no phases.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl fmt::Debug for PhaseOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.names).finish()
    }
}

/// Collects phase declarations and resolves them into a [`PhaseOrder`].
///
/// The resolved order is cached until the next declaration.
#[derive(Debug, Default)]
pub struct PhaseRegistry {
    phases: Vec<Phase>,
    resolved: OnceLock<Arc<PhaseOrder>>,
}

impl PhaseRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry from phase names, each ordered after the previous.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::DuplicatePhase`] if a name repeats.
    pub fn sequential<I, S>(names: I) -> Result<Self, ChainError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        let mut previous: Option<String> = None;
        for name in names {
            let name = name.into();
            let mut phase = Phase::new(name.clone());
            if let Some(prev) = previous.replace(name) {
                phase = phase.after(prev);
            }
            registry.declare(phase)?;
        }
        Ok(registry)
    }

    /// The standard inbound phases: `receive` through `post-invoke`.
    #[must_use]
    pub fn inbound() -> Self {
        Self::standard(names::INBOUND)
    }

    /// The standard outbound phases: `setup` through `send`.
    #[must_use]
    pub fn outbound() -> Self {
        Self::standard(names::OUTBOUND)
    }

    fn standard(list: &[&str]) -> Self {
        let mut registry = Self::new();
        let mut previous: Option<&str> = None;
        for &name in list {
            let phase = match previous {
                Some(prev) => Phase::new(name).after(prev),
                None => Phase::new(name),
            };
            registry.phases.push(phase);
            previous = Some(name);
        }
        registry
    }

    /// Adds a phase declaration.
    ///
    /// Constraints may name phases that are declared later; they are only
    /// checked when the order is resolved.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::DuplicatePhase`] if the name is already declared.
    pub fn declare(&mut self, phase: Phase) -> Result<&mut Self, ChainError> {
        if self.contains(phase.name()) {
            return Err(ChainError::DuplicatePhase(phase.name));
        }
        self.phases.push(phase);
        self.resolved = OnceLock::new();
        Ok(self)
    }

    /// Returns `true` if a phase with this name is declared.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.phases.iter().any(|p| p.name == name)
    }

    /// Declared phases, in declaration order.
    #[must_use]
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Number of declared phases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Returns `true` if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Resolves the declarations into a total order.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::UnknownPhase`] if a constraint names an
    /// undeclared phase and [`ChainError::PhaseCycle`] if the constraints
    /// cannot all be satisfied.
    pub fn order(&self) -> Result<Arc<PhaseOrder>, ChainError> {
        if let Some(order) = self.resolved.get() {
            return Ok(Arc::clone(order));
        }
        let order = Arc::new(self.resolve()?);
        let _ = self.resolved.set(Arc::clone(&order));
        Ok(order)
    }

    /// Kahn's algorithm, always releasing the earliest-declared ready phase.
    fn resolve(&self) -> Result<PhaseOrder, ChainError> {
        let index: HashMap<&str, usize> = self
            .phases
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.as_str(), i))
            .collect();

        let lookup = |name: &str, from: &Phase| {
            index
                .get(name)
                .copied()
                .ok_or_else(|| ChainError::unknown_phase(name, Some(&from.name)))
        };

        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); self.phases.len()];
        let mut in_degree = vec![0usize; self.phases.len()];
        for (i, phase) in self.phases.iter().enumerate() {
            for target in &phase.before {
                let j = lookup(target, phase)?;
                successors[i].push(j);
                in_degree[j] += 1;
            }
            for source in &phase.after {
                let j = lookup(source, phase)?;
                successors[j].push(i);
                in_degree[i] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut ordered = Vec::with_capacity(self.phases.len());

        while let Some(Reverse(i)) = ready.pop() {
            ordered.push(self.phases[i].name.clone());
            for &j in &successors[i] {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    ready.push(Reverse(j));
                }
            }
        }

        if ordered.len() < self.phases.len() {
            let phases = self
                .phases
                .iter()
                .zip(&in_degree)
                .filter(|(_, d)| **d > 0)
                .map(|(p, _)| p.name.clone())
                .collect();
            return Err(ChainError::PhaseCycle { phases });
        }

        PhaseOrder::from_names(ordered)
    }
}

impl Clone for PhaseRegistry {
    fn clone(&self) -> Self {
        Self {
            phases: self.phases.clone(),
            resolved: OnceLock::new(),
        }
    }
}
