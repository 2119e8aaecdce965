//! Testing harnesses for flows and engines.
//!
//! Provides a deterministic, engine-in-a-box environment for exercising
//! flows without any driver infrastructure, plus a scripted flow logic
//! that turns a list of closures into successive resumptions.
//!
//! # Example
//!
//! ```
//! use braid_core::bid::{ask_for, request};
//! use braid_core::testing::{place, EngineHarness, ScriptedFlow};
//! use serde_json::json;
//!
//! let mut harness = EngineHarness::start(|| {
//!     ScriptedFlow::new()
//!         .step(|_cx, _input| place(vec![request("greeting", json!("hi"))]))
//!         .step(|_cx, _input| place(vec![ask_for("reply")]))
//!         .into_logic()
//! });
//!
//! assert_eq!(harness.value("greeting"), Some(json!("hi")));
//! assert!(harness.dispatch("reply", json!("hello")).is_processed());
//! ```

use crate::config::EngineConfig;
use crate::engine::{DispatchOutcome, Engine};
use crate::flow::{FlowContext, FlowFault, FlowInput, FlowLogic, FlowStep};
use crate::reaction::{FlowReaction, LoggedAction, ReactionKind};
use braid_types::{ActionId, EventId};
use serde_json::Value;
use std::collections::VecDeque;

/// Convenience: suspend on these bids.
#[allow(clippy::unnecessary_wraps)]
pub fn place(bids: Vec<crate::bid::Bid>) -> Result<FlowStep, FlowFault> {
    Ok(FlowStep::Bids(bids))
}

/// Convenience: place no bids and park.
#[allow(clippy::unnecessary_wraps)]
pub fn park() -> Result<FlowStep, FlowFault> {
    Ok(FlowStep::Park)
}

/// Convenience: finish the flow.
#[allow(clippy::unnecessary_wraps)]
pub fn done() -> Result<FlowStep, FlowFault> {
    Ok(FlowStep::Done)
}

type ScriptStep =
    Box<dyn FnOnce(&mut FlowContext<'_>, FlowInput) -> Result<FlowStep, FlowFault> + Send>;

/// Flow logic built from a list of closures, one per resumption.
///
/// The first closure receives `Started`, each following one the input
/// of the next resumption. A flow resumed past its last closure
/// finishes with [`FlowStep::Done`].
#[derive(Default)]
pub struct ScriptedFlow {
    steps: VecDeque<ScriptStep>,
}

impl ScriptedFlow {
    /// Creates an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: VecDeque::new(),
        }
    }

    /// Appends one resumption handler.
    #[must_use]
    pub fn step<F>(mut self, step: F) -> Self
    where
        F: FnOnce(&mut FlowContext<'_>, FlowInput) -> Result<FlowStep, FlowFault>
            + Send
            + 'static,
    {
        self.steps.push_back(Box::new(step));
        self
    }

    /// Boxes the script as flow logic, ready for a factory.
    #[must_use]
    pub fn into_logic(self) -> Box<dyn FlowLogic> {
        Box::new(self)
    }
}

impl FlowLogic for ScriptedFlow {
    fn step(&mut self, cx: &mut FlowContext<'_>, input: FlowInput) -> Result<FlowStep, FlowFault> {
        match self.steps.pop_front() {
            Some(step) => step(cx, input),
            None => Ok(FlowStep::Done),
        }
    }
}

/// Test harness wrapping an engine with convenience accessors.
///
/// The harness starts the root flow immediately and exposes dispatch,
/// settlement and log helpers that take plain strings and values, so
/// tests stay close to the scenario they describe.
pub struct EngineHarness {
    engine: Engine,
}

impl EngineHarness {
    /// Starts a harness around a root flow factory.
    pub fn start<F>(factory: F) -> Self
    where
        F: Fn() -> Box<dyn FlowLogic> + Send + Sync + 'static,
    {
        Self::with_config(EngineConfig::named("test"), factory)
    }

    /// Starts a harness with a custom engine configuration.
    pub fn with_config<F>(config: EngineConfig, factory: F) -> Self
    where
        F: Fn() -> Box<dyn FlowLogic> + Send + Sync + 'static,
    {
        let mut engine = Engine::new(config);
        engine.start("root", factory).expect("fresh engine");
        Self { engine }
    }

    /// Returns the engine under test.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Returns the engine under test, mutably.
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Dispatches an external value.
    pub fn dispatch(&mut self, event: &str, payload: Value) -> DispatchOutcome {
        self.engine.dispatch(event, payload)
    }

    /// Resolves a pending async request.
    pub fn resolve(&mut self, event: &str, request_action: ActionId, payload: Value) -> DispatchOutcome {
        self.engine
            .resolve_pending_request(event, request_action, payload)
    }

    /// Rejects a pending async request.
    pub fn reject(&mut self, event: &str, request_action: ActionId, error: Value) -> DispatchOutcome {
        self.engine
            .reject_pending_request(event, request_action, error)
    }

    /// Returns an event's committed value, cloned.
    #[must_use]
    pub fn value(&self, event: &str) -> Option<Value> {
        self.engine.event_value(&EventId::new(event)).cloned()
    }

    /// Returns the correlation id of the event's pending request.
    #[must_use]
    pub fn pending_request_action(&self, event: &str) -> Option<ActionId> {
        self.engine
            .ordered_requests_and_current_bids()
            .for_event(&EventId::new(event))
            .and_then(|c| c.pending_request.as_ref())
            .and_then(|p| p.request_action)
    }

    /// Takes every logged step since the last read.
    #[must_use]
    pub fn take_steps(&mut self) -> Vec<LoggedAction> {
        self.engine.take_log()
    }

    /// Takes every reaction since the last read, flattened across steps.
    #[must_use]
    pub fn take_reactions(&mut self) -> Vec<FlowReaction> {
        self.engine
            .take_log()
            .into_iter()
            .flat_map(|step| step.reactions)
            .collect()
    }

    /// Returns `true` if any reaction since the last read matches.
    pub fn saw_reaction(&mut self, predicate: impl Fn(&FlowReaction) -> bool) -> bool {
        self.take_reactions().iter().any(predicate)
    }
}

/// Returns `true` if the reactions contain the kind, checked by the
/// predicate.
pub fn contains_kind(reactions: &[FlowReaction], predicate: impl Fn(&ReactionKind) -> bool) -> bool {
    reactions.iter().any(|r| predicate(&r.kind))
}
