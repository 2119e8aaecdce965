//! The context handed to flow logic during a step.
//!
//! Flow logic never touches the engine directly. Structural operations
//! (spawning children, ending itself, settling extends) are buffered as
//! commands on the context and applied by the engine after the step
//! returns. This keeps the flow tree single-owner while user code runs,
//! and makes the application order deterministic: commands apply in the
//! order they were issued.

use crate::event::EventRegistry;
use crate::flow::{ExtendedValue, FlowFactory, FlowLogic, PendingExtend};
use braid_types::{EventId, FlowPath};
use serde_json::Value;
use std::collections::BTreeMap;

/// Callback guaranteed to run when the current bid-placement epoch ends
/// (next progress, restart, or end of the flow).
pub type CleanupFn = Box<dyn FnOnce() + Send>;

/// A structural operation issued by flow logic, applied after the step.
pub(crate) enum FlowCommand {
    /// Get-or-create a named child flow.
    Child {
        id: String,
        signature: Value,
        factory: FlowFactory,
    },
    /// End a named child (and its subtree).
    EndChild { id: String },
    /// Disable a named child: exclude its bids, keep its state.
    DisableChild { id: String },
    /// End this flow after the step completes.
    EndSelf { keep_extends: bool },
    /// Fully restart this flow after the step completes.
    RestartSelf,
    /// Register an epoch cleanup callback.
    Cleanup(CleanupFn),
    /// Resolve a pending extend this flow owns with a final value.
    ResolveExtend { event: EventId, value: Value },
    /// Abort a pending extend this flow owns; the intercepted action
    /// propagates with its original payload.
    AbortExtend { event: EventId },
}

impl std::fmt::Debug for FlowCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Child { id, .. } => f.debug_struct("Child").field("id", id).finish(),
            Self::EndChild { id } => f.debug_struct("EndChild").field("id", id).finish(),
            Self::DisableChild { id } => f.debug_struct("DisableChild").field("id", id).finish(),
            Self::EndSelf { keep_extends } => f
                .debug_struct("EndSelf")
                .field("keep_extends", keep_extends)
                .finish(),
            Self::RestartSelf => f.write_str("RestartSelf"),
            Self::Cleanup(_) => f.write_str("Cleanup(..)"),
            Self::ResolveExtend { event, .. } => {
                f.debug_struct("ResolveExtend").field("event", event).finish()
            }
            Self::AbortExtend { event } => {
                f.debug_struct("AbortExtend").field("event", event).finish()
            }
        }
    }
}

/// Read access plus buffered structural operations for one step.
pub struct FlowContext<'a> {
    path: &'a FlowPath,
    events: &'a EventRegistry,
    pending_extends: &'a BTreeMap<EventId, PendingExtend>,
    commands: Vec<FlowCommand>,
}

impl<'a> FlowContext<'a> {
    pub(crate) fn new(
        path: &'a FlowPath,
        events: &'a EventRegistry,
        pending_extends: &'a BTreeMap<EventId, PendingExtend>,
    ) -> Self {
        Self {
            path,
            events,
            pending_extends,
            commands: Vec::new(),
        }
    }

    pub(crate) fn into_commands(self) -> Vec<FlowCommand> {
        self.commands
    }

    /// Returns this flow's path.
    #[must_use]
    pub fn path(&self) -> &FlowPath {
        self.path
    }

    /// Returns an event's current value, if committed.
    #[must_use]
    pub fn event_value(&self, event: &EventId) -> Option<&Value> {
        self.events.value(event)
    }

    /// Returns the intercepted value of a pending extend this flow owns.
    ///
    /// `None` while the intercepted payload is still an unsettled async
    /// operation, or when no extend is pending for the event.
    #[must_use]
    pub fn extended_value(&self, event: &EventId) -> Option<&Value> {
        match self.pending_extends.get(event).map(|pe| &pe.value) {
            Some(ExtendedValue::Resolved(value)) => Some(value),
            _ => None,
        }
    }

    /// Get-or-create a named child flow.
    ///
    /// Creation runs the child's logic from its start. An existing
    /// disabled child is re-enabled and resumes exactly where it left
    /// off. An ended child is inert; the call has no effect on it.
    pub fn flow<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn FlowLogic> + Send + Sync + 'static,
    {
        self.flow_keyed(id, Value::Null, factory);
    }

    /// Like [`flow`](Self::flow), with a constructor signature. A child
    /// re-created with a different signature is fully restarted with the
    /// new factory.
    pub fn flow_keyed<F>(&mut self, id: impl Into<String>, signature: Value, factory: F)
    where
        F: Fn() -> Box<dyn FlowLogic> + Send + Sync + 'static,
    {
        self.commands.push(FlowCommand::Child {
            id: id.into(),
            signature,
            factory: std::sync::Arc::new(factory),
        });
    }

    /// Ends a named child and its subtree.
    pub fn end_child(&mut self, id: impl Into<String>) {
        self.commands.push(FlowCommand::EndChild { id: id.into() });
    }

    /// Disables a named child: its bids leave aggregation and its
    /// pending requests are cancelled, but its logic state and pending
    /// extends survive for a later re-enable.
    pub fn disable_child(&mut self, id: impl Into<String>) {
        self.commands.push(FlowCommand::DisableChild { id: id.into() });
    }

    /// Ends this flow after the current step, cancelling its pending
    /// extends (intercepted actions propagate with their held values).
    pub fn end(&mut self) {
        self.commands.push(FlowCommand::EndSelf {
            keep_extends: false,
        });
    }

    /// Ends this flow after the current step, preserving its pending
    /// extends: the intercepted events stay pending.
    pub fn end_keeping_extends(&mut self) {
        self.commands.push(FlowCommand::EndSelf { keep_extends: true });
    }

    /// Fully restarts this flow after the current step.
    pub fn restart(&mut self) {
        self.commands.push(FlowCommand::RestartSelf);
    }

    /// Registers a callback that runs when the current bid-placement
    /// epoch ends: on the flow's next progress, restart, or end.
    pub fn cleanup(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.commands.push(FlowCommand::Cleanup(Box::new(callback)));
    }

    /// Resolves a pending extend this flow owns. The final value commits
    /// to the event and the intercepted bid's owner is resumed as if the
    /// original action had carried it.
    pub fn resolve_extend(&mut self, event: impl Into<EventId>, value: impl Into<Value>) {
        self.commands.push(FlowCommand::ResolveExtend {
            event: event.into(),
            value: value.into(),
        });
    }

    /// Aborts a pending extend this flow owns. The intercepted action
    /// propagates with its original payload.
    pub fn abort_extend(&mut self, event: impl Into<EventId>) {
        self.commands.push(FlowCommand::AbortExtend {
            event: event.into(),
        });
    }
}
