//! Flow reactions and the engine log.
//!
//! Every processed action produces an ordered list of flow reactions:
//! which flows were enabled, progressed, ended, restarted, and what
//! happened to pending requests and extends. The log exposes one
//! scheduling step at a time and is cleared on read; it is the sole
//! observability and replay contract the engine offers to external
//! tooling.
//!
//! The retained buffer is rolling: when full, the oldest step is evicted
//! on append.

use crate::action::Action;
use braid_types::{BidId, EventId, FlowPath};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Why a flow was restarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RestartReason {
    /// The value of an active given event changed to an invalid one.
    GivenValueChanged,
    /// The flow's logic faulted after having progressed at least once.
    FlowFault,
    /// The flow was re-created with a different constructor signature.
    SignatureChanged,
    /// The flow requested its own restart.
    Requested,
}

/// What happened to one flow while processing an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ReactionKind {
    /// The flow was created or re-enabled.
    FlowEnabled,
    /// The flow's logic progressed on one of its placed bids.
    #[serde(rename_all = "camelCase")]
    ProgressedOnBid {
        /// The event that matched.
        event: EventId,
        /// The matched bid.
        bid: BidId,
    },
    /// The flow ended and is now inert.
    FlowEnded,
    /// The flow was fully restarted.
    #[serde(rename_all = "camelCase")]
    FlowRestarted {
        /// Why the restart happened.
        reason: RestartReason,
    },
    /// An async request was registered as pending.
    #[serde(rename_all = "camelCase")]
    PendingRequestAdded {
        /// The pending event.
        event: EventId,
    },
    /// A pending request was cancelled; its eventual settlement will be
    /// ignored.
    #[serde(rename_all = "camelCase")]
    PendingRequestCancelled {
        /// The no-longer-pending event.
        event: EventId,
    },
    /// A pending request settled.
    #[serde(rename_all = "camelCase")]
    PendingRequestResolved {
        /// The settled event.
        event: EventId,
    },
    /// An extend bid intercepted the event's resolution.
    #[serde(rename_all = "camelCase")]
    PendingExtendAdded {
        /// The intercepted event.
        event: EventId,
    },
    /// A pending extend was aborted; the intercepted action propagates.
    #[serde(rename_all = "camelCase")]
    PendingExtendAborted {
        /// The released event.
        event: EventId,
    },
    /// A pending extend was resolved with a final value.
    #[serde(rename_all = "camelCase")]
    PendingExtendResolved {
        /// The released event.
        event: EventId,
    },
    /// A given bid activated on a valid value.
    #[serde(rename_all = "camelCase")]
    ActiveGivenAdded {
        /// The guarded event.
        event: EventId,
    },
}

/// One flow reaction: which flow, and what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowReaction {
    /// The affected flow.
    pub flow: FlowPath,
    /// What happened.
    pub kind: ReactionKind,
}

/// One fully processed scheduling step: the action plus its ordered
/// reactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedAction {
    /// When the step was processed.
    pub timestamp: DateTime<Utc>,
    /// The processed action.
    pub action: Action,
    /// Flow reactions in dispatch order.
    pub reactions: Vec<FlowReaction>,
}

impl LoggedAction {
    /// Compares the replay-relevant content, ignoring the timestamp.
    #[must_use]
    pub fn same_step(&self, other: &LoggedAction) -> bool {
        self.action == other.action && self.reactions == other.reactions
    }
}

/// Default maximum retained steps.
const DEFAULT_MAX_STEPS: usize = 1000;

/// Rolling buffer of processed steps, cleared on read.
#[derive(Debug)]
pub struct EngineLog {
    steps: VecDeque<LoggedAction>,
    max_steps: usize,
    current: Option<LoggedAction>,
}

impl EngineLog {
    /// Creates a log with the default capacity (1000 steps).
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_STEPS)
    }

    /// Creates a log retaining at most `max_steps` steps.
    ///
    /// A capacity of 0 is treated as 1.
    #[must_use]
    pub fn with_capacity(max_steps: usize) -> Self {
        let max_steps = max_steps.max(1);
        Self {
            steps: VecDeque::with_capacity(max_steps),
            max_steps,
            current: None,
        }
    }

    /// Opens a step for the action about to be processed.
    pub(crate) fn begin(&mut self, action: Action) {
        debug_assert!(self.current.is_none(), "previous step was not finished");
        self.current = Some(LoggedAction {
            timestamp: Utc::now(),
            action,
            reactions: Vec::new(),
        });
    }

    /// Records a reaction inside the open step.
    pub(crate) fn react(&mut self, flow: FlowPath, kind: ReactionKind) {
        if let Some(step) = self.current.as_mut() {
            step.reactions.push(FlowReaction { flow, kind });
        }
    }

    /// Closes the open step, evicting the oldest retained step if at
    /// capacity. Returns a clone of the finished step.
    pub(crate) fn finish(&mut self) -> Option<LoggedAction> {
        let step = self.current.take()?;
        if self.steps.len() >= self.max_steps {
            self.steps.pop_front();
        }
        self.steps.push_back(step.clone());
        Some(step)
    }

    /// Takes every retained step, clearing the buffer. This is the
    /// one-step-at-a-time replay contract: what external tooling reads
    /// it owns.
    #[must_use]
    pub fn take(&mut self) -> Vec<LoggedAction> {
        self.steps.drain(..).collect()
    }

    /// Returns the number of retained steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if no steps are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Default for EngineLog {
    fn default() -> Self {
        Self::new()
    }
}
