//! The engine: run loop, public surface, and scheduling state.
//!
//! `Engine::run` loops: aggregate bids, select the next action, apply it
//! through the reaction dispatcher (which resumes flows, which may place
//! new bids), re-aggregate, repeat; it stops when no source yields an
//! action. Exactly one action is processed per iteration and the
//! aggregation is rebuilt between actions, so every step sees fully
//! up-to-date state.
//!
//! # Run Loop
//!
//! ```text
//! loop {
//!     aggregate bids over the flow tree
//!     pick ONE action:
//!       1. queued external dispatch / async settlement
//!       2. replay override
//!       3. first valid ordered request bid
//!     none found ──► return
//!     apply action ──► resume affected flows ──► loop
//! }
//! ```
//!
//! The engine is single-threaded and non-reentrant: calling `run` while
//! a run is in progress is a programmer error and panics.

use crate::action::Action;
use crate::bid::{Bid, PendingWork, PlacedBid};
use crate::config::EngineConfig;
use crate::engine::aggregator::{aggregate, OrderedRequestsAndCurrentBids};
use crate::engine::selector::{admit_external, select_request, ExternalInput};
use crate::engine::EngineError;
use crate::event::{Event, EventRegistry};
use crate::flow::{Flow, FlowArena, FlowLogic};
use crate::invalid::{explain_request_bid, InvalidBidReason};
use crate::reaction::{EngineLog, LoggedAction, ReactionKind};
use crate::replay::{ReplayReport, ReplaySession};
use braid_types::{ActionId, EngineId, EventId, FlowPath};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of handing an external input to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum DispatchOutcome {
    /// The input was valid and processed as this action.
    #[serde(rename_all = "camelCase")]
    Processed {
        /// The processed action's id.
        action: ActionId,
    },
    /// The input did not match any currently valid bid and was dropped.
    #[serde(rename_all = "camelCase")]
    Invalid {
        /// Why the input was dropped.
        reason: InvalidBidReason,
    },
}

impl DispatchOutcome {
    /// Returns `true` if the input was processed.
    #[must_use]
    pub fn is_processed(&self) -> bool {
        matches!(self, Self::Processed { .. })
    }
}

/// An async request payload handed out for external execution.
///
/// The engine never polls futures; a driver takes these items, runs
/// them, and delivers each settlement back through
/// [`Engine::resolve_pending_request`] / [`Engine::reject_pending_request`]
/// tagged with `request_action`.
pub struct PendingWorkItem {
    /// The requested event.
    pub event: EventId,
    /// The flow owning the pending request.
    pub flow: FlowPath,
    /// Correlation id for the settlement.
    pub request_action: ActionId,
    /// The work to drive.
    pub work: PendingWork,
}

impl std::fmt::Debug for PendingWorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingWorkItem")
            .field("event", &self.event)
            .field("flow", &self.flow)
            .field("request_action", &self.request_action)
            .finish()
    }
}

/// A deterministic behavioral-programming scheduler.
///
/// One engine owns one flow tree and one event registry. See the crate
/// docs for the coordination model.
pub struct Engine {
    id: EngineId,
    pub(crate) config: EngineConfig,
    pub(crate) events: EventRegistry,
    pub(crate) arena: FlowArena,
    pub(crate) root: Option<FlowPath>,
    pub(crate) current: OrderedRequestsAndCurrentBids,
    pub(crate) next_action: ActionId,
    pub(crate) last_processed: Option<ActionId>,
    running: bool,
    external: VecDeque<ExternalInput>,
    pub(crate) pending_work: Vec<PendingWorkItem>,
    pub(crate) replay: Option<ReplaySession>,
    pub(crate) log: EngineLog,
}

impl Engine {
    /// Creates an engine with the given configuration. No flows run
    /// until [`start`](Self::start).
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let id = EngineId::new();
        Self {
            id,
            log: EngineLog::with_capacity(config.log_capacity),
            config,
            events: EventRegistry::new(id),
            arena: FlowArena::new(),
            root: None,
            current: OrderedRequestsAndCurrentBids::default(),
            next_action: ActionId::FIRST,
            last_processed: None,
            running: false,
            external: VecDeque::new(),
            pending_work: Vec::new(),
            replay: None,
        }
    }

    /// Returns this engine's instance id.
    #[must_use]
    pub fn id(&self) -> EngineId {
        self.id
    }

    /// Returns this engine's configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns `true` while a run pass is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Starts the root flow and runs until no action can be selected.
    ///
    /// # Errors
    ///
    /// [`EngineError::AlreadyStarted`] if a root flow exists.
    pub fn start<F>(&mut self, root_id: impl Into<String>, factory: F) -> Result<(), EngineError>
    where
        F: Fn() -> Box<dyn FlowLogic> + Send + Sync + 'static,
    {
        if self.root.is_some() {
            return Err(EngineError::AlreadyStarted);
        }
        let path = FlowPath::root(root_id);
        info!(engine = %self.config.name, root = %path, "engine started");
        self.root = Some(path.clone());
        self.arena
            .insert(Flow::new(path.clone(), Arc::new(factory), Value::Null));
        self.log.react(path.clone(), ReactionKind::FlowEnabled);
        self.step_flow(&path, super::dispatcher::Resume::Started, None, None);
        self.run();
        Ok(())
    }

    /// Attaches a replay session. Must be called before [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// [`EngineError::ReplayAlreadyAttached`] if a session is attached,
    /// [`EngineError::AlreadyStarted`] if the tree already runs live.
    pub fn set_replay(&mut self, session: ReplaySession) -> Result<(), EngineError> {
        if self.replay.is_some() {
            return Err(EngineError::ReplayAlreadyAttached);
        }
        if self.root.is_some() {
            return Err(EngineError::AlreadyStarted);
        }
        self.replay = Some(session);
        Ok(())
    }

    /// Detaches the replay session and reports every divergence.
    pub fn finish_replay(&mut self) -> Option<ReplayReport> {
        self.replay.take().map(ReplaySession::finish)
    }

    /// Processes actions until no source yields one.
    ///
    /// # Panics
    ///
    /// Panics when called reentrantly: a nested run pass would break the
    /// one-action-at-a-time ordering guarantee.
    pub fn run(&mut self) {
        assert!(
            !self.running,
            "Engine::run called reentrantly; the engine processes one action at a time"
        );
        self.running = true;
        loop {
            self.current = aggregate(&self.arena, self.root.as_ref(), &mut self.events);

            // Source 1: external dispatches and async settlements.
            if let Some(input) = self.external.pop_front() {
                let id = self.next_action;
                match admit_external(input, &self.current, &self.events, id) {
                    Ok(action) => {
                        self.next_action = id.next();
                        self.apply_action(action, None);
                    }
                    Err(reason) => {
                        debug!(engine = %self.config.name, %reason, "external input dropped");
                    }
                }
                continue;
            }

            // Source 2: replay override.
            if self.replay.as_ref().is_some_and(|r| !r.is_exhausted()) {
                self.replay_step();
                continue;
            }

            // Source 3: first valid ordered request bid.
            if let Some((action, work)) = select_request(&self.current, &self.events, self.next_action)
            {
                self.next_action = self.next_action.next();
                self.apply_action(action, work);
                continue;
            }

            break;
        }
        self.running = false;
    }

    /// Dispatches an external value for an event.
    ///
    /// The value is validated against the current bids; it needs a live
    /// askFor bid whose guard and the event's validate bids accept it.
    /// Invalid dispatches are reported, never thrown.
    pub fn dispatch(&mut self, event: impl Into<EventId>, payload: impl Into<Value>) -> DispatchOutcome {
        self.submit(ExternalInput::Dispatch {
            event: event.into(),
            payload: payload.into(),
        })
    }

    /// Delivers the successful settlement of an in-flight async request.
    ///
    /// A stale settlement (the pending request was cancelled or replaced)
    /// is ignored. An invalid payload is converted into a reject so the
    /// owning flow's catch path runs; that still reports as processed.
    pub fn resolve_pending_request(
        &mut self,
        event: impl Into<EventId>,
        request_action: ActionId,
        payload: impl Into<Value>,
    ) -> DispatchOutcome {
        self.submit(ExternalInput::Resolve {
            event: event.into(),
            request_action,
            payload: payload.into(),
        })
    }

    /// Delivers the rejection of an in-flight async request.
    pub fn reject_pending_request(
        &mut self,
        event: impl Into<EventId>,
        request_action: ActionId,
        error: impl Into<Value>,
    ) -> DispatchOutcome {
        self.submit(ExternalInput::Reject {
            event: event.into(),
            request_action,
            error: error.into(),
        })
    }

    fn submit(&mut self, input: ExternalInput) -> DispatchOutcome {
        let id = self.next_action;
        if let Err(reason) = admit_external(input.clone(), &self.current, &self.events, id) {
            debug!(engine = %self.config.name, %reason, "input rejected");
            return DispatchOutcome::Invalid { reason };
        }
        self.external.push_back(input);
        self.run();
        DispatchOutcome::Processed { action: id }
    }

    /// Explains why a request bid for this event is not currently
    /// selectable, or `None` if it is.
    #[must_use]
    pub fn explain_request_bid(&self, bid: &Bid) -> Option<InvalidBidReason> {
        let placed = self
            .current
            .ordered_requests
            .iter()
            .find(|p| p.event() == &bid.event);
        match placed {
            None => Some(InvalidBidReason::NoMatchingBid {
                event: bid.event.clone(),
            }),
            Some(placed) => {
                let current = self.current.for_event(placed.event())?;
                explain_request_bid(placed, current)
            }
        }
    }

    /// The aggregation snapshot from the last completed cycle.
    #[must_use]
    pub fn ordered_requests_and_current_bids(&self) -> &OrderedRequestsAndCurrentBids {
        &self.current
    }

    /// Every placed askFor bid, highest priority first.
    #[must_use]
    pub fn ask_for_bids(&self) -> &[PlacedBid] {
        &self.current.ordered_ask_for
    }

    /// Every registered pending async request.
    #[must_use]
    pub fn pending_requests(&self) -> Vec<&PlacedBid> {
        self.current
            .current
            .values()
            .filter_map(|c| c.pending_request.as_ref())
            .collect()
    }

    /// Request bids that nothing currently disqualifies (before payload
    /// evaluation).
    #[must_use]
    pub fn open_requests(&self) -> Vec<&PlacedBid> {
        self.current
            .ordered_requests
            .iter()
            .filter(|placed| {
                self.current
                    .for_event(placed.event())
                    .is_some_and(|c| explain_request_bid(placed, c).is_none())
            })
            .collect()
    }

    /// The id of the most recently processed action.
    #[must_use]
    pub fn current_action_id(&self) -> Option<ActionId> {
        self.last_processed
    }

    /// An event's current value, if committed.
    #[must_use]
    pub fn event_value(&self, event: &EventId) -> Option<&Value> {
        self.events.value(event)
    }

    /// An event's registry entry, if connected.
    #[must_use]
    pub fn event(&self, event: &EventId) -> Option<&Event> {
        self.events.get(event)
    }

    /// Takes every logged scheduling step, clearing the log.
    #[must_use]
    pub fn take_log(&mut self) -> Vec<LoggedAction> {
        self.log.take()
    }

    /// Takes the async payloads registered since the last call, for a
    /// driver to execute.
    #[must_use]
    pub fn take_pending_work(&mut self) -> Vec<PendingWorkItem> {
        std::mem::take(&mut self.pending_work)
    }

    /// Feeds one recorded action through selection.
    fn replay_step(&mut self) {
        let Some(recorded) = self.replay.as_mut().and_then(ReplaySession::next_recorded) else {
            return;
        };
        let id = self.next_action;
        let outcome: Result<(Action, Option<PendingWork>), String> = match &recorded {
            Action::Requested {
                event,
                flow,
                payload,
                ..
            } => match self.find_placed_request(event, flow) {
                Some(placed) => Ok((
                    Action::Requested {
                        id,
                        event: event.clone(),
                        flow: placed.flow.clone(),
                        bid: placed.id,
                        payload: payload.clone(),
                    },
                    None,
                )),
                None => Err(format!("no request bid for {event} from {flow}")),
            },
            Action::RequestedAsync { event, flow, .. } => {
                match self.find_placed_request(event, flow) {
                    // A mocked async request never settles; the recording
                    // delivers its settlement as a later action.
                    Some(placed) => Ok((
                        Action::RequestedAsync {
                            id,
                            event: event.clone(),
                            flow: placed.flow.clone(),
                            bid: placed.id,
                        },
                        Some(PendingWork::detached()),
                    )),
                    None => Err(format!("no request bid for {event} from {flow}")),
                }
            }
            Action::External { event, payload, .. } => admit_external(
                ExternalInput::Dispatch {
                    event: event.clone(),
                    payload: payload.clone(),
                },
                &self.current,
                &self.events,
                id,
            )
            .map(|a| (a, None))
            .map_err(|reason| reason.to_string()),
            Action::ResolvePendingRequest { event, payload, .. } => self
                .live_request_action(event)
                .ok_or_else(|| format!("no pending request for {event}"))
                .and_then(|request_action| {
                    admit_external(
                        ExternalInput::Resolve {
                            event: event.clone(),
                            request_action,
                            payload: payload.clone(),
                        },
                        &self.current,
                        &self.events,
                        id,
                    )
                    .map(|a| (a, None))
                    .map_err(|reason| reason.to_string())
                }),
            Action::RejectPendingRequest { event, error, .. } => self
                .live_request_action(event)
                .ok_or_else(|| format!("no pending request for {event}"))
                .and_then(|request_action| {
                    admit_external(
                        ExternalInput::Reject {
                            event: event.clone(),
                            request_action,
                            error: error.clone(),
                        },
                        &self.current,
                        &self.events,
                        id,
                    )
                    .map(|a| (a, None))
                    .map_err(|reason| reason.to_string())
                }),
        };
        match outcome {
            Ok((action, work)) => {
                self.next_action = id.next();
                self.apply_action(action, work);
            }
            Err(message) => {
                if let Some(replay) = self.replay.as_mut() {
                    replay.report_unmatched(&recorded, message);
                }
            }
        }
    }

    fn find_placed_request(&self, event: &EventId, flow: &FlowPath) -> Option<&PlacedBid> {
        self.current
            .ordered_requests
            .iter()
            .find(|p| p.event() == event && &p.flow == flow)
    }

    fn live_request_action(&self, event: &EventId) -> Option<ActionId> {
        self.current
            .for_event(event)
            .and_then(|c| c.pending_request.as_ref())
            .and_then(|p| p.request_action)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("root", &self.root)
            .field("next_action", &self.next_action)
            .field("running", &self.running)
            .finish()
    }
}
