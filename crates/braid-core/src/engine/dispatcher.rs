//! Reaction dispatch: applying a selected action to the flow tree.
//!
//! Given a selected and validated action, the dispatcher applies a fixed
//! sequence:
//!
//! 1. abort a stale pending extend left by a previous action,
//! 2. let a placed extend bid intercept the resolution (the event
//!    becomes pending and the original bid owner is NOT resumed),
//! 3. otherwise commit the value and resume, in bid-priority order, the
//!    placing flow, then every waitFor/askFor/given holder whose guard
//!    accepts the value,
//! 4. restart any flow whose active given the new value invalidates.
//!
//! A flow is resumed at most once per action id, even when it holds two
//! matching bids for the same event.

use crate::action::Action;
use crate::bid::{BidKind, PendingWork, PlacedBid};
use crate::engine::engine::{Engine, PendingWorkItem};
use crate::flow::{
    ActiveGiven, ExtendedValue, Flow, FlowCommand, FlowContext, FlowFactory, FlowInput, FlowStep,
    PendingExtend,
};
use crate::reaction::{ReactionKind, RestartReason};
use braid_types::{ActionId, BidId, EventId, FlowPath};
use serde_json::Value;
use tracing::{debug, warn};

/// What a flow is resumed with; the dispatcher fills in the remaining
/// bids at resume time.
#[derive(Debug, Clone)]
pub(crate) enum Resume {
    Started,
    Advanced { event: EventId, payload: Value },
    Rejected { event: EventId, error: Value },
}

impl Engine {
    /// Applies one selected, validated action.
    pub(crate) fn apply_action(&mut self, action: Action, mut work: Option<PendingWork>) {
        debug!(
            engine = %self.config.name,
            id = %action.id(),
            kind = action.type_name(),
            event = %action.event(),
            "processing action"
        );
        self.log.begin(action.clone());
        let action_id = action.id();
        let event = action.event().clone();

        // 1. A pending extend from a previous action is stale unless this
        // action settles the async request it intercepted.
        if let Some((owner, created_by)) = self.find_pending_extend(&event) {
            let is_settlement = matches!(
                &action,
                Action::ResolvePendingRequest { request_action, .. }
                | Action::RejectPendingRequest { request_action, .. }
                    if *request_action == created_by
            );
            if !is_settlement && created_by != action_id {
                if let Some(flow) = self.arena.get_mut(&owner) {
                    flow.pending_extends.remove(&event);
                }
                self.log.react(
                    owner,
                    ReactionKind::PendingExtendAborted {
                        event: event.clone(),
                    },
                );
            }
        }

        match action {
            Action::RequestedAsync {
                id, event, flow, bid,
            } => {
                if let Some(f) = self.arena.get_mut(&flow) {
                    if let Some(placed) = f.placed.iter_mut().find(|p| p.id == bid) {
                        placed.request_action = Some(id);
                        let snapshot = placed.clone();
                        f.pending_requests.insert(event.clone(), snapshot);
                    }
                }
                self.log.react(
                    flow.clone(),
                    ReactionKind::PendingRequestAdded {
                        event: event.clone(),
                    },
                );
                // Detached work (replay mocks) never settles; there is
                // nothing for a driver to execute.
                if let Some(work) = work.take() {
                    if !work.is_detached() {
                        self.pending_work.push(PendingWorkItem {
                            event: event.clone(),
                            flow: flow.clone(),
                            request_action: id,
                            work,
                        });
                    }
                }
                // An unguarded extend intercepts the in-flight request.
                // The extender stays suspended until the payload settles;
                // a guarded extend gets its chance at settlement time.
                let interceptor = self
                    .current
                    .for_event(&event)
                    .and_then(|c| c.extend.iter().find(|e| e.bid.guard.is_none()).cloned());
                if let Some(ext) = interceptor {
                    let intercepted = self.primary_placed(&event, &flow, bid);
                    let pending = PendingExtend {
                        event: event.clone(),
                        extending_flow: ext.flow.clone(),
                        extend_bid: ext.clone(),
                        value: ExtendedValue::Pending,
                        intercepted: intercepted.into_iter().collect(),
                        created_by: id,
                    };
                    if let Some(xf) = self.arena.get_mut(&ext.flow) {
                        xf.pending_extends.insert(event.clone(), pending);
                    }
                    self.log.react(
                        ext.flow,
                        ReactionKind::PendingExtendAdded { event },
                    );
                }
            }

            Action::ResolvePendingRequest {
                id,
                event,
                flow,
                bid,
                request_action,
                payload,
            } => {
                let primary = self.primary_placed(&event, &flow, bid);
                if let Some(f) = self.arena.get_mut(&flow) {
                    f.pending_requests.remove(&event);
                }
                self.drop_pending_work(request_action);
                self.log.react(
                    flow.clone(),
                    ReactionKind::PendingRequestResolved {
                        event: event.clone(),
                    },
                );

                // An extend that intercepted the in-flight request now
                // receives the settled value; the requester stays put.
                if let Some((owner, created_by)) = self.find_pending_extend(&event) {
                    if created_by == request_action {
                        let extend_bid = self.arena.get_mut(&owner).and_then(|f| {
                            f.pending_extends.get_mut(&event).map(|pe| {
                                pe.value = ExtendedValue::Resolved(payload.clone());
                                pe.extend_bid.id
                            })
                        });
                        if let Some(extend_bid) = extend_bid {
                            self.step_flow(
                                &owner,
                                Resume::Advanced {
                                    event: event.clone(),
                                    payload,
                                },
                                Some((event, extend_bid)),
                                Some(id),
                            );
                        }
                        self.finish_step(action_id);
                        return;
                    }
                }

                if !self.try_extend_interception(&event, &payload, primary.as_ref(), id) {
                    let primaries: Vec<(FlowPath, BidId)> = vec![(flow, bid)];
                    self.commit_and_propagate(&event, payload, &primaries, Some(id));
                }
            }

            Action::RejectPendingRequest {
                id,
                event,
                flow,
                bid,
                request_action,
                error,
            } => {
                // A pending extend tied to this request dies with it.
                if let Some((owner, created_by)) = self.find_pending_extend(&event) {
                    if created_by == request_action {
                        if let Some(f) = self.arena.get_mut(&owner) {
                            f.pending_extends.remove(&event);
                        }
                        self.log.react(
                            owner,
                            ReactionKind::PendingExtendAborted {
                                event: event.clone(),
                            },
                        );
                    }
                }
                if let Some(f) = self.arena.get_mut(&flow) {
                    f.pending_requests.remove(&event);
                }
                self.drop_pending_work(request_action);
                self.log.react(
                    flow.clone(),
                    ReactionKind::PendingRequestCancelled {
                        event: event.clone(),
                    },
                );
                // The rejection surfaces inside the flow's suspension
                // point; an unhandled fault hits the error boundary.
                self.step_flow(
                    &flow,
                    Resume::Rejected {
                        event: event.clone(),
                        error,
                    },
                    Some((event, bid)),
                    Some(id),
                );
            }

            Action::Requested {
                id,
                event,
                flow,
                bid,
                payload,
            }
            | Action::External {
                id,
                event,
                flow,
                bid,
                payload,
            } => {
                let primary = self.primary_placed(&event, &flow, bid);
                if !self.try_extend_interception(&event, &payload, primary.as_ref(), id) {
                    let primaries: Vec<(FlowPath, BidId)> = vec![(flow, bid)];
                    self.commit_and_propagate(&event, payload, &primaries, Some(id));
                }
            }
        }

        self.finish_step(action_id);
    }

    fn finish_step(&mut self, action_id: ActionId) {
        let step = self.log.finish();
        self.last_processed = Some(action_id);
        if let (Some(replay), Some(step)) = (self.replay.as_mut(), step.as_ref()) {
            replay.observe(step);
        }
    }

    /// Checks placed extend bids in priority order; the first whose
    /// guard accepts the payload intercepts: the event becomes pending,
    /// the extending flow is resumed on its extend bid, and the original
    /// bid owner is NOT resumed this step.
    fn try_extend_interception(
        &mut self,
        event: &EventId,
        payload: &Value,
        primary: Option<&PlacedBid>,
        action_id: ActionId,
    ) -> bool {
        let candidates: Vec<PlacedBid> = self
            .current
            .for_event(event)
            .map(|c| c.extend.clone())
            .unwrap_or_default();
        for ext in candidates {
            if !ext.bid.check_guard(payload).is_valid {
                continue;
            }
            let pending = PendingExtend {
                event: event.clone(),
                extending_flow: ext.flow.clone(),
                extend_bid: ext.clone(),
                value: ExtendedValue::Resolved(payload.clone()),
                intercepted: primary.cloned().into_iter().collect(),
                created_by: action_id,
            };
            if let Some(flow) = self.arena.get_mut(&ext.flow) {
                flow.pending_extends.insert(event.clone(), pending);
            } else {
                continue;
            }
            self.log.react(
                ext.flow.clone(),
                ReactionKind::PendingExtendAdded {
                    event: event.clone(),
                },
            );
            self.step_flow(
                &ext.flow,
                Resume::Advanced {
                    event: event.clone(),
                    payload: payload.clone(),
                },
                Some((event.clone(), ext.id)),
                Some(action_id),
            );
            return true;
        }
        false
    }

    /// Commits the value and resumes, in bid-priority order, the placing
    /// flow(s) and every waitFor/askFor/given holder whose guard accepts
    /// it; then restarts flows whose active givens the value invalidates.
    pub(crate) fn commit_and_propagate(
        &mut self,
        event: &EventId,
        payload: Value,
        primaries: &[(FlowPath, BidId)],
        action: Option<ActionId>,
    ) {
        self.events.commit(event, payload.clone());

        for (flow, bid) in primaries {
            self.step_flow(
                flow,
                Resume::Advanced {
                    event: event.clone(),
                    payload: payload.clone(),
                },
                Some((event.clone(), *bid)),
                action,
            );
        }

        let waiters: Vec<PlacedBid> = self
            .current
            .for_event(event)
            .map(|c| {
                c.all
                    .iter()
                    .filter(|p| {
                        matches!(
                            p.bid.kind,
                            BidKind::WaitFor | BidKind::AskFor | BidKind::Given
                        )
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for placed in waiters {
            if !placed.bid.check_guard(&payload).is_valid {
                continue;
            }
            if matches!(placed.bid.kind, BidKind::Given) {
                self.log.react(
                    placed.flow.clone(),
                    ReactionKind::ActiveGivenAdded {
                        event: event.clone(),
                    },
                );
                if let Some(flow) = self.arena.get_mut(&placed.flow) {
                    let already = flow
                        .active_givens
                        .iter()
                        .any(|g| g.event == *event && g.bid == placed.id);
                    if !already {
                        flow.active_givens.push(ActiveGiven {
                            event: event.clone(),
                            bid: placed.id,
                            guard: placed.bid.guard.clone(),
                        });
                    }
                }
            }
            self.step_flow(
                &placed.flow,
                Resume::Advanced {
                    event: event.clone(),
                    payload: payload.clone(),
                },
                Some((event.clone(), placed.id)),
                action,
            );
        }

        // A committed value that an active given rejects restarts the
        // whole given-flow, re-evaluating from its first given bid.
        let to_restart: Vec<FlowPath> = self
            .arena
            .iter()
            .filter(|flow| {
                flow.participates()
                    && flow.active_givens.iter().any(|g| {
                        g.event == *event
                            && !g
                                .guard
                                .as_ref()
                                .map(|guard| guard(&payload).is_valid)
                                .unwrap_or(true)
                    })
            })
            .map(|flow| flow.path.clone())
            .collect();
        for path in to_restart {
            self.restart_flow(&path, RestartReason::GivenValueChanged, action);
        }
    }

    /// Resumes one flow's logic. At most one resume per action id.
    pub(crate) fn step_flow(
        &mut self,
        path: &FlowPath,
        resume: Resume,
        progressed_on: Option<(EventId, BidId)>,
        action: Option<ActionId>,
    ) {
        {
            let Some(flow) = self.arena.get_mut(path) else {
                return;
            };
            if flow.ended || !flow.enabled {
                return;
            }
            if let Some(action) = action {
                if flow.latest_action == Some(action) {
                    return;
                }
                flow.latest_action = Some(action);
            }
            // The previous bid-placement epoch ends here.
            flow.run_cleanups();
        }
        let mut flow = self.arena.take(path).expect("flow checked above");

        let input = match resume {
            Resume::Started => FlowInput::Started,
            Resume::Advanced { event, payload } => {
                let matched = progressed_on.as_ref().map(|(_, bid)| *bid);
                let remaining = flow
                    .placed
                    .iter()
                    .filter(|p| Some(p.id) != matched)
                    .map(|p| p.bid.clone())
                    .collect();
                FlowInput::Advanced {
                    event,
                    payload,
                    remaining,
                }
            }
            Resume::Rejected { event, error } => FlowInput::Rejected { event, error },
        };
        let advanced = matches!(input, FlowInput::Advanced { .. } | FlowInput::Rejected { .. });

        let mut cx = FlowContext::new(&flow.path, &self.events, &flow.pending_extends);
        let outcome = flow.logic.step(&mut cx, input);
        let commands = cx.into_commands();

        match outcome {
            Ok(step) => {
                if advanced {
                    flow.progressed = true;
                }
                if let Some((event, bid)) = progressed_on {
                    self.log
                        .react(path.clone(), ReactionKind::ProgressedOnBid { event, bid });
                }
                match step {
                    FlowStep::Bids(bids) => {
                        let cancelled = flow.place(bids);
                        self.arena.put(flow);
                        self.cancel_pending(path, cancelled);
                        self.apply_commands(path, commands, action);
                    }
                    FlowStep::Park => {
                        let cancelled = flow.place(Vec::new());
                        self.arena.put(flow);
                        self.cancel_pending(path, cancelled);
                        self.apply_commands(path, commands, action);
                    }
                    FlowStep::Done => {
                        self.arena.put(flow);
                        self.apply_commands(path, commands, action);
                        // Natural completion preserves pending extends.
                        self.end_subtree(path, true, action);
                    }
                }
            }
            Err(fault) => {
                let progressed = flow.progressed;
                self.arena.put(flow);
                // Structural commands from a faulted step are discarded.
                drop(commands);
                if progressed {
                    warn!(flow = %path, error = %fault, "flow faulted, restarting");
                    self.restart_flow(path, RestartReason::FlowFault, action);
                } else {
                    warn!(flow = %path, error = %fault, "flow faulted before first progress, ending");
                    self.end_subtree(path, false, action);
                }
            }
        }
    }

    fn cancel_pending(&mut self, path: &FlowPath, cancelled: Vec<PlacedBid>) {
        for placed in cancelled {
            self.log.react(
                path.clone(),
                ReactionKind::PendingRequestCancelled {
                    event: placed.event().clone(),
                },
            );
            if let Some(request_action) = placed.request_action {
                self.drop_pending_work(request_action);
            }
        }
    }

    fn apply_commands(
        &mut self,
        path: &FlowPath,
        commands: Vec<FlowCommand>,
        action: Option<ActionId>,
    ) {
        for command in commands {
            match command {
                FlowCommand::Child {
                    id,
                    signature,
                    factory,
                } => self.enable_child(path, &id, signature, factory, action),
                FlowCommand::EndChild { id } => {
                    self.end_subtree(&path.child(id), false, action);
                }
                FlowCommand::DisableChild { id } => {
                    let child = path.child(id);
                    let cancelled = match self.arena.get_mut(&child) {
                        Some(flow) if flow.participates() => flow.disable(),
                        _ => Vec::new(),
                    };
                    self.cancel_pending(&child, cancelled);
                }
                FlowCommand::EndSelf { keep_extends } => {
                    self.end_subtree(path, keep_extends, action);
                }
                FlowCommand::RestartSelf => {
                    self.restart_flow(path, RestartReason::Requested, action);
                }
                FlowCommand::Cleanup(callback) => match self.arena.get_mut(path) {
                    Some(flow) if !flow.ended => flow.cleanups.push(callback),
                    // The epoch is already over; run it now.
                    _ => callback(),
                },
                FlowCommand::ResolveExtend { event, value } => {
                    self.settle_extend(path, &event, Some(value), action);
                }
                FlowCommand::AbortExtend { event } => {
                    self.settle_extend(path, &event, None, action);
                }
            }
        }
    }

    fn enable_child(
        &mut self,
        parent: &FlowPath,
        id: &str,
        signature: Value,
        factory: FlowFactory,
        action: Option<ActionId>,
    ) {
        let child_path = parent.child(id);
        match self.arena.get_mut(parent) {
            Some(parent_flow) => parent_flow.register_child(id),
            None => return,
        }
        if !self.arena.contains(&child_path) {
            self.arena
                .insert(Flow::new(child_path.clone(), factory, signature));
            self.log
                .react(child_path.clone(), ReactionKind::FlowEnabled);
            self.step_flow(&child_path, Resume::Started, None, action);
            return;
        }
        let needs_restart = {
            let child = self.arena.get_mut(&child_path).expect("checked above");
            if child.ended {
                // Ended flows are inert.
                return;
            }
            if !child.enabled {
                // Re-enabling resumes exactly where the flow left off;
                // its placed bids simply rejoin aggregation.
                child.enabled = true;
                self.log
                    .react(child_path.clone(), ReactionKind::FlowEnabled);
                return;
            }
            if child.signature != signature {
                child.factory = factory;
                child.signature = signature;
                true
            } else {
                false
            }
        };
        if needs_restart {
            self.restart_flow(&child_path, RestartReason::SignatureChanged, action);
        }
    }

    /// Fully restarts a flow: its children are destroyed, pending
    /// requests cancelled, orphaned extends released, and the logic is
    /// re-created from its factory.
    pub(crate) fn restart_flow(
        &mut self,
        path: &FlowPath,
        reason: RestartReason,
        action: Option<ActionId>,
    ) {
        let descendants: Vec<FlowPath> =
            self.arena.subtree(path).into_iter().skip(1).collect();
        for descendant in descendants.iter().rev() {
            self.finish_single(descendant, false, action);
        }
        for descendant in &descendants {
            self.arena.remove(descendant);
        }

        let Some(flow) = self.arena.get_mut(path) else {
            return;
        };
        let (cancelled, orphaned) = flow.reset(false);
        flow.children.clear();
        self.cancel_pending(path, cancelled);
        for extend in orphaned {
            self.release_extend(extend, None, action);
        }
        self.log
            .react(path.clone(), ReactionKind::FlowRestarted { reason });
        self.step_flow(path, Resume::Started, None, action);
    }

    /// Ends a subtree: descendants are destroyed, the named flow is
    /// marked ended and stays in the arena as an inert node.
    pub(crate) fn end_subtree(
        &mut self,
        path: &FlowPath,
        keep_extends: bool,
        action: Option<ActionId>,
    ) {
        let descendants: Vec<FlowPath> =
            self.arena.subtree(path).into_iter().skip(1).collect();
        for descendant in descendants.iter().rev() {
            self.finish_single(descendant, false, action);
        }
        for descendant in &descendants {
            self.arena.remove(descendant);
        }
        self.finish_single(path, keep_extends, action);
    }

    fn finish_single(&mut self, path: &FlowPath, keep_extends: bool, action: Option<ActionId>) {
        let Some(flow) = self.arena.get_mut(path) else {
            return;
        };
        if flow.ended {
            return;
        }
        let (cancelled, orphaned) = flow.finish(keep_extends);
        self.cancel_pending(path, cancelled);
        self.log.react(path.clone(), ReactionKind::FlowEnded);
        for extend in orphaned {
            self.release_extend(extend, None, action);
        }
    }

    /// Settles a pending extend the flow owns: `Some(value)` resolves
    /// with a final value, `None` aborts and propagates the held value.
    fn settle_extend(
        &mut self,
        owner: &FlowPath,
        event: &EventId,
        value: Option<Value>,
        action: Option<ActionId>,
    ) {
        let Some(extend) = self
            .arena
            .get_mut(owner)
            .and_then(|flow| flow.pending_extends.remove(event))
        else {
            debug!(flow = %owner, %event, "no pending extend to settle");
            return;
        };
        self.release_extend(extend, value, action);
    }

    /// Releases a pending extend: the intercepted action finally
    /// propagates, as if it had occurred directly, with either the
    /// resolved value or (on abort) the originally held one.
    fn release_extend(
        &mut self,
        extend: PendingExtend,
        resolved: Option<Value>,
        action: Option<ActionId>,
    ) {
        let (kind, value) = match resolved {
            Some(value) => (
                ReactionKind::PendingExtendResolved {
                    event: extend.event.clone(),
                },
                Some(value),
            ),
            None => (
                ReactionKind::PendingExtendAborted {
                    event: extend.event.clone(),
                },
                match extend.value {
                    ExtendedValue::Resolved(value) => Some(value),
                    // The intercepted payload never settled; there is
                    // nothing to propagate.
                    ExtendedValue::Pending => None,
                },
            ),
        };
        self.log.react(extend.extending_flow.clone(), kind);
        let Some(value) = value else {
            return;
        };
        let primaries: Vec<(FlowPath, BidId)> = extend
            .intercepted
            .iter()
            .map(|placed| (placed.flow.clone(), placed.id))
            .collect();
        self.commit_and_propagate(&extend.event, value, &primaries, action);
    }

    /// The single pending extend for an event, if any flow owns one.
    fn find_pending_extend(&self, event: &EventId) -> Option<(FlowPath, ActionId)> {
        self.arena.iter().find_map(|flow| {
            flow.pending_extends
                .get(event)
                .map(|pe| (flow.path.clone(), pe.created_by))
        })
    }

    /// Snapshot of a placed bid by owner and id, looking through both
    /// live bids and the pending request slot.
    fn primary_placed(&self, event: &EventId, flow: &FlowPath, bid: BidId) -> Option<PlacedBid> {
        self.current.for_event(event).and_then(|c| {
            c.all
                .iter()
                .find(|p| p.flow == *flow && p.id == bid)
                .or(c
                    .pending_request
                    .as_ref()
                    .filter(|p| p.flow == *flow && p.id == bid))
                .cloned()
        })
    }

    pub(crate) fn drop_pending_work(&mut self, request_action: ActionId) {
        self.pending_work
            .retain(|item| item.request_action != request_action);
    }
}
