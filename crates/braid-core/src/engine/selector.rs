//! Action selection: picking the single next action per step.
//!
//! Sources are tried in strict order by the engine's run loop:
//!
//! 1. a queued external dispatch or async settlement,
//! 2. a replay override,
//! 3. the first valid bid in the priority-ordered request list.
//!
//! Only one action is selected per iteration; the aggregation is rebuilt
//! before the next pick, so no stale bid from a freshly resumed flow
//! leaks into the same step.

use crate::action::Action;
use crate::bid::{BidKind, PayloadOutcome, PendingWork, PlacedBid};
use crate::engine::aggregator::{CurrentBidsForEvent, OrderedRequestsAndCurrentBids};
use crate::event::EventRegistry;
use crate::invalid::{explain_request_bid, validate_payload, InvalidBidReason};
use braid_types::{ActionId, EventId, FlowPath};
use serde_json::Value;
use std::collections::BTreeSet;

/// An input delivered from outside the run loop: a dispatch or the
/// settlement of an in-flight async request.
#[derive(Debug, Clone)]
pub(crate) enum ExternalInput {
    Dispatch {
        event: EventId,
        payload: Value,
    },
    Resolve {
        event: EventId,
        request_action: ActionId,
        payload: Value,
    },
    Reject {
        event: EventId,
        request_action: ActionId,
        error: Value,
    },
}

impl ExternalInput {
    pub(crate) fn event(&self) -> &EventId {
        match self {
            Self::Dispatch { event, .. }
            | Self::Resolve { event, .. }
            | Self::Reject { event, .. } => event,
        }
    }
}

/// Validates an external input against the current bids and turns it
/// into the action to process.
///
/// An invalid resolve of a live pending request is deliberately
/// converted into a synthetic reject action so the owning flow's catch
/// path runs; every other invalid input is dropped with its reason.
pub(crate) fn admit_external(
    input: ExternalInput,
    agg: &OrderedRequestsAndCurrentBids,
    events: &EventRegistry,
    id: ActionId,
) -> Result<Action, InvalidBidReason> {
    if !events.is_connected(input.event()) {
        return Err(InvalidBidReason::NotConnected {
            event: input.event().clone(),
        });
    }
    match input {
        ExternalInput::Dispatch { event, payload } => {
            let Some(current) = agg.for_event(&event) else {
                return Err(InvalidBidReason::NoMatchingBid { event });
            };
            if !current.block.is_empty() {
                return Err(InvalidBidReason::Blocked { event });
            }
            if current.is_pending() {
                return Err(InvalidBidReason::EventPending { event });
            }
            let Some(asker) = matching_ask_for(current, &payload) else {
                return Err(InvalidBidReason::NoAskForBid { event });
            };
            let validation = validate_payload(&payload, Some(asker), current, &[]);
            if !validation.is_valid {
                return Err(InvalidBidReason::PayloadInvalid { event, validation });
            }
            Ok(Action::External {
                id,
                event,
                flow: asker.flow.clone(),
                bid: asker.id,
                payload,
            })
        }
        ExternalInput::Resolve {
            event,
            request_action,
            payload,
        } => {
            let pending = live_pending_request(agg, &event, request_action)?;
            let current = agg.for_event(&event).expect("pending event has a view");
            let extend_guards: Vec<&PlacedBid> = current
                .pending_extend
                .as_ref()
                .map(|pe| vec![&pe.extend_bid])
                .unwrap_or_default();
            let validation = validate_payload(&payload, Some(pending), current, &extend_guards);
            if validation.is_valid {
                Ok(Action::ResolvePendingRequest {
                    id,
                    event,
                    flow: pending.flow.clone(),
                    bid: pending.id,
                    request_action,
                    payload,
                })
            } else {
                // An invalid resolve becomes a reject so the flow's
                // catch path observes the failure.
                Ok(Action::RejectPendingRequest {
                    id,
                    event,
                    flow: pending.flow.clone(),
                    bid: pending.id,
                    request_action,
                    error: serde_json::to_value(&validation).unwrap_or(Value::Null),
                })
            }
        }
        ExternalInput::Reject {
            event,
            request_action,
            error,
        } => {
            let pending = live_pending_request(agg, &event, request_action)?;
            Ok(Action::RejectPendingRequest {
                id,
                event,
                flow: pending.flow.clone(),
                bid: pending.id,
                request_action,
                error,
            })
        }
    }
}

/// Finds the live pending request a settlement names, enforcing the
/// correlation id so a stale settlement cannot corrupt state.
fn live_pending_request<'a>(
    agg: &'a OrderedRequestsAndCurrentBids,
    event: &EventId,
    request_action: ActionId,
) -> Result<&'a PlacedBid, InvalidBidReason> {
    let pending = agg
        .for_event(event)
        .and_then(|c| c.pending_request.as_ref());
    match pending {
        Some(placed) if placed.request_action == Some(request_action) => Ok(placed),
        other => Err(InvalidBidReason::StalePendingRequest {
            event: event.clone(),
            expected: other.and_then(|p| p.request_action),
        }),
    }
}

/// The highest-priority askFor bid whose guard accepts the payload.
pub(crate) fn matching_ask_for<'a>(
    current: &'a CurrentBidsForEvent,
    payload: &Value,
) -> Option<&'a PlacedBid> {
    current
        .ask_for
        .iter()
        .find(|asker| asker.bid.check_guard(payload).is_valid)
}

/// Walks the priority-ordered request list and selects the first valid
/// bid, producing its action. An invalid bid is skipped, not fatal: the
/// loop continues to the next request.
pub(crate) fn select_request(
    agg: &OrderedRequestsAndCurrentBids,
    events: &EventRegistry,
    id: ActionId,
) -> Option<(Action, Option<PendingWork>)> {
    // Within one flow's yield, only the earliest bid per event is
    // considered; a skipped one does not fall through to its later
    // sibling in the same pass.
    let mut considered: BTreeSet<(&FlowPath, &EventId)> = BTreeSet::new();
    for placed in &agg.ordered_requests {
        let event = placed.event();
        if !considered.insert((&placed.flow, event)) {
            continue;
        }
        let current = agg.for_event(event).expect("placed bid has a view");
        if explain_request_bid(placed, current).is_some() {
            continue;
        }

        let payload = match &placed.bid.kind {
            BidKind::Request { payload } | BidKind::Trigger { payload } => payload,
            _ => unreachable!("ordered_requests holds only request-like bids"),
        };
        match payload.evaluate(events.value(event)) {
            PayloadOutcome::Pending(work) => {
                // An async payload wins the step immediately; its value
                // arrives later through resolve/reject.
                return Some((
                    Action::RequestedAsync {
                        id,
                        event: event.clone(),
                        flow: placed.flow.clone(),
                        bid: placed.id,
                    },
                    Some(work),
                ));
            }
            PayloadOutcome::Value(value) => {
                let asker = if matches!(placed.bid.kind, BidKind::Trigger { .. }) {
                    match matching_ask_for(current, &value) {
                        Some(asker) => Some(asker),
                        // A live askFor exists but none accepts this
                        // payload: the trigger is skipped.
                        None => continue,
                    }
                } else {
                    None
                };
                let extra: Vec<&PlacedBid> = asker.into_iter().collect();
                let validation = validate_payload(&value, Some(placed), current, &extra);
                if !validation.is_valid {
                    continue;
                }
                return Some((
                    Action::Requested {
                        id,
                        event: event.clone(),
                        flow: placed.flow.clone(),
                        bid: placed.id,
                        payload: value,
                    },
                    None,
                ));
            }
        }
    }
    None
}
