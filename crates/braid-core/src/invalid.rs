//! Invalid-bid reasons and payload validation.
//!
//! An action that does not match any currently valid bid is an expected,
//! frequent outcome of scheduling, not an exception. This module turns
//! "why is this bid not selectable" into structured values that the
//! selector uses to skip bids and that external callers receive when a
//! dispatch is dropped.
//!
//! # Reason Codes
//!
//! | Reason | Code | Recoverable |
//! |--------|------|-------------|
//! | [`InvalidBidReason::Blocked`] | `BID_BLOCKED` | Yes |
//! | [`InvalidBidReason::EventPending`] | `BID_EVENT_PENDING` | Yes |
//! | [`InvalidBidReason::NotConnected`] | `BID_NOT_CONNECTED` | No |
//! | [`InvalidBidReason::NoAskForBid`] | `BID_NO_ASK_FOR` | Yes |
//! | [`InvalidBidReason::NoMatchingBid`] | `BID_NO_MATCHING` | Yes |
//! | [`InvalidBidReason::StalePendingRequest`] | `BID_STALE_PENDING_REQUEST` | No |
//! | [`InvalidBidReason::PayloadInvalid`] | `BID_PAYLOAD_INVALID` | No |
//!
//! Recoverable reasons depend on scheduler state that later actions can
//! change; retrying the same dispatch after the state moves may succeed.

use crate::bid::{BidKind, PlacedBid};
use crate::engine::CurrentBidsForEvent;
use braid_types::{ActionId, BidId, ErrorCode, EventId, FlowPath};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Verdict of a single guard over a candidate payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GuardOutcome {
    /// Whether the guard accepts the payload.
    pub is_valid: bool,
    /// Free-form detail values the guard wants to surface (messages,
    /// field names). Empty for plain boolean guards.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<Value>,
}

impl GuardOutcome {
    /// An accepting verdict with no details.
    #[must_use]
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            details: Vec::new(),
        }
    }

    /// A rejecting verdict with no details.
    #[must_use]
    pub fn invalid() -> Self {
        Self {
            is_valid: false,
            details: Vec::new(),
        }
    }

    /// A rejecting verdict carrying one detail value.
    #[must_use]
    pub fn invalid_with(detail: impl Into<Value>) -> Self {
        Self {
            is_valid: false,
            details: vec![detail.into()],
        }
    }
}

impl From<bool> for GuardOutcome {
    fn from(is_valid: bool) -> Self {
        Self {
            is_valid,
            details: Vec::new(),
        }
    }
}

/// One guard's verdict, attributed to the bid that contributed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardResult {
    /// The flow that placed the contributing bid.
    pub flow: FlowPath,
    /// The contributing bid's id within that flow.
    pub bid: BidId,
    /// Wire name of the contributing bid kind.
    pub kind: String,
    /// The verdict.
    pub outcome: GuardOutcome,
}

/// All guard verdicts that applied to one candidate payload.
///
/// The payload is valid only when every applicable guard accepted it.
/// Individual results are retained so external callers can explain a
/// dropped dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulatedValidation {
    /// Overall verdict.
    pub is_valid: bool,
    /// Per-guard results in bid-priority order.
    pub results: Vec<GuardResult>,
}

impl AccumulatedValidation {
    /// Starts an accumulation that is valid until a guard rejects.
    #[must_use]
    pub fn new() -> Self {
        Self {
            is_valid: true,
            results: Vec::new(),
        }
    }

    /// Records one guard verdict.
    pub fn record(&mut self, placed: &PlacedBid, outcome: GuardOutcome) {
        self.is_valid &= outcome.is_valid;
        self.results.push(GuardResult {
            flow: placed.flow.clone(),
            bid: placed.id,
            kind: placed.kind_name().to_string(),
            outcome,
        });
    }
}

/// Why a bid or action is not currently selectable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum InvalidBidReason {
    /// A block bid for the event is placed.
    Blocked {
        /// The blocked event.
        event: EventId,
    },
    /// The event already has a pending request or pending extend.
    EventPending {
        /// The pending event.
        event: EventId,
    },
    /// The event id was never connected to this engine.
    NotConnected {
        /// The unknown event.
        event: EventId,
    },
    /// A trigger or dispatch needs a live askFor bid and none accepts
    /// the payload.
    NoAskForBid {
        /// The event without an inviting bid.
        event: EventId,
    },
    /// No currently placed bid matches the action at all.
    NoMatchingBid {
        /// The unmatched event.
        event: EventId,
    },
    /// A resolve/reject names a pending request that no longer exists or
    /// carries a correlation id that does not match it.
    StalePendingRequest {
        /// The event the settlement named.
        event: EventId,
        /// The live pending request's correlation id, if any.
        expected: Option<ActionId>,
    },
    /// The payload failed accumulated validation.
    PayloadInvalid {
        /// The event whose guards rejected the payload.
        event: EventId,
        /// Every guard verdict that applied.
        validation: AccumulatedValidation,
    },
}

impl InvalidBidReason {
    /// Returns the event the reason is about.
    #[must_use]
    pub fn event(&self) -> &EventId {
        match self {
            Self::Blocked { event }
            | Self::EventPending { event }
            | Self::NotConnected { event }
            | Self::NoAskForBid { event }
            | Self::NoMatchingBid { event }
            | Self::StalePendingRequest { event, .. }
            | Self::PayloadInvalid { event, .. } => event,
        }
    }
}

impl ErrorCode for InvalidBidReason {
    fn code(&self) -> &'static str {
        match self {
            Self::Blocked { .. } => "BID_BLOCKED",
            Self::EventPending { .. } => "BID_EVENT_PENDING",
            Self::NotConnected { .. } => "BID_NOT_CONNECTED",
            Self::NoAskForBid { .. } => "BID_NO_ASK_FOR",
            Self::NoMatchingBid { .. } => "BID_NO_MATCHING",
            Self::StalePendingRequest { .. } => "BID_STALE_PENDING_REQUEST",
            Self::PayloadInvalid { .. } => "BID_PAYLOAD_INVALID",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Blocked { .. }
                | Self::EventPending { .. }
                | Self::NoAskForBid { .. }
                | Self::NoMatchingBid { .. }
        )
    }
}

impl std::fmt::Display for InvalidBidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocked { event } => write!(f, "{event} is blocked"),
            Self::EventPending { event } => write!(f, "{event} is pending"),
            Self::NotConnected { event } => write!(f, "{event} is not connected to this engine"),
            Self::NoAskForBid { event } => write!(f, "no live askFor bid accepts {event}"),
            Self::NoMatchingBid { event } => write!(f, "no placed bid matches {event}"),
            Self::StalePendingRequest { event, .. } => {
                write!(f, "settlement for {event} names a stale pending request")
            }
            Self::PayloadInvalid { event, .. } => {
                write!(f, "payload for {event} failed validation")
            }
        }
    }
}

/// Explains why a placed request bid is not selectable right now, or
/// `None` if nothing disqualifies it before payload evaluation.
///
/// Checked in order: block bids, pending state, the trigger's need for a
/// live askFor bid. Payload validation happens after this, once the
/// payload has been computed.
#[must_use]
pub fn explain_request_bid(
    placed: &PlacedBid,
    current: &CurrentBidsForEvent,
) -> Option<InvalidBidReason> {
    let event = placed.event().clone();
    if !current.block.is_empty() {
        return Some(InvalidBidReason::Blocked { event });
    }
    if current.is_pending() {
        return Some(InvalidBidReason::EventPending { event });
    }
    if matches!(placed.bid.kind, BidKind::Trigger { .. }) && current.ask_for.is_empty() {
        return Some(InvalidBidReason::NoAskForBid { event });
    }
    None
}

/// Runs accumulated payload validation for a candidate value.
///
/// Applies, in bid-priority order: the winning bid's own guard, every
/// placed validate bid for the event, and the guard of a placed extend
/// bid currently mid-interception (`extra`). For a trigger, the askFor
/// guards are accumulated separately by the selector because they also
/// decide which askFor bid matches.
#[must_use]
pub fn validate_payload(
    payload: &Value,
    own: Option<&PlacedBid>,
    current: &CurrentBidsForEvent,
    extra: &[&PlacedBid],
) -> AccumulatedValidation {
    let mut acc = AccumulatedValidation::new();
    if let Some(own) = own {
        acc.record(own, own.bid.check_guard(payload));
    }
    for validator in &current.validate {
        acc.record(validator, validator.bid.check_guard(payload));
    }
    for placed in extra {
        acc.record(placed, placed.bid.check_guard(payload));
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bid::{ask_for, block, request, trigger, validate};
    use braid_types::assert_error_codes;
    use serde_json::json;

    fn placed(bid: crate::bid::Bid, flow: &str, id: u32) -> PlacedBid {
        PlacedBid {
            bid,
            id: BidId::new(id),
            flow: FlowPath::root(flow),
            request_action: None,
        }
    }

    fn empty_current(event: &EventId) -> CurrentBidsForEvent {
        CurrentBidsForEvent::new(event.clone())
    }

    #[test]
    fn block_bid_wins_over_everything() {
        let e = EventId::new("e");
        let mut current = empty_current(&e);
        current.block.push(placed(block(e.clone()), "blocker", 0));

        let req = placed(request(e.clone(), json!(1)), "requester", 0);
        assert_eq!(
            explain_request_bid(&req, &current),
            Some(InvalidBidReason::Blocked { event: e })
        );
    }

    #[test]
    fn trigger_needs_live_ask_for() {
        let e = EventId::new("e");
        let current = empty_current(&e);
        let trig = placed(trigger(e.clone(), json!(1)), "t", 0);

        assert_eq!(
            explain_request_bid(&trig, &current),
            Some(InvalidBidReason::NoAskForBid { event: e.clone() })
        );

        let mut current = empty_current(&e);
        current.ask_for.push(placed(ask_for(e.clone()), "asker", 0));
        assert_eq!(explain_request_bid(&trig, &current), None);
    }

    #[test]
    fn validation_accumulates_every_guard() {
        let e = EventId::new("e");
        let mut current = empty_current(&e);
        current
            .validate
            .push(placed(validate(e.clone(), |v| (v.as_i64() > Some(0)).into()), "a", 0));
        current
            .validate
            .push(placed(validate(e.clone(), |v| (v.as_i64() < Some(10)).into()), "b", 0));

        let acc = validate_payload(&json!(5), None, &current, &[]);
        assert!(acc.is_valid);
        assert_eq!(acc.results.len(), 2);

        let acc = validate_payload(&json!(50), None, &current, &[]);
        assert!(!acc.is_valid);
        assert!(acc.results[0].outcome.is_valid);
        assert!(!acc.results[1].outcome.is_valid);
    }

    #[test]
    fn reason_codes_follow_conventions() {
        let e = EventId::new("e");
        assert_error_codes(
            &[
                InvalidBidReason::Blocked { event: e.clone() },
                InvalidBidReason::EventPending { event: e.clone() },
                InvalidBidReason::NotConnected { event: e.clone() },
                InvalidBidReason::NoAskForBid { event: e.clone() },
                InvalidBidReason::NoMatchingBid { event: e.clone() },
                InvalidBidReason::StalePendingRequest {
                    event: e.clone(),
                    expected: None,
                },
                InvalidBidReason::PayloadInvalid {
                    event: e,
                    validation: AccumulatedValidation::new(),
                },
            ],
            "BID_",
        );
    }

    #[test]
    fn reasons_serialize_with_tag() {
        let reason = InvalidBidReason::Blocked {
            event: EventId::new("e"),
        };
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["reason"], "blocked");
        assert_eq!(json["event"], "e");
    }
}
