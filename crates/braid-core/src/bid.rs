//! Bids: the proposals flows place over events.
//!
//! A bid is an immutable proposal yielded by a flow: "I want to request
//! this event with this payload", "wake me when this event happens",
//! "block this event", and so on. Flows never call each other; every
//! coordination between them is mediated by bid matching over named
//! events.
//!
//! # Bid Kinds
//!
//! | Kind | Meaning |
//! |------|---------|
//! | `Request` | propose a payload for the event; wins a step if valid |
//! | `Trigger` | request that is valid only while someone asks for it |
//! | `WaitFor` | resume me when the event gets a value |
//! | `AskFor` | invite external dispatches and triggers for the event |
//! | `Extend` | intercept the event's resolution before it commits |
//! | `Validate` | contribute a payload guard to the event |
//! | `Block` | make every request/dispatch for the event invalid |
//! | `Given` | precondition: activate on a valid value, restart when it
//!   turns invalid |
//!
//! # Guards
//!
//! A guard is a shared pure predicate over the candidate payload. Guards
//! are `Arc`ed so a placed bid can be cloned into per-event buckets
//! without copying user closures.
//!
//! # Example
//!
//! ```
//! use braid_core::bid::{ask_for, request, wait_for};
//! use braid_types::EventId;
//! use serde_json::json;
//!
//! let price = EventId::new("price");
//! let bids = vec![
//!     request(price.clone(), json!(42)),
//!     wait_for(EventId::new("cancel")),
//!     ask_for(EventId::new("user-input")).with_guard(|v| v.is_string().into()),
//! ];
//! assert_eq!(bids[0].kind.name(), "request");
//! ```

use crate::invalid::GuardOutcome;
use braid_types::{ActionId, BidId, EventId, FlowPath};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Shared payload guard: a pure predicate over a candidate value.
pub type Guard = Arc<dyn Fn(&Value) -> GuardOutcome + Send + Sync>;

/// Computed request payload: receives the event's current value.
pub type PayloadFn = Arc<dyn Fn(Option<&Value>) -> PayloadOutcome + Send + Sync>;

/// Future driven outside the engine for an async request payload.
pub type WorkFuture = Pin<Box<dyn Future<Output = Result<Value, Value>> + Send>>;

/// The payload of a request or trigger bid.
#[derive(Clone)]
pub enum RequestPayload {
    /// A plain value, committed as-is when the bid wins.
    Value(Value),
    /// A function invoked at selection time with the event's current
    /// value. May produce a plain value or an in-flight async operation.
    Compute(PayloadFn),
}

impl RequestPayload {
    /// Evaluates the payload against the event's current value.
    pub(crate) fn evaluate(&self, current: Option<&Value>) -> PayloadOutcome {
        match self {
            Self::Value(v) => PayloadOutcome::Value(v.clone()),
            Self::Compute(f) => f(current),
        }
    }
}

impl std::fmt::Debug for RequestPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Compute(_) => f.write_str("Compute(..)"),
        }
    }
}

/// Result of evaluating a request payload.
pub enum PayloadOutcome {
    /// A settled value; validated and committed synchronously.
    Value(Value),
    /// An in-flight operation. The request wins the step immediately as
    /// `requestedAsync`; the value arrives later through resolve/reject.
    Pending(PendingWork),
}

impl From<Value> for PayloadOutcome {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// An async request payload that the engine registers but never polls.
///
/// The engine is single-threaded and deterministic; it records the
/// pending work and a driver (see `braid-runtime`) executes the future,
/// delivering the settlement back through
/// `Engine::resolve_pending_request` / `reject_pending_request` tagged
/// with the correlating action id. A detached work item carries no
/// future and never settles, which is what replay mocking uses.
pub struct PendingWork {
    future: Option<WorkFuture>,
}

impl PendingWork {
    /// Wraps a future resolving to `Ok(value)` or rejecting with
    /// `Err(error)`.
    #[must_use]
    pub fn new(future: impl Future<Output = Result<Value, Value>> + Send + 'static) -> Self {
        Self {
            future: Some(Box::pin(future)),
        }
    }

    /// A pending payload that never settles. Used by the replay harness
    /// to mock async requests deterministically.
    #[must_use]
    pub fn detached() -> Self {
        Self { future: None }
    }

    /// Returns `true` if this work carries no future and will never
    /// settle on its own.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.future.is_none()
    }

    /// Takes the future out, leaving a detached work item.
    pub fn take_future(&mut self) -> Option<WorkFuture> {
        self.future.take()
    }
}

impl std::fmt::Debug for PendingWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.future {
            Some(_) => f.write_str("PendingWork(..)"),
            None => f.write_str("PendingWork(detached)"),
        }
    }
}

/// The closed union of bid kinds.
#[derive(Clone, Debug)]
pub enum BidKind {
    /// Propose a payload for the event.
    Request {
        /// The proposed payload.
        payload: RequestPayload,
    },
    /// A request that is only valid while a live `AskFor` bid for the
    /// same event exists, and must pass that bid's guard.
    Trigger {
        /// The proposed payload.
        payload: RequestPayload,
    },
    /// Resume the placing flow when the event receives a value.
    WaitFor,
    /// Invite external dispatches and triggers for the event.
    AskFor,
    /// Intercept the event's resolution before the value commits.
    Extend,
    /// Contribute a guard to the event's payload validation.
    Validate,
    /// Make every request and dispatch for the event invalid.
    Block,
    /// Precondition: progress when the event holds a valid value, restart
    /// the flow when a later value invalidates it.
    Given,
}

impl BidKind {
    /// Returns the wire name of this kind.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Trigger { .. } => "trigger",
            Self::WaitFor => "waitFor",
            Self::AskFor => "askFor",
            Self::Extend => "extend",
            Self::Validate => "validate",
            Self::Block => "block",
            Self::Given => "given",
        }
    }

    /// Returns `true` for the two request-like kinds that can win a
    /// scheduling step on their own.
    #[must_use]
    pub fn is_request_like(&self) -> bool {
        matches!(self, Self::Request { .. } | Self::Trigger { .. })
    }
}

/// An immutable proposal placed by a flow.
#[derive(Clone)]
pub struct Bid {
    /// The event this bid coordinates over.
    pub event: EventId,
    /// What the bid proposes.
    pub kind: BidKind,
    /// Optional payload guard.
    pub guard: Option<Guard>,
}

impl Bid {
    /// Attaches a guard to this bid.
    ///
    /// The guard's meaning depends on the kind: a request validates its
    /// own payload through it, an askFor validates dispatched values, an
    /// extend intercepts only payloads it accepts, a waitFor wakes only
    /// on accepted values.
    #[must_use]
    pub fn with_guard<G>(mut self, guard: G) -> Self
    where
        G: Fn(&Value) -> GuardOutcome + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(guard));
        self
    }

    /// Evaluates this bid's guard against a payload.
    ///
    /// A bid without a guard accepts every payload.
    #[must_use]
    pub fn check_guard(&self, payload: &Value) -> GuardOutcome {
        match &self.guard {
            Some(guard) => guard(payload),
            None => GuardOutcome::valid(),
        }
    }
}

impl std::fmt::Debug for Bid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bid")
            .field("event", &self.event)
            .field("kind", &self.kind)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

fn bare(event: impl Into<EventId>, kind: BidKind) -> Bid {
    Bid {
        event: event.into(),
        kind,
        guard: None,
    }
}

/// Proposes `payload` for `event`.
#[must_use]
pub fn request(event: impl Into<EventId>, payload: impl Into<Value>) -> Bid {
    bare(
        event,
        BidKind::Request {
            payload: RequestPayload::Value(payload.into()),
        },
    )
}

/// Proposes a computed payload for `event`. The function receives the
/// event's current value and may return an async [`PendingWork`].
#[must_use]
pub fn request_with<F>(event: impl Into<EventId>, payload: F) -> Bid
where
    F: Fn(Option<&Value>) -> PayloadOutcome + Send + Sync + 'static,
{
    bare(
        event,
        BidKind::Request {
            payload: RequestPayload::Compute(Arc::new(payload)),
        },
    )
}

/// Proposes `payload` for `event`, valid only while an `askFor` bid for
/// the event is placed.
#[must_use]
pub fn trigger(event: impl Into<EventId>, payload: impl Into<Value>) -> Bid {
    bare(
        event,
        BidKind::Trigger {
            payload: RequestPayload::Value(payload.into()),
        },
    )
}

/// Resumes the placing flow when `event` receives a value.
#[must_use]
pub fn wait_for(event: impl Into<EventId>) -> Bid {
    bare(event, BidKind::WaitFor)
}

/// Invites external dispatches and triggers for `event`.
#[must_use]
pub fn ask_for(event: impl Into<EventId>) -> Bid {
    bare(event, BidKind::AskFor)
}

/// Intercepts `event`'s resolution before the value commits.
#[must_use]
pub fn extend(event: impl Into<EventId>) -> Bid {
    bare(event, BidKind::Extend)
}

/// Contributes `guard` to `event`'s payload validation.
#[must_use]
pub fn validate<G>(event: impl Into<EventId>, guard: G) -> Bid
where
    G: Fn(&Value) -> GuardOutcome + Send + Sync + 'static,
{
    bare(event, BidKind::Validate).with_guard(guard)
}

/// Makes every request and dispatch for `event` invalid.
#[must_use]
pub fn block(event: impl Into<EventId>) -> Bid {
    bare(event, BidKind::Block)
}

/// Precondition on `event`: the flow progresses once the event holds a
/// value accepted by `guard`, and fully restarts when a later value is
/// not accepted.
#[must_use]
pub fn given<G>(event: impl Into<EventId>, guard: G) -> Bid
where
    G: Fn(&Value) -> GuardOutcome + Send + Sync + 'static,
{
    bare(event, BidKind::Given).with_guard(guard)
}

/// A bid that has been placed by a flow and entered aggregation.
#[derive(Clone, Debug)]
pub struct PlacedBid {
    /// The underlying proposal.
    pub bid: Bid,
    /// Id unique within the owning flow, monotonic until restart.
    pub id: BidId,
    /// The owning flow's path.
    pub flow: FlowPath,
    /// Correlation id of the in-flight async request, if this bid has
    /// already won a step as `requestedAsync`.
    pub request_action: Option<ActionId>,
}

impl PlacedBid {
    /// Returns the event this bid coordinates over.
    #[must_use]
    pub fn event(&self) -> &EventId {
        &self.bid.event
    }

    /// Returns the wire name of the bid kind.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.bid.kind.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_names_match_wire_format() {
        let e = EventId::new("e");
        assert_eq!(request(e.clone(), json!(1)).kind.name(), "request");
        assert_eq!(trigger(e.clone(), json!(1)).kind.name(), "trigger");
        assert_eq!(wait_for(e.clone()).kind.name(), "waitFor");
        assert_eq!(ask_for(e.clone()).kind.name(), "askFor");
        assert_eq!(extend(e.clone()).kind.name(), "extend");
        assert_eq!(block(e.clone()).kind.name(), "block");
        assert_eq!(validate(e.clone(), |_| true.into()).kind.name(), "validate");
        assert_eq!(given(e, |_| true.into()).kind.name(), "given");
    }

    #[test]
    fn unguarded_bid_accepts_everything() {
        let bid = wait_for("e");
        assert!(bid.check_guard(&json!(null)).is_valid);
        assert!(bid.check_guard(&json!({"k": 1})).is_valid);
    }

    #[test]
    fn guard_sees_the_payload() {
        let bid = ask_for("e").with_guard(|v| (v.as_i64() == Some(3)).into());
        assert!(bid.check_guard(&json!(3)).is_valid);
        assert!(!bid.check_guard(&json!(4)).is_valid);
    }

    #[test]
    fn computed_payload_receives_current_value() {
        let bid = request_with("counter", |current| {
            let next = current.and_then(Value::as_i64).unwrap_or(0) + 1;
            PayloadOutcome::Value(json!(next))
        });
        let BidKind::Request { payload } = &bid.kind else {
            panic!("expected request kind");
        };
        match payload.evaluate(Some(&json!(41))) {
            PayloadOutcome::Value(v) => assert_eq!(v, json!(42)),
            PayloadOutcome::Pending(_) => panic!("expected settled value"),
        }
    }

    #[test]
    fn detached_work_has_no_future() {
        let mut work = PendingWork::detached();
        assert!(work.take_future().is_none());
    }
}
