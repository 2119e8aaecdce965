//! Action wire types.
//!
//! Exactly one action is processed per scheduling step. Actions are the
//! replay contract: every shape is JSON-serializable and carries the
//! ids needed to re-match it against a fresh flow tree.
//!
//! # Shapes
//!
//! | Type | Source |
//! |------|--------|
//! | `external` | `Engine::dispatch` matched against an askFor bid |
//! | `requested` | a request bid won with a settled payload |
//! | `requestedAsync` | a request bid won with an in-flight payload |
//! | `resolvePendingRequest` | an async payload settled successfully |
//! | `rejectPendingRequest` | an async payload rejected |

use braid_types::{ActionId, BidId, EventId, FlowPath};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One processed scheduling step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    /// An externally dispatched value, matched against an askFor bid.
    #[serde(rename_all = "camelCase")]
    External {
        /// Sequential action id.
        id: ActionId,
        /// The dispatched event.
        event: EventId,
        /// The flow owning the matched askFor bid.
        flow: FlowPath,
        /// The matched askFor bid.
        bid: BidId,
        /// The dispatched value.
        payload: Value,
    },
    /// A request bid won the step with a settled payload.
    #[serde(rename_all = "camelCase")]
    Requested {
        /// Sequential action id.
        id: ActionId,
        /// The requested event.
        event: EventId,
        /// The flow owning the winning request bid.
        flow: FlowPath,
        /// The winning request bid.
        bid: BidId,
        /// The committed payload.
        payload: Value,
    },
    /// A request bid won the step with an in-flight async payload. The
    /// payload itself is pending and therefore not on the wire.
    #[serde(rename_all = "camelCase")]
    RequestedAsync {
        /// Sequential action id; also the settlement correlation id.
        id: ActionId,
        /// The requested event.
        event: EventId,
        /// The flow owning the winning request bid.
        flow: FlowPath,
        /// The winning request bid.
        bid: BidId,
    },
    /// An in-flight async payload settled successfully.
    #[serde(rename_all = "camelCase")]
    ResolvePendingRequest {
        /// Sequential action id.
        id: ActionId,
        /// The event whose pending request settled.
        event: EventId,
        /// The flow owning the pending request.
        flow: FlowPath,
        /// The original request bid.
        bid: BidId,
        /// Correlation id: the `requestedAsync` action that registered
        /// the pending request.
        request_action: ActionId,
        /// The resolved value.
        payload: Value,
    },
    /// An in-flight async payload rejected.
    #[serde(rename_all = "camelCase")]
    RejectPendingRequest {
        /// Sequential action id.
        id: ActionId,
        /// The event whose pending request rejected.
        event: EventId,
        /// The flow owning the pending request.
        flow: FlowPath,
        /// The original request bid.
        bid: BidId,
        /// Correlation id: the `requestedAsync` action that registered
        /// the pending request.
        request_action: ActionId,
        /// The rejection error value.
        error: Value,
    },
}

impl Action {
    /// Returns the sequential action id.
    #[must_use]
    pub fn id(&self) -> ActionId {
        match self {
            Self::External { id, .. }
            | Self::Requested { id, .. }
            | Self::RequestedAsync { id, .. }
            | Self::ResolvePendingRequest { id, .. }
            | Self::RejectPendingRequest { id, .. } => *id,
        }
    }

    /// Returns the event this action is about.
    #[must_use]
    pub fn event(&self) -> &EventId {
        match self {
            Self::External { event, .. }
            | Self::Requested { event, .. }
            | Self::RequestedAsync { event, .. }
            | Self::ResolvePendingRequest { event, .. }
            | Self::RejectPendingRequest { event, .. } => event,
        }
    }

    /// Returns the flow owning the matched bid.
    #[must_use]
    pub fn flow(&self) -> &FlowPath {
        match self {
            Self::External { flow, .. }
            | Self::Requested { flow, .. }
            | Self::RequestedAsync { flow, .. }
            | Self::ResolvePendingRequest { flow, .. }
            | Self::RejectPendingRequest { flow, .. } => flow,
        }
    }

    /// Returns the matched bid's id.
    #[must_use]
    pub fn bid(&self) -> BidId {
        match self {
            Self::External { bid, .. }
            | Self::Requested { bid, .. }
            | Self::RequestedAsync { bid, .. }
            | Self::ResolvePendingRequest { bid, .. }
            | Self::RejectPendingRequest { bid, .. } => *bid,
        }
    }

    /// Returns the committed payload for shapes that carry one.
    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::External { payload, .. }
            | Self::Requested { payload, .. }
            | Self::ResolvePendingRequest { payload, .. } => Some(payload),
            Self::RequestedAsync { .. } | Self::RejectPendingRequest { .. } => None,
        }
    }

    /// Returns the wire name of this action type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::External { .. } => "external",
            Self::Requested { .. } => "requested",
            Self::RequestedAsync { .. } => "requestedAsync",
            Self::ResolvePendingRequest { .. } => "resolvePendingRequest",
            Self::RejectPendingRequest { .. } => "rejectPendingRequest",
        }
    }
}
