//! Deterministic behavioral-programming engine for braid.
//!
//! Braid coordinates many independently written, suspendable processes
//! ("flows"). Each flow repeatedly proposes a set of possible next
//! events ("bids") and suspends; the engine picks one winning event per
//! step, honoring priority, validity and blocking rules, applies it,
//! resumes every affected flow, and repeats until no flow can proceed.
//! Flows never call each other: all coordination is mediated by bid
//! matching over named events.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  braid-types   : EventId, FlowPath, ActionId, ErrorCode     │
//! │  braid-core    : bids, flows, engine  ◄── HERE              │
//! │  braid-runtime : tokio driver for the async request boundary│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Scheduling Model
//!
//! ```text
//!              ┌──────────────────────────────────────┐
//!              │                Engine                │
//!              │                                      │
//!  dispatch ──►│  aggregate ──► select ──► dispatch   │
//!  resolve  ──►│      ▲                      │        │
//!  reject   ──►│      └──── re-aggregate ◄───┘        │
//!              └──────────────────────────────────────┘
//!                      │ resume                ▲ place bids
//!                      ▼                       │
//!              ┌──────────┐  ┌──────────┐  ┌──────────┐
//!              │  Flow    │  │  Flow    │  │  Flow    │
//!              │  (root)  │  │ (child)  │  │ (child)  │
//!              └──────────┘  └──────────┘  └──────────┘
//! ```
//!
//! Everything inside one [`Engine::run`](engine::Engine::run) pass is
//! synchronous and deterministic. The only genuine asynchronous boundary
//! is a request whose payload is in-flight work: the engine emits a
//! `requestedAsync` action immediately and the settlement re-enters the
//! loop later through `resolve_pending_request` / `reject_pending_request`.
//!
//! # Example
//!
//! ```
//! use braid_core::prelude::*;
//! use serde_json::json;
//!
//! let mut engine = Engine::new(EngineConfig::named("demo"));
//! engine
//!     .start("app", || {
//!         Box::new(
//!             |_cx: &mut FlowContext<'_>, input: FlowInput| -> Result<FlowStep, FlowFault> {
//!                 match input {
//!                     FlowInput::Started => {
//!                         Ok(FlowStep::Bids(vec![request("greeting", json!("hi"))]))
//!                     }
//!                     _ => Ok(FlowStep::Done),
//!                 }
//!             },
//!         )
//!     })
//!     .expect("fresh engine");
//!
//! assert_eq!(engine.event_value(&EventId::new("greeting")), Some(&json!("hi")));
//! ```

pub mod action;
pub mod bid;
pub mod config;
pub mod engine;
pub mod event;
pub mod flow;
pub mod invalid;
pub mod reaction;
pub mod replay;
pub mod testing;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::action::Action;
    pub use crate::bid::{
        ask_for, block, extend, given, request, request_with, trigger, validate, wait_for, Bid,
        BidKind, PayloadOutcome, PendingWork,
    };
    pub use crate::config::EngineConfig;
    pub use crate::engine::{DispatchOutcome, Engine, EngineError, PendingWorkItem};
    pub use crate::flow::{FlowContext, FlowFault, FlowInput, FlowLogic, FlowStep};
    pub use crate::invalid::{AccumulatedValidation, GuardOutcome, InvalidBidReason};
    pub use crate::reaction::{FlowReaction, LoggedAction, ReactionKind, RestartReason};
    pub use crate::replay::{ReplayReport, ReplaySession};
    pub use braid_types::{ActionId, BidId, EngineId, EventId, FlowPath};
}

pub use action::Action;
pub use bid::{Bid, BidKind, PlacedBid};
pub use config::EngineConfig;
pub use engine::{
    CurrentBidsForEvent, DispatchOutcome, Engine, EngineError, OrderedRequestsAndCurrentBids,
    PendingWorkItem,
};
pub use flow::{FlowContext, FlowFault, FlowInput, FlowLogic, FlowStep, PendingExtend};
pub use invalid::{AccumulatedValidation, GuardOutcome, GuardResult, InvalidBidReason};
pub use reaction::{FlowReaction, LoggedAction, ReactionKind, RestartReason};
pub use replay::{ReplayMismatch, ReplayReport, ReplaySession};
