//! Identifier types for the braid scheduler.
//!
//! This crate is the bottom layer of the braid workspace. It defines the
//! identity vocabulary shared by every other crate, plus the [`ErrorCode`]
//! contract for standardized error handling.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  braid-types   : EventId, FlowPath, ActionId, ErrorCode     │
//! │  braid-core    : bids, flows, engine (deterministic core)   │
//! │  braid-runtime : tokio driver for the async request boundary│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Identity Strategy
//!
//! | Type | Backing | Why |
//! |------|---------|-----|
//! | [`EventId`] | string name | events are named slots, stable across runs |
//! | [`FlowPath`] | segment list | flows form a tree, identity is the path |
//! | [`ActionId`] | sequential u64 | actions are a totally ordered log |
//! | [`BidId`] | per-flow u32 | bids are numbered within one flow's life |
//! | [`EngineId`] | random UUID v4 | engine instances are runtime-unique |
//!
//! Everything except [`EngineId`] is deterministic: replaying the same
//! action sequence through the same flow tree reproduces the same ids.

mod error;
mod ids;

pub use error::{assert_error_code, assert_error_codes, ErrorCode};
pub use ids::{ActionId, BidId, EngineId, EventId, FlowPath};
