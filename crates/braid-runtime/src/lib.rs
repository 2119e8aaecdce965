//! Tokio driver for the braid engine.
//!
//! The engine itself is synchronous and deterministic; it never polls a
//! future. This crate is the bridge across the one genuine asynchronous
//! boundary: request bids whose payload is in-flight work. The driver
//! owns an engine, executes registered async payloads as tasks, and
//! feeds every settlement and external dispatch back into the run loop
//! through a single mpsc inbox, preserving one-at-a-time action
//! processing.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  braid-types   : EventId, FlowPath, ActionId, ErrorCode     │
//! │  braid-core    : bids, flows, engine (deterministic core)   │
//! │  braid-runtime : tokio driver  ◄── HERE                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod driver;

pub use driver::{Driver, DriverError, DriverHandle, DriverInput};
