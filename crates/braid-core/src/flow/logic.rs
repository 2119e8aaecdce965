//! The resumable-logic contract that replaces native generators.
//!
//! A flow is a suspendable unit of computation. In languages with
//! generators the suspension point is a `yield`; here it is an explicit
//! state machine: the engine calls [`FlowLogic::step`] with what caused
//! the resumption, and the logic answers with its next placed-bid set.
//! State between suspensions lives in the implementing type's fields.
//!
//! # Resumption Protocol
//!
//! ```text
//! engine                         logic
//!   │  step(cx, Started)           │  first run after (re)start
//!   │ ────────────────────────────►│
//!   │ ◄──────────────────────────  │  Bids([...]) = suspend on these
//!   │                              │
//!   │  step(cx, Advanced{..})      │  one of the bids matched
//!   │ ────────────────────────────►│
//!   │ ◄──────────────────────────  │  Bids / Park / Done
//!   │                              │
//!   │  step(cx, Rejected{..})      │  an async request rejected
//!   │ ────────────────────────────►│
//!   │ ◄──────────────────────────  │  handled, or Err(FlowFault)
//! ```
//!
//! A fault escaping `step` invokes the engine's error boundary: a flow
//! that never progressed is ended, one that did is fully restarted.
//!
//! # Example
//!
//! ```
//! use braid_core::bid::{request, wait_for, Bid};
//! use braid_core::flow::{FlowContext, FlowFault, FlowInput, FlowLogic, FlowStep};
//! use braid_types::EventId;
//! use serde_json::json;
//!
//! /// Requests a greeting, then waits for an acknowledgement.
//! struct Greeter {
//!     acked: bool,
//! }
//!
//! impl FlowLogic for Greeter {
//!     fn step(
//!         &mut self,
//!         _cx: &mut FlowContext<'_>,
//!         input: FlowInput,
//!     ) -> Result<FlowStep, FlowFault> {
//!         match input {
//!             FlowInput::Started => Ok(FlowStep::Bids(vec![
//!                 request(EventId::new("greeting"), json!("hello")),
//!             ])),
//!             FlowInput::Advanced { .. } if !self.acked => {
//!                 self.acked = true;
//!                 Ok(FlowStep::Bids(vec![wait_for(EventId::new("ack"))]))
//!             }
//!             _ => Ok(FlowStep::Done),
//!         }
//!     }
//! }
//! ```

use crate::bid::Bid;
use crate::flow::FlowContext;
use braid_types::EventId;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// What caused a flow's resumption.
#[derive(Debug)]
pub enum FlowInput {
    /// First invocation after creation or restart.
    Started,
    /// One of the flow's placed bids matched the processed action.
    Advanced {
        /// The event that matched.
        event: EventId,
        /// The committed payload.
        payload: Value,
        /// The simultaneously-placed bids that were not selected. The
        /// logic may place them again to keep waiting on them.
        remaining: Vec<Bid>,
    },
    /// The flow's pending async request rejected. Returning `Ok` from
    /// `step` counts as catching the rejection; returning `Err`
    /// escalates to the error boundary.
    Rejected {
        /// The event whose request rejected.
        event: EventId,
        /// The rejection error value.
        error: Value,
    },
}

/// A flow's answer to a resumption.
#[derive(Debug)]
pub enum FlowStep {
    /// Suspend on these bids, earlier position = higher priority.
    Bids(Vec<Bid>),
    /// Place no bids and park until disabled, restarted, or ended
    /// externally.
    Park,
    /// The computation finished; end the flow, preserving its pending
    /// extends.
    Done,
}

/// An error escaping a flow's logic.
#[derive(Debug, Clone, Error)]
#[error("flow fault: {message}")]
pub struct FlowFault {
    /// Human-readable fault description.
    pub message: String,
}

impl FlowFault {
    /// Creates a fault with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&str> for FlowFault {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for FlowFault {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// The resumable unit of computation behind a flow.
///
/// Implementations keep their own suspension state in fields and must be
/// restartable: the engine re-creates the logic from its factory on
/// every restart, so a fresh instance always begins at `Started`.
pub trait FlowLogic: Send {
    /// Advances the computation and returns the next placed-bid set.
    ///
    /// # Errors
    ///
    /// A [`FlowFault`] invokes the engine's error boundary.
    fn step(&mut self, cx: &mut FlowContext<'_>, input: FlowInput) -> Result<FlowStep, FlowFault>;
}

impl<F> FlowLogic for F
where
    F: FnMut(&mut FlowContext<'_>, FlowInput) -> Result<FlowStep, FlowFault> + Send,
{
    fn step(&mut self, cx: &mut FlowContext<'_>, input: FlowInput) -> Result<FlowStep, FlowFault> {
        self(cx, input)
    }
}

/// Shared constructor for a flow's logic, invoked on creation and on
/// every restart.
pub type FlowFactory = Arc<dyn Fn() -> Box<dyn FlowLogic> + Send + Sync>;
