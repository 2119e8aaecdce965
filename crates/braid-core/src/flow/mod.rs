//! Flows: resumable units of computation forming a single-owner tree.
//!
//! A flow repeatedly places an ordered set of bids and suspends until
//! the engine resumes it with the event that matched. Parents create
//! named children; ending or restarting a parent recursively ends its
//! subtree. Flows live in an arena keyed by path, so no flow holds a
//! reference to another.
//!
//! # Flow Lifecycle
//!
//! ```text
//!            flow(id, factory)
//!                  │
//!                  ▼
//!  ┌──────────► enabled ── step ──► suspended-on-bids
//!  │                │                     │
//!  │ re-enable      │ disable             │ Done / fault-at-start
//!  │                ▼                     ▼
//!  └──────────── disabled               ended (inert)
//! ```

mod context;
mod logic;

pub use context::{CleanupFn, FlowContext};
pub(crate) use context::FlowCommand;
pub use logic::{FlowFactory, FlowFault, FlowInput, FlowLogic, FlowStep};

use crate::bid::{Bid, Guard, PlacedBid};
use braid_types::{ActionId, BidId, EventId, FlowPath};
use serde_json::Value;
use std::collections::BTreeMap;

/// One flow temporarily owning an event's resolution.
///
/// Created when an extend bid intercepts an action; removed when the
/// extending flow resolves or aborts it, or when a newer action on the
/// event supersedes it. At most one pending extend exists per event.
#[derive(Clone, Debug)]
pub struct PendingExtend {
    /// The intercepted event.
    pub event: EventId,
    /// The flow whose extend bid intercepted.
    pub extending_flow: FlowPath,
    /// The intercepting extend bid.
    pub extend_bid: PlacedBid,
    /// The held value.
    pub value: ExtendedValue,
    /// The bids the intercepted action had matched; their owners are
    /// resumed when the extend settles.
    pub intercepted: Vec<PlacedBid>,
    /// The action that created this extend. A different action on the
    /// same event aborts a stale pending extend.
    pub created_by: ActionId,
}

/// The value a pending extend holds.
#[derive(Clone, Debug)]
pub enum ExtendedValue {
    /// A settled payload, available to the extending flow.
    Resolved(Value),
    /// The intercepted payload is an unsettled async operation; the
    /// extending flow stays suspended until it settles.
    Pending,
}

/// A given bid that activated on a valid value.
///
/// While active, every committed value on the event is re-checked; a
/// value the guard rejects restarts the owning flow.
#[derive(Clone)]
pub(crate) struct ActiveGiven {
    pub event: EventId,
    pub bid: BidId,
    pub guard: Option<Guard>,
}

/// One node of the flow tree.
pub(crate) struct Flow {
    pub path: FlowPath,
    pub factory: FlowFactory,
    pub logic: Box<dyn FlowLogic>,
    pub signature: Value,
    /// Currently placed bids, in yield order.
    pub placed: Vec<PlacedBid>,
    /// Child segment names in creation order.
    pub children: Vec<String>,
    pub pending_requests: BTreeMap<EventId, PlacedBid>,
    pub pending_extends: BTreeMap<EventId, PendingExtend>,
    pub enabled: bool,
    pub ended: bool,
    /// Yielded no bids; stays suspended until external intervention.
    pub parked: bool,
    pub next_bid: BidId,
    /// Dedupe guard: at most one resume per action id.
    pub latest_action: Option<ActionId>,
    /// Whether the flow ever progressed past its first placement. The
    /// error boundary ends never-progressed flows instead of restarting.
    pub progressed: bool,
    pub cleanups: Vec<CleanupFn>,
    pub active_givens: Vec<ActiveGiven>,
}

impl Flow {
    pub fn new(path: FlowPath, factory: FlowFactory, signature: Value) -> Self {
        let logic = factory();
        Self {
            path,
            factory,
            logic,
            signature,
            placed: Vec::new(),
            children: Vec::new(),
            pending_requests: BTreeMap::new(),
            pending_extends: BTreeMap::new(),
            enabled: true,
            ended: false,
            parked: false,
            next_bid: BidId::default(),
            latest_action: None,
            progressed: false,
            cleanups: Vec::new(),
            active_givens: Vec::new(),
        }
    }

    /// Replaces the placed-bid set with a fresh yield.
    ///
    /// Bid ids continue monotonically (they reset only on restart). A
    /// pending request whose event is requested again carries its
    /// correlation id over to the new placed bid; pending requests whose
    /// event is no longer requested are dropped and returned so the
    /// engine can log the cancellations.
    pub fn place(&mut self, bids: Vec<Bid>) -> Vec<PlacedBid> {
        self.placed.clear();
        self.parked = bids.is_empty();
        for bid in bids {
            let id = self.next_bid;
            self.next_bid = self.next_bid.next();
            let request_action = if bid.kind.is_request_like() {
                self.pending_requests.get(&bid.event).and_then(|p| p.request_action)
            } else {
                None
            };
            self.placed.push(PlacedBid {
                bid,
                id,
                flow: self.path.clone(),
                request_action,
            });
        }

        // A pending request survives only while an equivalent bid is
        // still placed.
        let repeated: Vec<EventId> = self
            .placed
            .iter()
            .filter(|p| p.bid.kind.is_request_like())
            .map(|p| p.event().clone())
            .collect();
        let stale: Vec<EventId> = self
            .pending_requests
            .keys()
            .filter(|event| !repeated.contains(event))
            .cloned()
            .collect();
        let mut cancelled = Vec::with_capacity(stale.len());
        for event in stale {
            if let Some(pending) = self.pending_requests.remove(&event) {
                cancelled.push(pending);
            }
        }
        // Point surviving entries at the freshly placed bids.
        for placed in &self.placed {
            if placed.bid.kind.is_request_like() {
                if let Some(entry) = self.pending_requests.get_mut(placed.event()) {
                    *entry = placed.clone();
                }
            }
        }
        cancelled
    }

    /// Runs and clears the epoch cleanup callbacks.
    pub fn run_cleanups(&mut self) {
        for cleanup in self.cleanups.drain(..) {
            cleanup();
        }
    }

    /// Resets to a freshly constructed state for a restart. Returns the
    /// cancelled pending requests. Pending extends are kept or drained
    /// into the return value's second half depending on `keep_extends`.
    pub fn reset(&mut self, keep_extends: bool) -> (Vec<PlacedBid>, Vec<PendingExtend>) {
        self.run_cleanups();
        let cancelled = std::mem::take(&mut self.pending_requests)
            .into_values()
            .collect();
        let orphaned = if keep_extends {
            Vec::new()
        } else {
            std::mem::take(&mut self.pending_extends).into_values().collect()
        };
        self.logic = (self.factory)();
        self.placed.clear();
        self.parked = false;
        self.next_bid = BidId::default();
        self.latest_action = None;
        self.progressed = false;
        self.active_givens.clear();
        (cancelled, orphaned)
    }

    /// Marks the flow ended and inert. Returns cancelled pending
    /// requests and, unless kept, the orphaned pending extends.
    pub fn finish(&mut self, keep_extends: bool) -> (Vec<PlacedBid>, Vec<PendingExtend>) {
        self.run_cleanups();
        self.ended = true;
        self.parked = false;
        self.placed.clear();
        self.active_givens.clear();
        let cancelled = std::mem::take(&mut self.pending_requests)
            .into_values()
            .collect();
        let orphaned = if keep_extends {
            Vec::new()
        } else {
            std::mem::take(&mut self.pending_extends).into_values().collect()
        };
        (cancelled, orphaned)
    }

    /// Excludes the flow from aggregation, cancelling pending requests
    /// but keeping placed bids, logic state, and pending extends.
    pub fn disable(&mut self) -> Vec<PlacedBid> {
        self.enabled = false;
        std::mem::take(&mut self.pending_requests)
            .into_values()
            .collect()
    }

    /// Returns `true` if this flow's bids participate in aggregation.
    pub fn participates(&self) -> bool {
        self.enabled && !self.ended
    }

    /// Registers a child segment if it is new, preserving creation
    /// order.
    pub fn register_child(&mut self, id: &str) {
        if !self.children.iter().any(|c| c == id) {
            self.children.push(id.to_string());
        }
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("path", &self.path)
            .field("placed", &self.placed.len())
            .field("children", &self.children)
            .field("enabled", &self.enabled)
            .field("ended", &self.ended)
            .field("parked", &self.parked)
            .finish()
    }
}

/// Path-keyed arena owning every flow in one engine's tree.
#[derive(Default)]
pub(crate) struct FlowArena {
    flows: BTreeMap<FlowPath, Flow>,
}

impl FlowArena {
    pub fn new() -> Self {
        Self {
            flows: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, flow: Flow) {
        self.flows.insert(flow.path.clone(), flow);
    }

    pub fn contains(&self, path: &FlowPath) -> bool {
        self.flows.contains_key(path)
    }

    pub fn get(&self, path: &FlowPath) -> Option<&Flow> {
        self.flows.get(path)
    }

    pub fn get_mut(&mut self, path: &FlowPath) -> Option<&mut Flow> {
        self.flows.get_mut(path)
    }

    /// Takes a flow out for a step; must be followed by [`put`](Self::put).
    pub fn take(&mut self, path: &FlowPath) -> Option<Flow> {
        self.flows.remove(path)
    }

    pub fn put(&mut self, flow: Flow) {
        self.flows.insert(flow.path.clone(), flow);
    }

    pub fn remove(&mut self, path: &FlowPath) -> Option<Flow> {
        self.flows.remove(path)
    }

    /// Returns the subtree rooted at `path` in depth-first creation
    /// order, `path` first.
    pub fn subtree(&self, path: &FlowPath) -> Vec<FlowPath> {
        let mut out = Vec::new();
        self.collect_subtree(path, &mut out);
        out
    }

    fn collect_subtree(&self, path: &FlowPath, out: &mut Vec<FlowPath>) {
        let Some(flow) = self.flows.get(path) else {
            return;
        };
        out.push(path.clone());
        for child in &flow.children {
            self.collect_subtree(&path.child(child.clone()), out);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flow> {
        self.flows.values()
    }

    pub fn paths(&self) -> Vec<FlowPath> {
        self.flows.keys().cloned().collect()
    }
}
