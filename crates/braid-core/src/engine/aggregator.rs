//! Bid aggregation: the per-cycle view of every placed bid.
//!
//! Aggregation walks the flow tree depth-first and flattens every placed
//! bid into one priority-ordered list, then buckets them per event. The
//! result is a derived cache: it is thrown away and rebuilt after every
//! processed action, so each scheduling step sees fully up-to-date
//! state.
//!
//! # Priority Order
//!
//! The flat list is highest-priority first:
//!
//! 1. children outrank their parent,
//! 2. later-registered siblings outrank earlier ones,
//! 3. within one flow's yield, earlier array position outranks later.
//!
//! Aggregation is a pure read except for lazily connecting an event the
//! first time any bid references it.

use crate::bid::{BidKind, PlacedBid};
use crate::event::EventRegistry;
use crate::flow::{FlowArena, PendingExtend};
use braid_types::{EventId, FlowPath};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Every currently placed bid for one event, bucketed by kind, plus the
/// event's single pending request and pending extend.
#[derive(Debug, Clone, Default)]
pub struct CurrentBidsForEvent {
    /// The event this view describes.
    pub event: EventId,
    /// All bids for the event in flat priority order, regardless of
    /// kind.
    pub all: Vec<PlacedBid>,
    /// Request and trigger bids.
    pub request: Vec<PlacedBid>,
    /// WaitFor bids.
    pub wait_for: Vec<PlacedBid>,
    /// AskFor bids.
    pub ask_for: Vec<PlacedBid>,
    /// Extend bids.
    pub extend: Vec<PlacedBid>,
    /// Validate bids.
    pub validate: Vec<PlacedBid>,
    /// Block bids.
    pub block: Vec<PlacedBid>,
    /// Given bids.
    pub given: Vec<PlacedBid>,
    /// The in-flight async request for this event, if any.
    pub pending_request: Option<PlacedBid>,
    /// The active extend interception for this event, if any.
    pub pending_extend: Option<PendingExtend>,
}

impl CurrentBidsForEvent {
    pub(crate) fn new(event: EventId) -> Self {
        Self {
            event,
            ..Self::default()
        }
    }

    /// Returns `true` if the event has a pending request or pending
    /// extend. A pending event accepts no new requests or dispatches.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending_request.is_some() || self.pending_extend.is_some()
    }

    fn bucket(&mut self, placed: &PlacedBid) {
        self.all.push(placed.clone());
        match placed.bid.kind {
            BidKind::Request { .. } | BidKind::Trigger { .. } => self.request.push(placed.clone()),
            BidKind::WaitFor => self.wait_for.push(placed.clone()),
            BidKind::AskFor => self.ask_for.push(placed.clone()),
            BidKind::Extend => self.extend.push(placed.clone()),
            BidKind::Validate => self.validate.push(placed.clone()),
            BidKind::Block => self.block.push(placed.clone()),
            BidKind::Given => self.given.push(placed.clone()),
        }
    }
}

/// The full aggregation result for one scheduling cycle.
#[derive(Debug, Default)]
pub struct OrderedRequestsAndCurrentBids {
    /// Every request and trigger bid across the tree, highest priority
    /// first.
    pub ordered_requests: Vec<PlacedBid>,
    /// Every askFor bid across the tree, highest priority first.
    pub ordered_ask_for: Vec<PlacedBid>,
    /// Per-event bid buckets.
    pub current: BTreeMap<EventId, CurrentBidsForEvent>,
}

impl OrderedRequestsAndCurrentBids {
    /// Returns the bucket view for one event, if any bid or pending
    /// state references it.
    #[must_use]
    pub fn for_event(&self, event: &EventId) -> Option<&CurrentBidsForEvent> {
        self.current.get(event)
    }

    /// Structural fingerprint for snapshot comparison: everything that
    /// identifies the aggregation except the closures it holds.
    #[must_use]
    pub fn fingerprint(&self) -> Value {
        fn describe(placed: &PlacedBid) -> Value {
            json!({
                "event": placed.event(),
                "kind": placed.kind_name(),
                "flow": placed.flow,
                "bid": placed.id,
                "requestAction": placed.request_action,
            })
        }
        json!({
            "orderedRequests": self.ordered_requests.iter().map(describe).collect::<Vec<_>>(),
            "orderedAskFor": self.ordered_ask_for.iter().map(describe).collect::<Vec<_>>(),
            "events": self
                .current
                .values()
                .map(|c| {
                    json!({
                        "event": c.event,
                        "bids": c.all.iter().map(describe).collect::<Vec<_>>(),
                        "pendingRequest": c.pending_request.as_ref().map(describe),
                        "pendingExtend": c.pending_extend.as_ref().map(|pe| {
                            json!({
                                "flow": pe.extending_flow,
                                "createdBy": pe.created_by,
                            })
                        }),
                    })
                })
                .collect::<Vec<_>>(),
        })
    }
}

/// Rebuilds the aggregation from the flow tree.
pub(crate) fn aggregate(
    arena: &FlowArena,
    root: Option<&FlowPath>,
    events: &mut EventRegistry,
) -> OrderedRequestsAndCurrentBids {
    let mut agg = OrderedRequestsAndCurrentBids::default();
    let mut flat: Vec<PlacedBid> = Vec::new();
    if let Some(root) = root {
        collect(arena, root, &mut flat);
    }

    for placed in &flat {
        events.connect(placed.event());
        agg.current
            .entry(placed.event().clone())
            .or_insert_with(|| CurrentBidsForEvent::new(placed.event().clone()))
            .bucket(placed);
        if placed.bid.kind.is_request_like() {
            agg.ordered_requests.push(placed.clone());
        }
        if matches!(placed.bid.kind, BidKind::AskFor) {
            agg.ordered_ask_for.push(placed.clone());
        }
    }

    // Pending state survives disablement and (for extends) even the end
    // of the owning flow, so every arena node contributes.
    for flow in arena.iter() {
        for (event, pending) in &flow.pending_requests {
            events.connect(event);
            agg.current
                .entry(event.clone())
                .or_insert_with(|| CurrentBidsForEvent::new(event.clone()))
                .pending_request = Some(pending.clone());
        }
        for (event, extend) in &flow.pending_extends {
            events.connect(event);
            agg.current
                .entry(event.clone())
                .or_insert_with(|| CurrentBidsForEvent::new(event.clone()))
                .pending_extend = Some(extend.clone());
        }
    }

    relate_validation_events(&flat, events);
    agg
}

/// Depth-first bid collection: children first (reverse creation order,
/// so later-registered siblings come out first), then the flow's own
/// bids in yield order. Disabling a flow hides its whole subtree.
fn collect(arena: &FlowArena, path: &FlowPath, out: &mut Vec<PlacedBid>) {
    let Some(flow) = arena.get(path) else {
        return;
    };
    if !flow.participates() {
        return;
    }
    for child in flow.children.iter().rev() {
        collect(arena, &path.child(child.clone()), out);
    }
    out.extend(flow.placed.iter().cloned());
}

/// Recomputes each event's related-validation set: events that share a
/// validating flow may all change verdicts when that flow progresses.
fn relate_validation_events(flat: &[PlacedBid], events: &mut EventRegistry) {
    let mut per_flow: BTreeMap<FlowPath, BTreeSet<EventId>> = BTreeMap::new();
    for placed in flat {
        if matches!(placed.bid.kind, BidKind::Validate | BidKind::Given) {
            per_flow
                .entry(placed.flow.clone())
                .or_default()
                .insert(placed.event().clone());
        }
    }
    let mut related: BTreeMap<EventId, BTreeSet<EventId>> = BTreeMap::new();
    for group in per_flow.values() {
        for event in group {
            let others = group.iter().filter(|e| *e != event).cloned();
            related.entry(event.clone()).or_default().extend(others);
        }
    }
    for (event, set) in related {
        events.set_related_validation(&event, set);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bid::{request, Bid};
    use crate::flow::{Flow, FlowContext, FlowInput, FlowStep};
    use braid_types::EngineId;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn flow_with(path: FlowPath, bids: Vec<Bid>) -> Flow {
        let factory = Arc::new(|| {
            Box::new(
                |_cx: &mut FlowContext<'_>,
                 _input: FlowInput|
                 -> Result<FlowStep, crate::flow::FlowFault> { Ok(FlowStep::Park) },
            ) as Box<dyn crate::flow::FlowLogic>
        });
        let mut flow = Flow::new(path, factory, Value::Null);
        flow.place(bids);
        flow
    }

    fn tree() -> (FlowArena, FlowPath) {
        let root_path = FlowPath::root("r");
        let mut root = flow_with(root_path.clone(), vec![request("e", json!("root"))]);
        root.register_child("a");
        root.register_child("b");
        let mut arena = FlowArena::new();
        arena.insert(root);
        arena.insert(flow_with(root_path.child("a"), vec![request("e", json!("a"))]));
        arena.insert(flow_with(root_path.child("b"), vec![request("e", json!("b"))]));
        (arena, root_path)
    }

    #[test]
    fn children_and_later_siblings_outrank_earlier_ones() {
        let (arena, root_path) = tree();
        let mut events = EventRegistry::new(EngineId::new());
        let agg = aggregate(&arena, Some(&root_path), &mut events);

        let order: Vec<String> = agg
            .ordered_requests
            .iter()
            .map(|p| p.flow.to_string())
            .collect();
        assert_eq!(order, vec!["r/b", "r/a", "r"]);
        // Aggregation lazily connected the event.
        assert!(events.is_connected(&EventId::new("e")));
    }

    #[test]
    fn disabling_a_flow_hides_its_subtree() {
        let (mut arena, root_path) = tree();
        arena
            .get_mut(&root_path.child("b"))
            .expect("child b")
            .disable();

        let mut events = EventRegistry::new(EngineId::new());
        let agg = aggregate(&arena, Some(&root_path), &mut events);
        let order: Vec<String> = agg
            .ordered_requests
            .iter()
            .map(|p| p.flow.to_string())
            .collect();
        assert_eq!(order, vec!["r/a", "r"]);
    }

    #[test]
    fn aggregation_without_a_root_is_empty() {
        let mut events = EventRegistry::new(EngineId::new());
        let agg = aggregate(&FlowArena::new(), None, &mut events);
        assert!(agg.ordered_requests.is_empty());
        assert!(agg.current.is_empty());
    }
}
