//! Priority and ordering guarantees of bid selection.

use braid_core::bid::{ask_for, request, trigger, validate, wait_for};
use braid_core::prelude::*;
use braid_core::testing::{contains_kind, done, park, place, EngineHarness, ScriptedFlow};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn earliest_bid_in_one_yield_wins() {
    let mut harness = EngineHarness::start(|| {
        ScriptedFlow::new()
            .step(|_cx, _input| {
                place(vec![request("e", json!("first")), request("e", json!("second"))])
            })
            .step(|_cx, _input| park())
            .into_logic()
    });

    assert_eq!(harness.value("e"), Some(json!("first")));
    let steps = harness.take_steps();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].action.payload(), Some(&json!("first")));
}

#[test]
fn invalid_earlier_bid_does_not_fall_through_in_same_yield() {
    let mut harness = EngineHarness::start(|| {
        ScriptedFlow::new()
            .step(|cx, _input| {
                cx.flow("validator", || {
                    ScriptedFlow::new()
                        .step(|_cx, _input| {
                            place(vec![validate("e", |v| (v.as_i64() != Some(1)).into())])
                        })
                        .into_logic()
                });
                cx.flow("requester", || {
                    ScriptedFlow::new()
                        .step(|_cx, _input| {
                            place(vec![request("e", json!(1)), request("e", json!(2))])
                        })
                        .step(|_cx, _input| park())
                        .into_logic()
                });
                park()
            })
            .into_logic()
    });

    // The earlier bid fails validation and its later sibling for the
    // same event must not be considered in the same pass.
    assert_eq!(harness.value("e"), None);
    assert!(harness.take_steps().is_empty());
}

#[test]
fn later_enabled_sibling_outranks_earlier_one() {
    let mut harness = EngineHarness::start(|| {
        ScriptedFlow::new()
            .step(|cx, _input| {
                cx.flow("first", || {
                    ScriptedFlow::new()
                        .step(|_cx, _input| place(vec![request("e", json!("low"))]))
                        .step(|_cx, _input| park())
                        .into_logic()
                });
                cx.flow("second", || {
                    ScriptedFlow::new()
                        .step(|_cx, _input| place(vec![request("e", json!("high"))]))
                        .step(|_cx, _input| park())
                        .into_logic()
                });
                park()
            })
            .into_logic()
    });

    let steps = harness.take_steps();
    assert_eq!(steps[0].action.payload(), Some(&json!("high")));
    assert_eq!(
        steps[0].action.flow(),
        &FlowPath::root("root").child("second")
    );
}

#[test]
fn dispatch_matches_the_later_enabled_ask_for() {
    let mut harness = EngineHarness::start(|| {
        ScriptedFlow::new()
            .step(|cx, _input| {
                cx.flow("first", || {
                    ScriptedFlow::new()
                        .step(|_cx, _input| place(vec![ask_for("e")]))
                        .step(|_cx, _input| park())
                        .into_logic()
                });
                cx.flow("second", || {
                    ScriptedFlow::new()
                        .step(|_cx, _input| place(vec![ask_for("e")]))
                        .step(|_cx, _input| park())
                        .into_logic()
                });
                park()
            })
            .into_logic()
    });

    assert!(harness.dispatch("e", json!(42)).is_processed());
    let steps = harness.take_steps();
    assert_eq!(steps.len(), 1);
    // The external action is attributed to the higher-priority bid.
    assert_eq!(
        steps[0].action.flow(),
        &FlowPath::root("root").child("second")
    );
}

#[test]
fn trigger_is_invalid_without_a_live_ask_for() {
    let harness = EngineHarness::start(|| {
        ScriptedFlow::new()
            .step(|_cx, _input| place(vec![trigger("e", json!(7))]))
            .step(|_cx, _input| park())
            .into_logic()
    });

    assert!(harness.value("e").is_none());
    assert_eq!(
        harness.engine().explain_request_bid(&trigger("e", json!(7))),
        Some(InvalidBidReason::NoAskForBid {
            event: EventId::new("e")
        })
    );
}

#[test]
fn trigger_fires_once_asked_for() {
    let mut harness = EngineHarness::start(|| {
        ScriptedFlow::new()
            .step(|cx, _input| {
                cx.flow("asker", || {
                    ScriptedFlow::new()
                        .step(|_cx, _input| place(vec![ask_for("e")]))
                        .step(|_cx, _input| park())
                        .into_logic()
                });
                cx.flow("trigger", || {
                    ScriptedFlow::new()
                        .step(|_cx, _input| place(vec![trigger("e", json!(7))]))
                        .step(|_cx, _input| park())
                        .into_logic()
                });
                park()
            })
            .into_logic()
    });

    assert_eq!(harness.value("e"), Some(json!(7)));
    let steps = harness.take_steps();
    assert_eq!(steps[0].action.flow(), &FlowPath::root("root").child("trigger"));
}

#[test]
fn flow_resumes_at_most_once_per_action() {
    let resumes = Arc::new(AtomicUsize::new(0));
    let resumes_in_flow = Arc::clone(&resumes);

    let mut harness = EngineHarness::start(move || {
        let resumes = Arc::clone(&resumes_in_flow);
        ScriptedFlow::new()
            .step(move |cx, _input| {
                let resumes = Arc::clone(&resumes);
                cx.flow("waiter", move || {
                    let resumes = Arc::clone(&resumes);
                    ScriptedFlow::new()
                        .step(|_cx, _input| place(vec![wait_for("e"), wait_for("e")]))
                        .step(move |_cx, _input| {
                            resumes.fetch_add(1, Ordering::SeqCst);
                            park()
                        })
                        .into_logic()
                });
                cx.flow("requester", || {
                    ScriptedFlow::new()
                        .step(|_cx, _input| place(vec![request("e", json!(1))]))
                        .step(|_cx, _input| park())
                        .into_logic()
                });
                park()
            })
            .into_logic()
    });

    assert_eq!(harness.value("e"), Some(json!(1)));
    // Two matching waitFor bids, one resume.
    assert_eq!(resumes.load(Ordering::SeqCst), 1);
    let reactions = harness.take_reactions();
    let progressed_waiter = reactions
        .iter()
        .filter(|r| {
            r.flow == FlowPath::root("root").child("waiter")
                && matches!(r.kind, ReactionKind::ProgressedOnBid { .. })
        })
        .count();
    assert_eq!(progressed_waiter, 1);
}

#[test]
fn aggregation_is_idempotent_without_actions() {
    let mut harness = EngineHarness::start(|| {
        ScriptedFlow::new()
            .step(|cx, _input| {
                cx.flow("asker", || {
                    ScriptedFlow::new()
                        .step(|_cx, _input| place(vec![ask_for("a"), wait_for("b")]))
                        .step(|_cx, _input| park())
                        .into_logic()
                });
                park()
            })
            .into_logic()
    });

    let before = harness
        .engine()
        .ordered_requests_and_current_bids()
        .fingerprint();
    // A run with nothing to do still rebuilds the aggregation.
    harness.engine_mut().run();
    let after = harness
        .engine()
        .ordered_requests_and_current_bids()
        .fingerprint();
    assert_eq!(before, after);
}

#[test]
fn ask_for_with_no_requester_is_served_by_dispatch() {
    let mut harness = EngineHarness::start(|| {
        ScriptedFlow::new()
            .step(|_cx, _input| place(vec![ask_for("input")]))
            .step(|_cx, _input| done())
            .into_logic()
    });

    // The bid is visible in the askFor snapshot.
    let askers = harness.engine().ask_for_bids();
    assert_eq!(askers.len(), 1);
    assert_eq!(askers[0].event(), &EventId::new("input"));

    // No flow requests the event; the external path serves it directly.
    assert!(harness.dispatch("input", json!("typed")).is_processed());
    assert_eq!(harness.value("input"), Some(json!("typed")));

    let reactions = harness.take_reactions();
    assert!(contains_kind(&reactions, |k| matches!(
        k,
        ReactionKind::FlowEnded
    )));
}
