//! Flow lifecycle: children, disable/re-enable, restart on changed
//! signature, cleanup callbacks.

use braid_core::bid::{ask_for, request, wait_for};
use braid_core::prelude::*;
use braid_core::testing::{contains_kind, park, place, EngineHarness, ScriptedFlow};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Root that forwards every "control" dispatch to a handler closure.
fn controller<F>(on_control: F) -> impl Fn() -> Box<dyn FlowLogic> + Send + Sync
where
    F: Fn(&mut FlowContext<'_>, serde_json::Value) + Send + Sync + Clone + 'static,
{
    move || {
        let on_control = on_control.clone();
        Box::new(move |cx: &mut FlowContext<'_>, input: FlowInput| match input {
            FlowInput::Started => {
                cx.flow("worker", || {
                    ScriptedFlow::new()
                        .step(|_cx, _input| place(vec![wait_for("tick")]))
                        .step(|_cx, _input| place(vec![request("ticked", json!(true))]))
                        .step(|_cx, _input| park())
                        .into_logic()
                });
                Ok(FlowStep::Bids(vec![ask_for("control")]))
            }
            FlowInput::Advanced { payload, .. } => {
                on_control(cx, payload);
                Ok(FlowStep::Bids(vec![ask_for("control")]))
            }
            FlowInput::Rejected { .. } => Err(FlowFault::new("unexpected rejection")),
        })
    }
}

#[test]
fn disabled_flow_is_paused_not_ended() {
    let mut harness = EngineHarness::start(controller(|cx, payload| {
        match payload.as_str() {
            Some("disable") => cx.disable_child("worker"),
            Some("enable") => cx.flow("worker", || {
                ScriptedFlow::new()
                    .step(|_cx, _input| place(vec![wait_for("tick")]))
                    .step(|_cx, _input| place(vec![request("ticked", json!(true))]))
                    .step(|_cx, _input| park())
                    .into_logic()
            }),
            _ => {}
        }
    }));
    let _ = harness.take_reactions();

    // Disabled: the worker's waitFor leaves aggregation.
    assert!(harness.dispatch("control", json!("disable")).is_processed());
    let snapshot = harness.engine().ordered_requests_and_current_bids();
    assert!(snapshot.for_event(&EventId::new("tick")).is_none());

    // Re-enabling resumes exactly where it left off: the same waitFor
    // placement rejoins aggregation without a restart.
    assert!(harness.dispatch("control", json!("enable")).is_processed());
    let reactions = harness.take_reactions();
    assert!(contains_kind(&reactions, |k| matches!(
        k,
        ReactionKind::FlowEnabled
    )));
    assert!(!contains_kind(&reactions, |k| matches!(
        k,
        ReactionKind::FlowRestarted { .. }
    )));

    // The preserved suspension rejoined aggregation.
    assert!(harness
        .engine()
        .ordered_requests_and_current_bids()
        .for_event(&EventId::new("tick"))
        .is_some());
}

#[test]
fn ending_a_child_makes_it_inert() {
    let mut harness = EngineHarness::start(controller(|cx, payload| {
        match payload.as_str() {
            Some("end") => cx.end_child("worker"),
            Some("recreate") => cx.flow("worker", || {
                ScriptedFlow::new()
                    .step(|_cx, _input| place(vec![request("revived", json!(true))]))
                    .step(|_cx, _input| park())
                    .into_logic()
            }),
            _ => {}
        }
    }));
    let _ = harness.take_reactions();

    assert!(harness.dispatch("control", json!("end")).is_processed());
    let reactions = harness.take_reactions();
    assert!(contains_kind(&reactions, |k| matches!(
        k,
        ReactionKind::FlowEnded
    )));

    // An ended flow is inert: re-creating it under the same id is a
    // no-op while the parent lives.
    assert!(harness.dispatch("control", json!("recreate")).is_processed());
    assert_eq!(harness.value("revived"), None);
}

#[test]
fn changed_signature_restarts_the_child() {
    let restarts = Arc::new(AtomicUsize::new(0));
    let restarts_outer = Arc::clone(&restarts);

    let mut harness = EngineHarness::start(move || {
        let restarts = Arc::clone(&restarts_outer);
        Box::new(move |cx: &mut FlowContext<'_>, input: FlowInput| {
            let generation = match &input {
                FlowInput::Started => 0,
                FlowInput::Advanced { payload, .. } => payload.as_i64().unwrap_or(0),
                FlowInput::Rejected { .. } => return Err(FlowFault::new("unexpected")),
            };
            let restarts = Arc::clone(&restarts);
            cx.flow_keyed("worker", json!(generation), move || {
                let restarts = Arc::clone(&restarts);
                ScriptedFlow::new()
                    .step(move |_cx, _input| {
                        restarts.fetch_add(1, Ordering::SeqCst);
                        place(vec![wait_for("never")])
                    })
                    .into_logic()
            });
            Ok(FlowStep::Bids(vec![ask_for("generation")]))
        })
    });

    assert_eq!(restarts.load(Ordering::SeqCst), 1);

    // Same signature: the child is reused.
    assert!(harness.dispatch("generation", json!(0)).is_processed());
    assert_eq!(restarts.load(Ordering::SeqCst), 1);

    // Different signature: the child restarts with the new factory.
    assert!(harness.dispatch("generation", json!(1)).is_processed());
    assert_eq!(restarts.load(Ordering::SeqCst), 2);
    let reactions = harness.take_reactions();
    assert!(contains_kind(&reactions, |k| matches!(
        k,
        ReactionKind::FlowRestarted {
            reason: RestartReason::SignatureChanged
        }
    )));
}

#[test]
fn cleanup_runs_when_the_epoch_ends() {
    let cleanups = Arc::new(AtomicUsize::new(0));
    let cleanups_outer = Arc::clone(&cleanups);

    let mut harness = EngineHarness::start(move || {
        let cleanups = Arc::clone(&cleanups_outer);
        ScriptedFlow::new()
            .step(move |cx, _input| {
                let cleanups = Arc::clone(&cleanups);
                cx.cleanup(move || {
                    cleanups.fetch_add(1, Ordering::SeqCst);
                });
                place(vec![ask_for("go")])
            })
            .step(|_cx, _input| park())
            .into_logic()
    });

    // Still suspended in the same epoch: the cleanup has not run.
    assert_eq!(cleanups.load(Ordering::SeqCst), 0);

    // Progressing ends the epoch.
    assert!(harness.dispatch("go", json!(null)).is_processed());
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[test]
fn cleanup_runs_on_end() {
    let cleanups = Arc::new(AtomicUsize::new(0));
    let cleanups_outer = Arc::clone(&cleanups);

    let mut harness = EngineHarness::start(move || {
        let cleanups = Arc::clone(&cleanups_outer);
        Box::new(move |cx: &mut FlowContext<'_>, input: FlowInput| match input {
            FlowInput::Started => {
                let cleanups = Arc::clone(&cleanups);
                cx.flow("holder", move || {
                    let cleanups = Arc::clone(&cleanups);
                    ScriptedFlow::new()
                        .step(move |cx, _input| {
                            let cleanups = Arc::clone(&cleanups);
                            cx.cleanup(move || {
                                cleanups.fetch_add(1, Ordering::SeqCst);
                            });
                            place(vec![wait_for("never")])
                        })
                        .into_logic()
                });
                Ok(FlowStep::Bids(vec![ask_for("stop")]))
            }
            FlowInput::Advanced { .. } => {
                cx.end_child("holder");
                Ok(FlowStep::Bids(vec![ask_for("stop")]))
            }
            FlowInput::Rejected { .. } => Err(FlowFault::new("unexpected")),
        })
    });

    assert_eq!(cleanups.load(Ordering::SeqCst), 0);
    assert!(harness.dispatch("stop", json!(null)).is_processed());
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}
