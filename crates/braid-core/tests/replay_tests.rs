//! Record/replay: the engine log as the deterministic replay contract.

use braid_core::bid::{ask_for, request, request_with, PayloadOutcome, PendingWork};
use braid_core::prelude::*;
use braid_core::testing::{place, EngineHarness, ScriptedFlow};
use serde_json::json;

fn recorded_tree() -> impl Fn() -> Box<dyn FlowLogic> + Send + Sync {
    || {
        ScriptedFlow::new()
            .step(|_cx, _input| place(vec![request("setup", json!(1))]))
            .step(|_cx, _input| place(vec![ask_for("user-input")]))
            .step(|_cx, input| {
                let FlowInput::Advanced { payload, .. } = input else {
                    return Err(FlowFault::new("expected input"));
                };
                place(vec![request("echo", payload)])
            })
            .step(|_cx, _input| place(vec![]))
            .into_logic()
    }
}

fn record() -> Vec<LoggedAction> {
    let mut harness = EngineHarness::start(recorded_tree());
    assert!(harness.dispatch("user-input", json!("hello")).is_processed());
    let steps = harness.take_steps();
    assert_eq!(steps.len(), 3);
    steps
}

#[test]
fn clean_replay_reproduces_the_recording() {
    let recording = record();

    let mut engine = Engine::new(EngineConfig::named("replay"));
    engine
        .set_replay(ReplaySession::new(recording))
        .expect("fresh engine");
    engine.start("root", recorded_tree()).expect("fresh engine");

    let report = engine.finish_replay().expect("session attached");
    assert!(report.is_clean(), "unexpected divergence: {report:?}");
    assert_eq!(engine.event_value(&EventId::new("echo")), Some(&json!("hello")));
}

#[test]
fn tampered_recording_reports_a_mismatch() {
    let mut recording = record();
    // Drop one recorded reaction; the replayed run will emit it.
    recording[0].reactions.pop();

    let mut engine = Engine::new(EngineConfig::named("replay"));
    engine
        .set_replay(ReplaySession::new(recording))
        .expect("fresh engine");
    engine.start("root", recorded_tree()).expect("fresh engine");

    let report = engine.finish_replay().expect("session attached");
    assert!(!report.is_clean());
    assert_eq!(report.mismatches[0].step, 0);
}

#[test]
fn replay_mocks_async_requests_and_feeds_settlements() {
    let tree = || {
        ScriptedFlow::new()
            .step(|_cx, _input| {
                place(vec![request_with("load", |_| {
                    PayloadOutcome::Pending(PendingWork::detached())
                })])
            })
            .step(|_cx, input| {
                let FlowInput::Advanced { payload, .. } = input else {
                    return Err(FlowFault::new("expected resolution"));
                };
                place(vec![request("loaded", payload)])
            })
            .step(|_cx, _input| place(vec![]))
            .into_logic()
    };

    // Live run, settling the request by hand.
    let mut harness = EngineHarness::start(tree);
    let request_action = harness.pending_request_action("load").expect("pending");
    assert!(harness
        .resolve("load", request_action, json!("data"))
        .is_processed());
    let recording = harness.take_steps();
    assert_eq!(recording.len(), 3);

    // Replay: the async request is mocked as never-settling work and
    // the recorded settlement arrives as the next replayed action.
    let mut engine = Engine::new(EngineConfig::named("replay"));
    engine
        .set_replay(ReplaySession::new(recording))
        .expect("fresh engine");
    engine.start("root", tree).expect("fresh engine");

    let report = engine.finish_replay().expect("session attached");
    assert!(report.is_clean(), "unexpected divergence: {report:?}");
    assert_eq!(
        engine.event_value(&EventId::new("loaded")),
        Some(&json!("data"))
    );
    // The mock registered no executable work.
    assert!(engine.take_pending_work().is_empty());
}

#[test]
fn replay_cannot_attach_twice_or_after_start() {
    let mut engine = Engine::new(EngineConfig::default());
    engine
        .set_replay(ReplaySession::new(Vec::new()))
        .expect("first attach");
    assert_eq!(
        engine.set_replay(ReplaySession::new(Vec::new())),
        Err(EngineError::ReplayAlreadyAttached)
    );

    let mut engine = Engine::new(EngineConfig::default());
    engine.start("root", recorded_tree()).expect("fresh engine");
    assert_eq!(
        engine.set_replay(ReplaySession::new(Vec::new())),
        Err(EngineError::AlreadyStarted)
    );
}
