//! Driver integration: async payload execution and external dispatch.

use braid_core::bid::{ask_for, request, request_with, PayloadOutcome, PendingWork};
use braid_core::prelude::*;
use braid_core::testing::{park, place, ScriptedFlow};
use braid_runtime::Driver;
use serde_json::json;
use std::time::Duration;

fn started_engine<F>(factory: F) -> Engine
where
    F: Fn() -> Box<dyn FlowLogic> + Send + Sync + 'static,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let mut engine = Engine::new(EngineConfig::named("driver-test"));
    engine.start("root", factory).expect("fresh engine");
    engine
}

/// Gives spawned settlement tasks time to land in the inbox.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn async_payload_resolves_through_the_driver() {
    let engine = started_engine(|| {
        ScriptedFlow::new()
            .step(|_cx, _input| {
                place(vec![request_with("load", |_| {
                    PayloadOutcome::Pending(PendingWork::new(async { Ok(json!("data")) }))
                })])
            })
            .step(|_cx, input| {
                let FlowInput::Advanced { payload, .. } = input else {
                    return Err(FlowFault::new("expected resolution"));
                };
                place(vec![request("loaded", payload)])
            })
            .step(|_cx, _input| park())
            .into_logic()
    });

    let (driver, handle) = Driver::new(engine);
    let task = tokio::spawn(driver.run());

    settle().await;
    handle.shutdown().await.expect("driver alive");
    let engine = task.await.expect("driver task");

    assert_eq!(engine.event_value(&EventId::new("load")), Some(&json!("data")));
    assert_eq!(
        engine.event_value(&EventId::new("loaded")),
        Some(&json!("data"))
    );
}

#[tokio::test]
async fn rejected_payload_reaches_the_catch_path() {
    let engine = started_engine(|| {
        ScriptedFlow::new()
            .step(|_cx, _input| {
                place(vec![request_with("load", |_| {
                    PayloadOutcome::Pending(PendingWork::new(async { Err(json!("boom")) }))
                })])
            })
            .step(|_cx, input| match input {
                FlowInput::Rejected { error, .. } => place(vec![request("fallback", error)]),
                _ => Err(FlowFault::new("expected rejection")),
            })
            .step(|_cx, _input| park())
            .into_logic()
    });

    let (driver, handle) = Driver::new(engine);
    let task = tokio::spawn(driver.run());

    settle().await;
    handle.shutdown().await.expect("driver alive");
    let engine = task.await.expect("driver task");

    assert_eq!(engine.event_value(&EventId::new("load")), None);
    assert_eq!(
        engine.event_value(&EventId::new("fallback")),
        Some(&json!("boom"))
    );
}

#[tokio::test]
async fn dispatch_through_the_handle_reports_the_outcome() {
    let engine = started_engine(|| {
        ScriptedFlow::new()
            .step(|_cx, _input| place(vec![ask_for("ping")]))
            .step(|_cx, _input| place(vec![request("pong", json!(true))]))
            .step(|_cx, _input| park())
            .into_logic()
    });

    let (driver, handle) = Driver::new(engine);
    let task = tokio::spawn(driver.run());

    let outcome = handle.dispatch("ping", json!(1)).await.expect("driver alive");
    assert!(outcome.is_processed());

    // No askFor bid matches an unknown event.
    let outcome = handle
        .dispatch("unknown", json!(1))
        .await
        .expect("driver alive");
    assert!(matches!(
        outcome,
        DispatchOutcome::Invalid {
            reason: InvalidBidReason::NotConnected { .. }
        }
    ));

    handle.shutdown().await.expect("driver alive");
    let engine = task.await.expect("driver task");
    assert_eq!(engine.event_value(&EventId::new("pong")), Some(&json!(true)));
}

#[tokio::test]
async fn chained_async_requests_settle_in_order() {
    let engine = started_engine(|| {
        ScriptedFlow::new()
            .step(|_cx, _input| {
                place(vec![request_with("first", |_| {
                    PayloadOutcome::Pending(PendingWork::new(async { Ok(json!(1)) }))
                })])
            })
            .step(|_cx, _input| {
                place(vec![request_with("second", |_| {
                    PayloadOutcome::Pending(PendingWork::new(async { Ok(json!(2)) }))
                })])
            })
            .step(|_cx, _input| park())
            .into_logic()
    });

    let (driver, handle) = Driver::new(engine);
    let task = tokio::spawn(driver.run());

    settle().await;
    handle.shutdown().await.expect("driver alive");
    let engine = task.await.expect("driver task");

    assert_eq!(engine.event_value(&EventId::new("first")), Some(&json!(1)));
    assert_eq!(engine.event_value(&EventId::new("second")), Some(&json!(2)));
}
