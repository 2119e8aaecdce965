//! The driver task and its handle.
//!
//! # Architecture
//!
//! ```text
//!                            ┌───────────────────────────┐
//!                            │          Driver           │
//!                            │                           │
//! DriverHandle ──dispatch──► │  inbox ◄── mpsc           │
//!                            │     │                     │
//!                            │     ▼                     │
//!                            │  Engine::run()            │
//!                            │     │                     │
//!                            │     ▼                     │
//!                            │  take_pending_work()      │
//!                            │     │ spawn               │
//!                            │     ▼                     │
//!                            │  task ──settles──► inbox  │
//!                            └───────────────────────────┘
//! ```
//!
//! Every settlement carries the correlation id of the `requestedAsync`
//! action that registered it. A settlement arriving after its pending
//! request was cancelled is rejected by the engine as stale and simply
//! dropped; the task is never aborted.

use braid_core::{DispatchOutcome, Engine};
use braid_types::{ActionId, ErrorCode, EventId};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Inbox buffer size.
///
/// 64 inputs provides sufficient buffering for interactive workloads
/// while bounding memory per driver.
const INPUT_BUFFER_SIZE: usize = 64;

/// Driver layer errors.
///
/// | Variant | Code | Recoverable |
/// |---------|------|-------------|
/// | [`DriverError::ChannelClosed`] | `DRIVER_CHANNEL_CLOSED` | No |
/// | [`DriverError::ReplyDropped`] | `DRIVER_REPLY_DROPPED` | No |
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The driver task is gone; no more inputs can be delivered.
    #[error("driver channel closed")]
    ChannelClosed,

    /// The driver dropped the reply channel before answering.
    #[error("driver dropped the reply")]
    ReplyDropped,
}

impl ErrorCode for DriverError {
    fn code(&self) -> &'static str {
        match self {
            Self::ChannelClosed => "DRIVER_CHANNEL_CLOSED",
            Self::ReplyDropped => "DRIVER_REPLY_DROPPED",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// One input delivered to the driver's inbox.
#[derive(Debug)]
pub enum DriverInput {
    /// An external dispatch, with an optional outcome reply.
    Dispatch {
        /// The dispatched event.
        event: EventId,
        /// The dispatched value.
        payload: Value,
        /// Where to send the outcome, if the caller wants it.
        reply: Option<oneshot::Sender<DispatchOutcome>>,
    },
    /// An async payload settled successfully.
    Resolve {
        /// The requested event.
        event: EventId,
        /// Correlation id of the registering `requestedAsync` action.
        request_action: ActionId,
        /// The resolved value.
        payload: Value,
    },
    /// An async payload rejected.
    Reject {
        /// The requested event.
        event: EventId,
        /// Correlation id of the registering `requestedAsync` action.
        request_action: ActionId,
        /// The rejection error value.
        error: Value,
    },
    /// Stop the driver and return the engine.
    Shutdown,
}

/// Owns an engine and drives its async request payloads.
pub struct Driver {
    engine: Engine,
    inbox: mpsc::Receiver<DriverInput>,
    sender: mpsc::Sender<DriverInput>,
}

impl Driver {
    /// Wraps an engine, returning the driver and a cloneable handle.
    ///
    /// The engine may already be started; any pending work it has
    /// registered is spawned when [`run`](Self::run) begins.
    #[must_use]
    pub fn new(engine: Engine) -> (Self, DriverHandle) {
        let (sender, inbox) = mpsc::channel(INPUT_BUFFER_SIZE);
        let handle = DriverHandle {
            sender: sender.clone(),
        };
        (
            Self {
                engine,
                inbox,
                sender,
            },
            handle,
        )
    }

    /// Processes inputs until [`DriverInput::Shutdown`] arrives, then
    /// returns the engine.
    ///
    /// Settlements that arrive after shutdown are dropped with the
    /// channel; correlation ids already make them harmless.
    pub async fn run(mut self) -> Engine {
        info!(engine = %self.engine.id(), "driver started");
        self.spawn_pending();
        while let Some(input) = self.inbox.recv().await {
            match input {
                DriverInput::Dispatch {
                    event,
                    payload,
                    reply,
                } => {
                    let outcome = self.engine.dispatch(event, payload);
                    self.spawn_pending();
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                }
                DriverInput::Resolve {
                    event,
                    request_action,
                    payload,
                } => {
                    let outcome =
                        self.engine
                            .resolve_pending_request(event, request_action, payload);
                    if !outcome.is_processed() {
                        debug!(?outcome, "stale settlement dropped");
                    }
                    self.spawn_pending();
                }
                DriverInput::Reject {
                    event,
                    request_action,
                    error,
                } => {
                    let outcome = self
                        .engine
                        .reject_pending_request(event, request_action, error);
                    if !outcome.is_processed() {
                        debug!(?outcome, "stale rejection dropped");
                    }
                    self.spawn_pending();
                }
                DriverInput::Shutdown => break,
            }
        }
        info!(engine = %self.engine.id(), "driver stopped");
        self.engine
    }

    /// Spawns a task for every async payload the engine registered
    /// since the last pass. Detached work (replay mocks) has no future
    /// and is skipped.
    fn spawn_pending(&mut self) {
        for mut item in self.engine.take_pending_work() {
            let Some(future) = item.work.take_future() else {
                continue;
            };
            let sender = self.sender.clone();
            debug!(event = %item.event, request_action = %item.request_action, "spawning async payload");
            tokio::spawn(async move {
                let input = match future.await {
                    Ok(payload) => DriverInput::Resolve {
                        event: item.event,
                        request_action: item.request_action,
                        payload,
                    },
                    Err(error) => DriverInput::Reject {
                        event: item.event,
                        request_action: item.request_action,
                        error,
                    },
                };
                let _ = sender.send(input).await;
            });
        }
    }
}

/// Cheaply cloneable handle for feeding a running driver.
#[derive(Debug, Clone)]
pub struct DriverHandle {
    sender: mpsc::Sender<DriverInput>,
}

impl DriverHandle {
    /// Dispatches an external value and awaits the outcome.
    ///
    /// # Errors
    ///
    /// [`DriverError`] when the driver is gone.
    pub async fn dispatch(
        &self,
        event: impl Into<EventId>,
        payload: impl Into<Value>,
    ) -> Result<DispatchOutcome, DriverError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(DriverInput::Dispatch {
                event: event.into(),
                payload: payload.into(),
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| DriverError::ChannelClosed)?;
        reply_rx.await.map_err(|_| DriverError::ReplyDropped)
    }

    /// Dispatches an external value without waiting for the outcome.
    ///
    /// # Errors
    ///
    /// [`DriverError::ChannelClosed`] when the driver is gone.
    pub async fn dispatch_forget(
        &self,
        event: impl Into<EventId>,
        payload: impl Into<Value>,
    ) -> Result<(), DriverError> {
        self.sender
            .send(DriverInput::Dispatch {
                event: event.into(),
                payload: payload.into(),
                reply: None,
            })
            .await
            .map_err(|_| DriverError::ChannelClosed)
    }

    /// Asks the driver to stop. The driver finishes its current input
    /// first; in-flight settlements arriving later are dropped.
    pub async fn shutdown(&self) -> Result<(), DriverError> {
        self.sender
            .send(DriverInput::Shutdown)
            .await
            .map_err(|_| DriverError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_types::assert_error_codes;

    #[test]
    fn error_codes_follow_conventions() {
        assert_error_codes(
            &[DriverError::ChannelClosed, DriverError::ReplyDropped],
            "DRIVER_",
        );
    }
}
