//! Deterministic replay of a recorded action sequence.
//!
//! A replay session feeds previously logged actions back through the
//! engine's selection loop as the test-driven override source: recorded
//! request payloads substitute for payload computation, async requests
//! are mocked as never-settling pending work, and external actions go
//! through the same validation as live dispatches. After every processed
//! step the emitted action and reactions are compared against the
//! recording; differences accumulate as mismatches instead of aborting,
//! so one replay run reports every divergence at once.
//!
//! # Example
//!
//! ```ignore
//! let recording = engine.take_log();
//!
//! let mut fresh = Engine::new(EngineConfig::default());
//! fresh.set_replay(ReplaySession::new(recording))?;
//! fresh.start("app", root_factory)?;
//!
//! let report = fresh.finish_replay().expect("session attached");
//! assert!(report.is_clean(), "{report:?}");
//! ```

use crate::action::Action;
use crate::reaction::LoggedAction;
use serde_json::{json, Value};
use std::collections::VecDeque;

/// One divergence between the recording and the replayed run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReplayMismatch {
    /// Zero-based index of the replayed step.
    pub step: usize,
    /// What went wrong.
    pub message: String,
    /// The recorded side, when applicable.
    pub expected: Option<Value>,
    /// The replayed side, when applicable.
    pub got: Option<Value>,
}

/// Outcome of a finished replay session.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReplayReport {
    /// Every divergence, in step order.
    pub mismatches: Vec<ReplayMismatch>,
    /// Recorded steps the replayed run never reached.
    pub unconsumed_steps: usize,
}

impl ReplayReport {
    /// Returns `true` if the replayed run reproduced the recording
    /// exactly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty() && self.unconsumed_steps == 0
    }
}

/// An in-progress replay of a recorded run.
#[derive(Debug)]
pub struct ReplaySession {
    pending: VecDeque<Action>,
    expected: VecDeque<LoggedAction>,
    mismatches: Vec<ReplayMismatch>,
    observed: usize,
}

impl ReplaySession {
    /// Creates a session from the steps a previous run logged.
    #[must_use]
    pub fn new(recording: Vec<LoggedAction>) -> Self {
        Self {
            pending: recording.iter().map(|step| step.action.clone()).collect(),
            expected: recording.into(),
            mismatches: Vec::new(),
            observed: 0,
        }
    }

    /// Returns `true` if no recorded actions remain to feed.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.pending.is_empty()
    }

    /// Takes the next recorded action to feed into selection.
    pub(crate) fn next_recorded(&mut self) -> Option<Action> {
        self.pending.pop_front()
    }

    /// Records that a recorded action could not be matched against the
    /// live flow tree.
    pub(crate) fn report_unmatched(&mut self, recorded: &Action, message: impl Into<String>) {
        self.mismatches.push(ReplayMismatch {
            step: self.observed,
            message: message.into(),
            expected: serde_json::to_value(recorded).ok(),
            got: None,
        });
        // The recorded step will never be emitted; drop the expectation
        // so later steps stay aligned.
        self.expected.pop_front();
    }

    /// Compares one emitted step against the recording.
    pub(crate) fn observe(&mut self, emitted: &LoggedAction) {
        let step = self.observed;
        self.observed += 1;
        let Some(expected) = self.expected.pop_front() else {
            self.mismatches.push(ReplayMismatch {
                step,
                message: "run produced more steps than the recording".into(),
                expected: None,
                got: serde_json::to_value(&emitted.action).ok(),
            });
            return;
        };
        if !expected.same_step(emitted) {
            self.mismatches.push(ReplayMismatch {
                step,
                message: "step diverged from the recording".into(),
                expected: Some(json!({
                    "action": expected.action,
                    "reactions": expected.reactions,
                })),
                got: Some(json!({
                    "action": emitted.action,
                    "reactions": emitted.reactions,
                })),
            });
        }
    }

    /// Closes the session and reports every divergence.
    #[must_use]
    pub fn finish(self) -> ReplayReport {
        ReplayReport {
            mismatches: self.mismatches,
            unconsumed_steps: self.expected.len(),
        }
    }
}
