//! Engine layer errors.
//!
//! These cover misuse of the engine's public API surface. Expected
//! scheduling failures are [`InvalidBidReason`](crate::invalid::InvalidBidReason)
//! values, and broken internal invariants (a reentrant `run`, a missing
//! bid after validation passed) panic: they indicate a bug in the engine
//! itself, never a recoverable condition.
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`EngineError::AlreadyStarted`] | `ENGINE_ALREADY_STARTED` | No |
//! | [`EngineError::NotStarted`] | `ENGINE_NOT_STARTED` | No |
//! | [`EngineError::ReplayAlreadyAttached`] | `ENGINE_REPLAY_ALREADY_ATTACHED` | No |

use braid_types::ErrorCode;
use thiserror::Error;

/// Engine API misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// `start` was called on an engine that already has a root flow.
    #[error("engine already started")]
    AlreadyStarted,

    /// An operation that needs a running tree was called before `start`.
    #[error("engine not started")]
    NotStarted,

    /// A replay session is already attached.
    #[error("a replay session is already attached")]
    ReplayAlreadyAttached,
}

impl ErrorCode for EngineError {
    fn code(&self) -> &'static str {
        match self {
            Self::AlreadyStarted => "ENGINE_ALREADY_STARTED",
            Self::NotStarted => "ENGINE_NOT_STARTED",
            Self::ReplayAlreadyAttached => "ENGINE_REPLAY_ALREADY_ATTACHED",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_types::assert_error_codes;

    #[test]
    fn codes_follow_conventions() {
        assert_error_codes(
            &[
                EngineError::AlreadyStarted,
                EngineError::NotStarted,
                EngineError::ReplayAlreadyAttached,
            ],
            "ENGINE_",
        );
    }
}
