//! Unified error interface for braid crates.
//!
//! Every public error family in the workspace implements [`ErrorCode`] so
//! that callers can match on stable machine-readable codes and decide on
//! retry behavior without inspecting display strings.
//!
//! # Design
//!
//! The scheduler distinguishes two failure classes:
//!
//! - **Expected failures** (an action does not match any valid bid, a
//!   payload fails validation) are plain values, not `Err` results. They
//!   still implement [`ErrorCode`] so tooling can log them uniformly.
//! - **Engine errors** (fatal invariant breaks, driver channel failures)
//!   are `thiserror` enums implementing [`ErrorCode`].
//!
//! # Example
//!
//! ```
//! use braid_types::ErrorCode;
//!
//! #[derive(Debug)]
//! enum DriverError {
//!     ChannelClosed,
//!     ReplyDropped,
//! }
//!
//! impl ErrorCode for DriverError {
//!     fn code(&self) -> &'static str {
//!         match self {
//!             Self::ChannelClosed => "DRIVER_CHANNEL_CLOSED",
//!             Self::ReplyDropped => "DRIVER_REPLY_DROPPED",
//!         }
//!     }
//!
//!     fn is_recoverable(&self) -> bool {
//!         matches!(self, Self::ReplyDropped)
//!     }
//! }
//!
//! assert_eq!(DriverError::ChannelClosed.code(), "DRIVER_CHANNEL_CLOSED");
//! assert!(!DriverError::ChannelClosed.is_recoverable());
//! ```

/// Unified error code interface.
///
/// # Code Format
///
/// - **UPPER_SNAKE_CASE**: e.g. `"ENGINE_REENTRANT_RUN"`
/// - **Layer-prefixed**: `"BID_"`, `"ENGINE_"`, `"DRIVER_"`, `"REPLAY_"`
/// - **Stable**: codes are an API contract and never change once defined
///
/// # Recoverability
///
/// A failure is recoverable when retrying later may succeed because it
/// depends on scheduler state that other actions can change (an event
/// stops being blocked, a pending request resolves). It is not
/// recoverable when retrying cannot help (stale correlation id, invalid
/// payload, broken invariant).
pub trait ErrorCode {
    /// Returns the machine-readable code for this error.
    fn code(&self) -> &'static str;

    /// Returns whether retrying the operation later may succeed.
    fn is_recoverable(&self) -> bool;
}

/// Validates that an error code follows braid conventions.
///
/// # Checks
///
/// 1. Code is non-empty
/// 2. Code starts with the expected layer prefix
/// 3. Code is UPPER_SNAKE_CASE
///
/// # Panics
///
/// Panics with a descriptive message if validation fails. Intended for
/// use in tests covering every variant of an error enum.
///
/// # Example
///
/// ```
/// use braid_types::{assert_error_code, ErrorCode};
///
/// #[derive(Debug)]
/// struct Stale;
///
/// impl ErrorCode for Stale {
///     fn code(&self) -> &'static str { "BID_STALE_PENDING_REQUEST" }
///     fn is_recoverable(&self) -> bool { false }
/// }
///
/// assert_error_code(&Stale, "BID_");
/// ```
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();

    assert!(!code.is_empty(), "error code must not be empty");
    assert!(
        code.starts_with(expected_prefix),
        "error code '{}' must start with prefix '{}'",
        code,
        expected_prefix
    );
    assert!(
        is_upper_snake_case(code),
        "error code '{}' must be UPPER_SNAKE_CASE",
        code
    );
}

/// Validates every error code in a slice. See [`assert_error_code`].
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

/// Checks if a string is UPPER_SNAKE_CASE.
fn is_upper_snake_case(s: &str) -> bool {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
