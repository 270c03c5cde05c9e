//! Unified error interface.
//!
//! Every fallible weft operation propagates errors by value. The
//! [`ErrorCode`] trait gives each error a machine-readable code and a
//! recoverability hint so callers can branch on the code instead of
//! matching concrete enum types across crate boundaries.
//!
//! # Code Convention
//!
//! - UPPER_SNAKE_CASE, prefixed per crate (`MSG_`, `RT_`)
//! - Stable once defined; changing a code is a breaking change
//! - Recoverable means retrying (or waiting) may succeed; caller bugs
//!   and shutdown are not recoverable
//!
//! The [`assert_error_code`] and [`assert_error_codes`] helpers are
//! used by each crate's tests to enforce the convention over every
//! enum variant.

/// Machine-readable error code interface.
///
/// # Example
///
/// ```
/// use weft_types::ErrorCode;
///
/// #[derive(Debug)]
/// enum QueueError {
///     Full,
///     Closed,
/// }
///
/// impl ErrorCode for QueueError {
///     fn code(&self) -> &'static str {
///         match self {
///             Self::Full => "QUEUE_FULL",
///             Self::Closed => "QUEUE_CLOSED",
///         }
///     }
///
///     fn is_recoverable(&self) -> bool {
///         matches!(self, Self::Full)
///     }
/// }
///
/// assert_eq!(QueueError::Full.code(), "QUEUE_FULL");
/// assert!(!QueueError::Closed.is_recoverable());
/// ```
pub trait ErrorCode {
    /// Returns the stable UPPER_SNAKE_CASE code for this error.
    fn code(&self) -> &'static str;

    /// Returns `true` when retrying the operation may succeed.
    fn is_recoverable(&self) -> bool;
}

/// Asserts that an error's code follows the weft convention.
///
/// Checks that the code is non-empty, UPPER_SNAKE_CASE, and starts
/// with `expected_prefix`.
///
/// # Panics
///
/// Panics with a descriptive message when any check fails. Intended
/// for use inside tests.
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();

    assert!(!code.is_empty(), "error code must not be empty");
    assert!(
        code.starts_with(expected_prefix),
        "error code '{code}' must start with prefix '{expected_prefix}'",
    );
    assert!(
        is_upper_snake_case(code),
        "error code '{code}' must be UPPER_SNAKE_CASE",
    );
}

/// Asserts the convention over every variant of an error enum.
///
/// # Example
///
/// ```
/// use weft_types::{assert_error_codes, ErrorCode};
///
/// #[derive(Debug)]
/// enum E { A, B }
///
/// impl ErrorCode for E {
///     fn code(&self) -> &'static str {
///         match self { Self::A => "X_A", Self::B => "X_B" }
///     }
///     fn is_recoverable(&self) -> bool { false }
/// }
///
/// assert_error_codes(&[E::A, E::B], "X_");
/// ```
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

fn is_upper_snake_case(s: &str) -> bool {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
