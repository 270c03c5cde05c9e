//! Core types for the weft runtime.
//!
//! This crate is the bottom of the workspace: identifier newtypes, the
//! routing [`Loc`] triple, result status codes, and the [`ErrorCode`]
//! convention every other weft crate implements its errors against.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SDK Layer                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  weft-types   : ids, Loc, StatusCode, ErrorCode  ◄── HERE   │
//! │  weft-msg     : envelopes, property values, codec           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  weft-runtime : runloops, dispatch, lifecycle, testing      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Error Code Convention
//!
//! Every fallible weft operation yields a value-propagated error that
//! implements [`ErrorCode`]: a stable UPPER_SNAKE_CASE code with a
//! per-crate prefix plus a recoverability hint. The
//! [`assert_error_code`]/[`assert_error_codes`] helpers let each crate
//! keep the convention honest in its tests.

mod error;
mod id;
mod loc;
mod status;

pub use error::{assert_error_code, assert_error_codes, ErrorCode};
pub use id::{CorrelationId, GraphId};
pub use loc::Loc;
pub use status::StatusCode;
