//! Message envelopes for the weft runtime.
//!
//! Everything that travels between extensions is one of five envelope
//! kinds sharing a common header (name, source, destinations,
//! properties):
//!
//! | Kind | Direction | Response |
//! |------|-----------|----------|
//! | [`Cmd`] | point to point | yes, a [`CmdResult`] stream |
//! | [`CmdResult`] | back to the command originator | no |
//! | [`Data`] | one way | no |
//! | [`AudioFrame`] | one way | no |
//! | [`VideoFrame`] | one way | no |
//!
//! # Ownership
//!
//! Envelopes are plain owned values. Sending one transfers ownership
//! to the runtime; a failed send hands the envelope back inside the
//! error so the caller can retry or drop it. The runtime shares a sent
//! envelope across fan-out destinations behind an `Arc`, which is why
//! mutation after send is impossible by construction.
//!
//! # Properties
//!
//! Every envelope carries a [`PropertyValue`] tree addressed by
//! dot-separated paths. Values keep their declared widths so a
//! serialized envelope round-trips byte-for-byte; opaque pointer
//! values are process-local and refuse to serialize.
//!
//! ```
//! use weft_msg::{Cmd, Message};
//!
//! let mut cmd = Cmd::new("hello_world");
//! cmd.set_property("greeting.text", "hi").unwrap();
//! cmd.set_property("greeting.count", 3i32).unwrap();
//!
//! assert_eq!(cmd.get_property_string("greeting.text").unwrap(), "hi");
//! assert_eq!(cmd.get_property_i32("greeting.count").unwrap(), 3);
//! ```

mod codec;
mod envelope;
mod error;
mod path;
mod value;

pub use codec::{read_frame, write_frame};
pub use envelope::{
    AudioFrame, AudioLayout, Cmd, CmdResult, Data, Envelope, Message, MsgKind, PixelFormat,
    VideoFrame,
};
pub use error::MsgError;
pub use path::{get as property_get, set as property_set};
pub use value::{OpaquePtr, PropertyMap, PropertyValue};

// Re-exports so extension code only needs this crate for message work.
pub use weft_types::{CorrelationId, Loc, StatusCode};
