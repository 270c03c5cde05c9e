//! The weft runtime: graph-composed dataflow applications.
//!
//! An application process (the [`App`]) hosts one or more **graphs**;
//! each graph wires user-written [`Extension`]s together with typed
//! message channels (commands with result streams, opaque data, audio
//! frames, video frames). Extensions are partitioned into groups and
//! each group executes on its own single-threaded [`Runloop`]; the
//! runtime delivers envelopes between them with per-sender ordering,
//! ownership transfer on send, and value-propagated failures.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         App (process)                        │
//! │  app runloop: graph tables, lifecycle barriers, privileged   │
//! │  commands (start_graph / close_app)                          │
//! └──────────────────────────────────────────────────────────────┘
//!        │ creates                                   ▲ acks
//!        ▼                                           │
//! ┌─────────────────┐   posted tasks   ┌─────────────────┐
//! │ group runloop A │ ───────────────► │ group runloop B │
//! │  ┌───────────┐  │                  │  ┌───────────┐  │
//! │  │ extension │  │  Arc<Envelope>   │  │ extension │  │
//! │  │  + env    │  │ ◄─────────────── │  │  + env    │  │
//! │  └───────────┘  │                  │  └───────────┘  │
//! └─────────────────┘                  └─────────────────┘
//! ```
//!
//! # Message flow
//!
//! An extension sends through its [`ExtensionEnv`]; the env resolves
//! destinations (explicit `dests` override the graph's connection
//! table), clones one strong reference per destination, and posts a
//! delivery task onto each destination's runloop. Results stream back
//! through the sender's correlator and fire the registered handler on
//! the sender's own runloop. Zero resolved destinations fail the send
//! synchronously with `RT_MSG_NOT_CONNECTED` and hand the envelope
//! back to the caller.
//!
//! # Lifecycle
//!
//! `start_graph` instantiates extensions through the [`AddonRegistry`]
//! and drives configure → init → start with a graph-wide barrier
//! between phases; `close_app` drives stop → deinit in reverse and
//! only then lets [`App::run`] return. See [`Extension`] for the ack
//! contract and [`EnvProxy`] for how off-thread work re-enters a
//! runloop.

mod addon;
mod app;
mod client;
mod correlator;
mod env;
mod error;
mod extension;
pub mod graph;
mod lifecycle;
mod manifest;
mod proxy;
mod runloop;
pub mod testing;

pub use addon::AddonRegistry;
pub use app::{App, PROP_LOG_LEVEL, PROP_URI};
pub use client::Client;
pub use correlator::{CorrelationMode, ResultHandler};
pub use env::ExtensionEnv;
pub use error::{RuntimeError, SendError};
pub use extension::Extension;
pub use graph::{start_graph_cmd, GraphDefinition};
pub use lifecycle::ExtensionState;
pub use manifest::{Api, ApiEntry, Manifest, PropertySchema, TypeDecl};
pub use proxy::EnvProxy;
pub use runloop::{Runloop, RunloopHandle, TimerId};

// The message types are the vocabulary of every extension; re-export
// them so user crates depend on one runtime crate.
pub use weft_msg::{
    AudioFrame, AudioLayout, Cmd, CmdResult, Data, Envelope, Message, MsgKind, OpaquePtr,
    PixelFormat, PropertyMap, PropertyValue, VideoFrame,
};
pub use weft_types::{CorrelationId, ErrorCode, GraphId, Loc, StatusCode};
