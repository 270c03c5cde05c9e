//! The per-extension runtime façade.
//!
//! Every extension callback receives `&mut ExtensionEnv`: the one
//! object through which an extension sends messages, returns results,
//! reads its configuration, and acknowledges lifecycle phases. An env
//! is owned by its extension's runloop; off-thread code reaches it
//! through an [`EnvProxy`](crate::EnvProxy).
//!
//! # Send semantics
//!
//! `send_*` consumes the envelope. On success the runtime owns it and
//! delivery happens asynchronously; on failure the envelope comes back
//! inside the [`SendError`] and nothing was delivered anywhere:
//!
//! ```no_run
//! # use weft_msg::Cmd;
//! # use weft_runtime::{ExtensionEnv, RuntimeError};
//! # fn demo(env: &mut ExtensionEnv) {
//! match env.send_cmd(Cmd::new("probe")) {
//!     Ok(()) => {}
//!     Err(send_err) => {
//!         let (err, cmd) = send_err.into_parts();
//!         assert!(matches!(err, RuntimeError::NotConnected { .. }));
//!         drop(cmd); // caller still owns it
//!     }
//! }
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};
use weft_msg::{
    AudioFrame, Cmd, CmdResult, Data, Envelope, Message, MsgKind, PropertyMap, PropertyValue,
    VideoFrame,
};
use weft_types::{CorrelationId, Loc};

use crate::app;
use crate::correlator::{CorrelationMode, Correlator, ResultDisposition, ResultHandler};
use crate::graph::slot::{self, ExtensionSlot, GraphContext};
use crate::lifecycle::ExtensionState;
use crate::manifest::Manifest;
use crate::{RuntimeError, SendError};

enum Target {
    Extension(Arc<ExtensionSlot>),
    App,
}

/// Per-extension runtime façade.
///
/// All methods must be called on the owning runloop, either from an
/// extension callback or through an [`EnvProxy`](crate::EnvProxy)
/// closure.
pub struct ExtensionEnv {
    name: String,
    loc: Loc,
    slot: Arc<ExtensionSlot>,
    graph: Arc<GraphContext>,
    correlator: Correlator,
    properties: PropertyMap,
    manifest: Option<Manifest>,
    buffered_inbound: VecDeque<Arc<Envelope>>,
}

impl ExtensionEnv {
    pub(crate) fn new(
        slot: Arc<ExtensionSlot>,
        graph: Arc<GraphContext>,
        properties: PropertyMap,
    ) -> Self {
        Self {
            name: slot.name.clone(),
            loc: slot.loc.clone(),
            slot,
            graph,
            correlator: Correlator::default(),
            properties,
            manifest: None,
            buffered_inbound: VecDeque::new(),
        }
    }

    /// This extension's instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This extension's fully-qualified loc.
    #[must_use]
    pub fn loc(&self) -> &Loc {
        &self.loc
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ExtensionState {
        self.slot.state.get()
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Sends a command, discarding any results it produces.
    ///
    /// # Errors
    ///
    /// The envelope comes back inside the error; see the module docs.
    pub fn send_cmd(&mut self, cmd: Cmd) -> Result<(), SendError<Cmd>> {
        self.submit_cmd(cmd, None, CorrelationMode::Single)
    }

    /// Sends a command with single-result semantics: `handler` fires
    /// exactly once, with the overall-final result.
    ///
    /// # Errors
    ///
    /// On failure no correlator entry remains and `handler` will never
    /// fire; the synchronous error is the only signal.
    pub fn send_cmd_with<H>(&mut self, cmd: Cmd, handler: H) -> Result<(), SendError<Cmd>>
    where
        H: FnMut(&mut ExtensionEnv, Option<CmdResult>, Option<RuntimeError>) + Send + 'static,
    {
        self.submit_cmd(cmd, Some(Box::new(handler)), CorrelationMode::Single)
    }

    /// Sends a command with multi-result semantics: `handler` fires on
    /// every result; the last invocation carries `is_final = true`.
    ///
    /// # Errors
    ///
    /// As [`send_cmd_with`](Self::send_cmd_with).
    pub fn send_cmd_ex<H>(&mut self, cmd: Cmd, handler: H) -> Result<(), SendError<Cmd>>
    where
        H: FnMut(&mut ExtensionEnv, Option<CmdResult>, Option<RuntimeError>) + Send + 'static,
    {
        self.submit_cmd(cmd, Some(Box::new(handler)), CorrelationMode::Multi)
    }

    /// Sends a one-way data message.
    ///
    /// # Errors
    ///
    /// The envelope comes back inside the error.
    pub fn send_data(&mut self, data: Data) -> Result<(), SendError<Data>> {
        self.submit_one_way(data, |d| Envelope::Data(d))
    }

    /// Sends a one-way audio frame.
    ///
    /// # Errors
    ///
    /// The envelope comes back inside the error.
    pub fn send_audio_frame(&mut self, frame: AudioFrame) -> Result<(), SendError<AudioFrame>> {
        self.submit_one_way(frame, |f| Envelope::AudioFrame(f))
    }

    /// Sends a one-way video frame.
    ///
    /// # Errors
    ///
    /// The envelope comes back inside the error.
    pub fn send_video_frame(&mut self, frame: VideoFrame) -> Result<(), SendError<VideoFrame>> {
        self.submit_one_way(frame, |f| Envelope::VideoFrame(f))
    }

    /// Routes a result to the originator of the command it was built
    /// from.
    ///
    /// # Errors
    ///
    /// `RT_INVALID_ARGUMENT` when the result has no captured source
    /// (it was not built with [`CmdResult::from_cmd`]).
    pub fn return_result(&mut self, mut result: CmdResult) -> Result<(), SendError<CmdResult>> {
        if !result.has_captured_source() {
            return Err(SendError::new(
                RuntimeError::InvalidArgument(
                    "result has no captured source; build it with CmdResult::from_cmd".into(),
                ),
                result,
            ));
        }
        if result.src().is_empty() {
            result.set_src(self.loc.clone());
        }

        let origin = result.dests()[0].clone();
        match &origin.extension {
            Some(name) => {
                let Some(dest) = self.graph.slot(name) else {
                    return Err(SendError::new(
                        RuntimeError::not_connected(MsgKind::CmdResult, &result.name),
                        result,
                    ));
                };
                slot::deliver(dest, Arc::new(Envelope::CmdResult(result)));
                Ok(())
            }
            // An extensionless origin is an external client of the app.
            None => {
                self.graph.app.deliver_client_result(result);
                Ok(())
            }
        }
    }

    /// Overrides a message's source loc before sending. Test harness
    /// support; ordinary extensions never need it.
    pub fn set_msg_source(&self, msg: &mut impl Message, loc: Loc) {
        msg.set_src(loc);
    }

    // ------------------------------------------------------------------
    // Properties and manifest
    // ------------------------------------------------------------------

    /// Reads a property of this extension's own tree.
    ///
    /// # Errors
    ///
    /// `MSG_INVALID_ARGUMENT` for a malformed path.
    pub fn get_property(&self, path: &str) -> Result<Option<&PropertyValue>, RuntimeError> {
        weft_msg::property_get(&self.properties, path).map_err(RuntimeError::from)
    }

    /// Writes a property into this extension's own tree.
    ///
    /// # Errors
    ///
    /// `MSG_INVALID_ARGUMENT` for a malformed path.
    pub fn set_property(
        &mut self,
        path: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<(), RuntimeError> {
        weft_msg::property_set(&mut self.properties, path, value.into())
            .map_err(RuntimeError::from)
    }

    /// Typed read of an `i64` (or narrower integer) property.
    ///
    /// # Errors
    ///
    /// `MSG_TYPE_MISMATCH` / `MSG_INVALID_ARGUMENT`.
    pub fn get_property_i64(&self, path: &str) -> Result<i64, RuntimeError> {
        let value = self.require_property(path)?;
        value.to_i64().ok_or_else(|| {
            RuntimeError::from(weft_msg::MsgError::TypeMismatch {
                path: path.to_string(),
                expected: "i64",
                found: value.type_name(),
            })
        })
    }

    /// Typed read of an `i32` property.
    ///
    /// # Errors
    ///
    /// `MSG_TYPE_MISMATCH` / `MSG_INVALID_ARGUMENT`.
    pub fn get_property_i32(&self, path: &str) -> Result<i32, RuntimeError> {
        let wide = self.get_property_i64(path)?;
        i32::try_from(wide).map_err(|_| {
            RuntimeError::from(weft_msg::MsgError::TypeMismatch {
                path: path.to_string(),
                expected: "i32",
                found: "i64",
            })
        })
    }

    /// Typed read of a `bool` property.
    ///
    /// # Errors
    ///
    /// `MSG_TYPE_MISMATCH` / `MSG_INVALID_ARGUMENT`.
    pub fn get_property_bool(&self, path: &str) -> Result<bool, RuntimeError> {
        let value = self.require_property(path)?;
        value.as_bool().ok_or_else(|| {
            RuntimeError::from(weft_msg::MsgError::TypeMismatch {
                path: path.to_string(),
                expected: "bool",
                found: value.type_name(),
            })
        })
    }

    /// Typed read of a string property.
    ///
    /// # Errors
    ///
    /// `MSG_TYPE_MISMATCH` / `MSG_INVALID_ARGUMENT`.
    pub fn get_property_string(&self, path: &str) -> Result<String, RuntimeError> {
        let value = self.require_property(path)?;
        value.as_str().map(str::to_string).ok_or_else(|| {
            RuntimeError::from(weft_msg::MsgError::TypeMismatch {
                path: path.to_string(),
                expected: "string",
                found: value.type_name(),
            })
        })
    }

    /// Typed read of a float property.
    ///
    /// # Errors
    ///
    /// `MSG_TYPE_MISMATCH` / `MSG_INVALID_ARGUMENT`.
    pub fn get_property_f64(&self, path: &str) -> Result<f64, RuntimeError> {
        let value = self.require_property(path)?;
        value.to_f64().ok_or_else(|| {
            RuntimeError::from(weft_msg::MsgError::TypeMismatch {
                path: path.to_string(),
                expected: "f64",
                found: value.type_name(),
            })
        })
    }

    fn require_property(&self, path: &str) -> Result<&PropertyValue, RuntimeError> {
        self.get_property(path)?.ok_or_else(|| {
            RuntimeError::from(weft_msg::MsgError::InvalidArgument(format!(
                "property not found: '{path}'"
            )))
        })
    }

    /// Declares this extension's manifest. Meaningful during
    /// `on_configure`; the runtime checks inbound commands against its
    /// `cmd_in` schemas.
    ///
    /// # Errors
    ///
    /// `RT_INVALID_ARGUMENT` on malformed JSON, `RT_INVALID_STATE`
    /// once the extension has initialized.
    pub fn init_manifest_from_json(&mut self, json: &str) -> Result<(), RuntimeError> {
        if self.state() >= ExtensionState::Initialized {
            return Err(RuntimeError::InvalidState(
                "manifest must be declared before init completes".into(),
            ));
        }
        self.manifest = Some(Manifest::from_json(json)?);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle acks
    // ------------------------------------------------------------------

    /// Acknowledges `on_configure`.
    ///
    /// # Errors
    ///
    /// `RT_INVALID_STATE` when called out of order.
    pub fn on_configure_done(&mut self) -> Result<(), RuntimeError> {
        self.ack(ExtensionState::Configuring, ExtensionState::Configured)
    }

    /// Acknowledges `on_init`.
    ///
    /// # Errors
    ///
    /// `RT_INVALID_STATE` when called out of order.
    pub fn on_init_done(&mut self) -> Result<(), RuntimeError> {
        self.ack(ExtensionState::Initializing, ExtensionState::Initialized)
    }

    /// Acknowledges `on_start`. Messages buffered during the start
    /// barrier flush right after.
    ///
    /// # Errors
    ///
    /// `RT_INVALID_STATE` when called out of order.
    pub fn on_start_done(&mut self) -> Result<(), RuntimeError> {
        self.ack(ExtensionState::Starting, ExtensionState::Started)?;
        let slot = Arc::clone(&self.slot);
        let posted = self.slot.runloop.post_tail(move || slot::flush_buffered(&slot));
        if let Err(err) = posted {
            warn!(extension = %self.name, %err, "buffered messages lost");
        }
        Ok(())
    }

    /// Acknowledges `on_stop`.
    ///
    /// # Errors
    ///
    /// `RT_INVALID_STATE` when called out of order.
    pub fn on_stop_done(&mut self) -> Result<(), RuntimeError> {
        self.ack(ExtensionState::Stopping, ExtensionState::Stopped)
    }

    /// Acknowledges `on_deinit`.
    ///
    /// Open correlator entries drain here: each pending result handler
    /// fires once with `RT_CLOSED` and no result. Completion of the
    /// deinit phase additionally waits until every
    /// [`EnvProxy`](crate::EnvProxy) targeting this extension has
    /// dropped.
    ///
    /// # Errors
    ///
    /// `RT_INVALID_STATE` when called out of order or twice.
    pub fn on_deinit_done(&mut self) -> Result<(), RuntimeError> {
        if self.slot.state.get() != ExtensionState::Deinitializing {
            return Err(RuntimeError::InvalidState(format!(
                "on_deinit_done in state {}",
                self.slot.state.get()
            )));
        }
        if self.slot.deinit_acked.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::InvalidState("on_deinit_done called twice".into()));
        }

        for (id, mut handler) in self.correlator.drain() {
            debug!(extension = %self.name, %id, "cancelling pending result handler");
            handler(self, None, Some(RuntimeError::Closed));
        }

        slot::maybe_finish_deinit(&self.slot);
        Ok(())
    }

    fn ack(&mut self, from: ExtensionState, to: ExtensionState) -> Result<(), RuntimeError> {
        self.slot.state.transition(from, to).map_err(|actual| {
            RuntimeError::InvalidState(format!(
                "lifecycle ack for {to} while {actual}; expected {from}"
            ))
        })?;
        debug!(extension = %self.name, state = %to, "lifecycle ack");
        self.graph
            .app
            .notify_lifecycle(self.graph.graph_id, &self.name, to);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inbound plumbing (crate-internal)
    // ------------------------------------------------------------------

    pub(crate) fn handle_inbound_result(&mut self, result: CmdResult) {
        match self.correlator.on_result(result) {
            ResultDisposition::Fire {
                id,
                mut entry,
                result,
                retain,
            } => {
                (entry.handler)(self, Some(result), None);
                if retain {
                    self.correlator.restore(id, entry);
                }
            }
            ResultDisposition::Swallow { id, entry } => self.correlator.restore(id, entry),
            ResultDisposition::Unknown => {}
        }
    }

    pub(crate) fn manifest_violation(&self, cmd: &Cmd) -> Option<String> {
        self.manifest.as_ref()?.check_cmd_in(cmd).err()
    }

    pub(crate) fn has_buffered_inbound(&self) -> bool {
        !self.buffered_inbound.is_empty()
    }

    pub(crate) fn buffer_inbound(&mut self, envelope: Arc<Envelope>) {
        self.buffered_inbound.push_back(envelope);
    }

    pub(crate) fn take_buffered_inbound(&mut self) -> Vec<Arc<Envelope>> {
        self.buffered_inbound.drain(..).collect()
    }

    pub(crate) fn slot(&self) -> &Arc<ExtensionSlot> {
        &self.slot
    }

    // ------------------------------------------------------------------
    // Send internals
    // ------------------------------------------------------------------

    fn scope(&self) -> Loc {
        self.graph.scope()
    }

    fn resolve_targets(
        &self,
        kind: MsgKind,
        name: &str,
        explicit: &[Loc],
    ) -> Result<Vec<Target>, RuntimeError> {
        // Explicit destinations override the connection table.
        let dest_locs: Vec<Loc> = if explicit.is_empty() {
            self.graph.routes.resolve(&self.name, kind, name).to_vec()
        } else {
            explicit.to_vec()
        };
        if dest_locs.is_empty() {
            return Err(RuntimeError::not_connected(kind, name));
        }

        let scope = self.scope();
        let own_graph = self.graph.graph_id.to_string();
        let mut targets = Vec::with_capacity(dest_locs.len());
        for loc in &dest_locs {
            let full = loc.resolved_against(&scope);
            if full.app_uri.as_deref() != Some(self.graph.app_uri.as_str()) {
                // Cross-process routing needs a transport; none here.
                return Err(RuntimeError::not_connected(kind, name));
            }
            match &full.extension {
                Some(ext_name) => {
                    // An explicitly named foreign graph is unreachable;
                    // an absent or empty graph id means "this graph".
                    let foreign_graph = matches!(
                        loc.graph_id.as_deref(),
                        Some(id) if !id.is_empty() && id != own_graph
                    );
                    if foreign_graph {
                        return Err(RuntimeError::not_connected(kind, name));
                    }
                    let Some(dest) = self.graph.slot(ext_name) else {
                        return Err(RuntimeError::not_connected(kind, name));
                    };
                    if !dest.state.get().accepts_messages() {
                        return Err(RuntimeError::not_connected(kind, name));
                    }
                    targets.push(Target::Extension(Arc::clone(dest)));
                }
                None => {
                    if kind == MsgKind::Cmd && app::is_privileged_cmd(name) {
                        targets.push(Target::App);
                    } else {
                        return Err(RuntimeError::not_connected(kind, name));
                    }
                }
            }
        }
        Ok(targets)
    }

    fn submit_cmd(
        &mut self,
        mut cmd: Cmd,
        handler: Option<ResultHandler>,
        mode: CorrelationMode,
    ) -> Result<(), SendError<Cmd>> {
        if cmd.name.is_empty() {
            return Err(SendError::new(
                RuntimeError::InvalidArgument("command without a name".into()),
                cmd,
            ));
        }
        let targets = match self.resolve_targets(MsgKind::Cmd, &cmd.name, &cmd.dests) {
            Ok(targets) => targets,
            Err(err) => return Err(SendError::new(err, cmd)),
        };

        // Stamp unconditionally: a forwarded command re-correlates at
        // the forwarder, so its results come back here.
        let id = CorrelationId::new();
        cmd.correlation_id = Some(id);
        cmd.src = self.loc.clone();

        if let Some(handler) = handler {
            self.correlator.insert(id, handler, mode, targets.len());
        }

        let envelope = Arc::new(Envelope::Cmd(cmd));
        for target in targets {
            match target {
                Target::Extension(dest) => slot::deliver(&dest, Arc::clone(&envelope)),
                Target::App => self.graph.app.submit_envelope(Arc::clone(&envelope)),
            }
        }
        Ok(())
    }

    fn submit_one_way<T>(
        &mut self,
        mut msg: T,
        wrap: impl FnOnce(T) -> Envelope,
    ) -> Result<(), SendError<T>>
    where
        T: Message,
    {
        if msg.name().is_empty() {
            return Err(SendError::new(
                RuntimeError::InvalidArgument("message without a name".into()),
                msg,
            ));
        }
        let targets =
            match self.resolve_targets(msg.kind(), &msg.name().to_string(), msg.dests()) {
                Ok(targets) => targets,
                Err(err) => return Err(SendError::new(err, msg)),
            };

        msg.set_src(self.loc.clone());

        let envelope = Arc::new(wrap(msg));
        for target in targets {
            match target {
                Target::Extension(dest) => slot::deliver(&dest, Arc::clone(&envelope)),
                Target::App => unreachable!("one-way messages never target the app"),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ExtensionEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionEnv")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
