//! Extension slots and the per-graph context.
//!
//! A slot is the runtime's handle to one extension instance: its
//! runloop, its lifecycle state (readable from any thread), and the
//! host cell holding the extension plus its env. The host cell is only
//! ever locked from the owning runloop thread; cross-thread access
//! goes through posted tasks, which is what keeps every extension
//! single-threaded.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use weft_msg::{CmdResult, Envelope, Message, StatusCode};
use weft_types::{GraphId, Loc};

use super::route::RouteTable;
use crate::app::AppHandle;
use crate::lifecycle::{ExtensionState, StateCell};
use crate::runloop::RunloopHandle;
use crate::{Extension, ExtensionEnv};

/// Shared, immutable-after-build context of one running graph.
pub(crate) struct GraphContext {
    pub(crate) graph_id: GraphId,
    pub(crate) app_uri: String,
    pub(crate) routes: RouteTable,
    pub(crate) extensions: HashMap<String, Arc<ExtensionSlot>>,
    pub(crate) app: AppHandle,
}

impl GraphContext {
    pub(crate) fn slot(&self, name: &str) -> Option<&Arc<ExtensionSlot>> {
        self.extensions.get(name)
    }

    /// The scope absent loc fields resolve against inside this graph.
    pub(crate) fn scope(&self) -> Loc {
        Loc::new(
            Some(self.app_uri.clone()),
            Some(self.graph_id.to_string()),
            None::<String>,
        )
    }
}

pub(crate) struct Host {
    pub(crate) extension: Box<dyn Extension>,
    pub(crate) env: ExtensionEnv,
}

/// Runtime handle to one extension instance.
pub(crate) struct ExtensionSlot {
    pub(crate) name: String,
    pub(crate) loc: Loc,
    pub(crate) graph_id: GraphId,
    pub(crate) runloop: RunloopHandle,
    pub(crate) state: StateCell,
    pub(crate) app: AppHandle,
    /// Live env proxies targeting this extension.
    pub(crate) proxy_count: AtomicUsize,
    /// Set once `on_deinit_done` was acked; deinit completes when this
    /// is set and `proxy_count` reaches zero.
    pub(crate) deinit_acked: AtomicBool,
    host: Mutex<Option<Host>>,
}

impl ExtensionSlot {
    pub(crate) fn new(
        name: impl Into<String>,
        loc: Loc,
        graph_id: GraphId,
        runloop: RunloopHandle,
        app: AppHandle,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            loc,
            graph_id,
            runloop,
            state: StateCell::new(),
            app,
            proxy_count: AtomicUsize::new(0),
            deinit_acked: AtomicBool::new(false),
            host: Mutex::new(None),
        })
    }

    /// Installs the extension and env. Runs on the owning runloop.
    pub(crate) fn install_host(&self, host: Host) {
        *self.host.lock() = Some(host);
    }

    /// Removes the host for destruction, breaking the slot ↔ env
    /// reference cycle. Runs on the owning runloop.
    pub(crate) fn take_host(&self) -> Option<Host> {
        self.host.lock().take()
    }

    /// Runs `f` with the extension and env. Must only be called from
    /// tasks on the owning runloop; the lock is never contended there.
    pub(crate) fn with_host(&self, f: impl FnOnce(&mut Box<dyn Extension>, &mut ExtensionEnv)) {
        let mut guard = self.host.lock();
        match guard.as_mut() {
            Some(host) => f(&mut host.extension, &mut host.env),
            None => debug!(extension = %self.name, "host already gone; task skipped"),
        }
    }
}

/// Posts delivery of an envelope to `slot`'s runloop.
pub(crate) fn deliver(slot: &Arc<ExtensionSlot>, envelope: Arc<Envelope>) {
    let target = Arc::clone(slot);
    let posted = slot.runloop.post_tail(move || {
        receive_on_runloop(&target, envelope);
    });
    if let Err(err) = posted {
        warn!(extension = %slot.name, %err, "delivery dropped, runloop closed");
    }
}

/// Runs on the destination runloop: buffer or dispatch.
fn receive_on_runloop(slot: &Arc<ExtensionSlot>, envelope: Arc<Envelope>) {
    slot.with_host(|extension, env| {
        let state = slot.state.get();
        // Buffer until the start barrier releases; also while earlier
        // buffered messages await their flush, so arrival order holds.
        if state.buffers_messages() || env.has_buffered_inbound() {
            env.buffer_inbound(envelope);
        } else {
            dispatch_inbound(extension, env, envelope);
        }
    });
}

/// Dispatches one envelope into the extension callbacks.
pub(crate) fn dispatch_inbound(
    extension: &mut Box<dyn Extension>,
    env: &mut ExtensionEnv,
    envelope: Arc<Envelope>,
) {
    // Sole holder after fan-out clones died: hand over exclusively.
    let mut owned = Arc::try_unwrap(envelope).unwrap_or_else(|shared| (*shared).clone());
    // The destination list is consumed by delivery; a re-send resolves
    // afresh against the connection table.
    owned.set_dests(Vec::new());
    match owned {
        Envelope::Cmd(cmd) => {
            if let Some(violation) = env.manifest_violation(&cmd) {
                warn!(
                    extension = env.name(),
                    cmd = %cmd.name,
                    %violation,
                    "command refused by manifest"
                );
                let mut result = CmdResult::from_cmd(StatusCode::Error, &cmd);
                let _ = result.set_property("error.code", "RT_INVALID_ARGUMENT");
                let _ = result.set_property("error.message", violation);
                if let Err(err) = env.return_result(result) {
                    debug!(extension = env.name(), error = %err.error, "refusal not routable");
                }
                return;
            }
            extension.on_cmd(env, cmd);
        }
        Envelope::CmdResult(result) => env.handle_inbound_result(result),
        Envelope::Data(data) => extension.on_data(env, data),
        Envelope::AudioFrame(frame) => extension.on_audio_frame(env, frame),
        Envelope::VideoFrame(frame) => extension.on_video_frame(env, frame),
    }
}

/// Flushes messages buffered before the start barrier released. Posted
/// by `on_start_done`.
pub(crate) fn flush_buffered(slot: &Arc<ExtensionSlot>) {
    slot.with_host(|extension, env| {
        for envelope in env.take_buffered_inbound() {
            dispatch_inbound(extension, env, envelope);
        }
    });
}

/// Completes deinit once both the ack and the last proxy release have
/// happened. Callable from any thread.
pub(crate) fn maybe_finish_deinit(slot: &Arc<ExtensionSlot>) {
    if !slot.deinit_acked.load(Ordering::SeqCst) {
        return;
    }
    if slot.proxy_count.load(Ordering::SeqCst) != 0 {
        return;
    }
    if slot
        .state
        .transition(ExtensionState::Deinitializing, ExtensionState::Deinitialized)
        .is_ok()
    {
        debug!(extension = %slot.name, "deinitialized");
        slot.app
            .notify_lifecycle(slot.graph_id, &slot.name, ExtensionState::Deinitialized);
    }
}
