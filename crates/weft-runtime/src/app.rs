//! The app: process-level host of graphs.
//!
//! An [`App`] owns one runloop (the *app runloop*) plus the addon
//! registry and the table of running graphs. Everything that mutates
//! those tables happens as a task on the app runloop; other threads
//! only post.
//!
//! # Privileged commands
//!
//! Two command names address the app itself (destination loc without
//! an extension):
//!
//! | Command | Effect |
//! |---------|--------|
//! | `start_graph` | builds a graph from the carried definition, drives its lifecycle, replies with the graph id in `detail` |
//! | `close_app` | stops every graph in reverse lifecycle order, then stops the app runloop |
//!
//! # Lifecycle coordination
//!
//! The app runloop is the graph coordinator: every `on_*_done` ack
//! lands here, and a phase advances only once every extension of the
//! graph has acked the previous one. That is the barrier that
//! guarantees no extension sees `on_start` before all of its peers
//! finished `on_init`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use weft_msg::{Cmd, CmdResult, Envelope, Message, PropertyMap, PropertyValue, StatusCode};
use weft_types::{CorrelationId, GraphId, Loc};

use crate::addon::AddonRegistry;
use crate::client::Client;
use crate::graph::def::GraphDefinition;
use crate::graph::route::RouteTable;
use crate::graph::slot::{self, ExtensionSlot, GraphContext, Host};
use crate::lifecycle::ExtensionState;
use crate::runloop::{Runloop, RunloopHandle};
use crate::{ExtensionEnv, RuntimeError};

pub(crate) const CMD_START_GRAPH: &str = "start_graph";
pub(crate) const CMD_CLOSE_APP: &str = "close_app";

/// App property carrying the mandatory app URI.
pub const PROP_URI: &str = "weft.uri";
/// App property selecting the log level (`0..=6`).
pub const PROP_LOG_LEVEL: &str = "weft.log.level";

pub(crate) fn is_privileged_cmd(name: &str) -> bool {
    name == CMD_START_GRAPH || name == CMD_CLOSE_APP
}

/// Sleeps a few microseconds before lifecycle callbacks so tests can
/// shake out ordering assumptions. Compiled out by default.
pub(crate) fn lifecycle_jitter() {
    #[cfg(feature = "test-jitter")]
    {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        std::thread::sleep(std::time::Duration::from_micros(u64::from(nanos % 5_000)));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GraphPhase {
    Configuring,
    Initializing,
    Starting,
    Running,
    Stopping,
    Deinitializing,
}

struct GraphRuntime {
    context: Arc<GraphContext>,
    groups: Vec<(RunloopHandle, std::thread::JoinHandle<()>)>,
    /// Original `start_graph` command, kept to build the reply.
    start_cmd: Option<Cmd>,
    phase: GraphPhase,
}

struct AppState {
    graphs: HashMap<GraphId, GraphRuntime>,
    closing: bool,
}

pub(crate) struct ClientSink {
    tx: crossbeam_channel::Sender<CmdResult>,
    remaining_finals: usize,
}

pub(crate) struct AppShared {
    pub(crate) uri: String,
    registry: AddonRegistry,
    state: Mutex<AppState>,
    client_sinks: Mutex<HashMap<CorrelationId, ClientSink>>,
}

/// Cheap cross-thread handle to the app: the app runloop plus shared
/// tables.
#[derive(Clone)]
pub(crate) struct AppHandle {
    pub(crate) runloop: RunloopHandle,
    pub(crate) shared: Arc<AppShared>,
}

/// An app process: hosts graphs, owns the app runloop.
///
/// # Example
///
/// ```no_run
/// use weft_runtime::{AddonRegistry, App};
///
/// let registry = AddonRegistry::new();
/// let app = App::new(registry, r#"{ "weft": { "uri": "app://demo" } }"#).unwrap();
/// let client = app.client();
/// let join = std::thread::spawn(move || app.run());
/// // ... drive the app through `client` ...
/// client.close_app().unwrap();
/// join.join().unwrap();
/// ```
pub struct App {
    runloop: Runloop,
    handle: AppHandle,
}

impl App {
    /// Creates an app from its addon registry and property JSON.
    ///
    /// The property document must carry a string at `weft.uri`; an
    /// integer at `weft.log.level` (0..=6, default 3) selects the
    /// tracing level.
    ///
    /// # Errors
    ///
    /// `RT_INVALID_ARGUMENT` on malformed JSON or a missing URI.
    pub fn new(registry: AddonRegistry, property_json: &str) -> Result<Self, RuntimeError> {
        let json: serde_json::Value = serde_json::from_str(property_json)
            .map_err(|e| RuntimeError::InvalidArgument(format!("invalid app properties: {e}")))?;
        let properties = match PropertyValue::from_json(&json) {
            PropertyValue::Object(map) => map,
            _ => {
                return Err(RuntimeError::InvalidArgument(
                    "app properties must be a JSON object".into(),
                ))
            }
        };

        let uri = weft_msg::property_get(&properties, PROP_URI)
            .ok()
            .flatten()
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| {
                RuntimeError::InvalidArgument(format!("app property '{PROP_URI}' is mandatory"))
            })?;

        let level = weft_msg::property_get(&properties, PROP_LOG_LEVEL)
            .ok()
            .flatten()
            .and_then(PropertyValue::to_i64)
            .unwrap_or(3);
        init_tracing(level);

        let (runloop, handle) = Runloop::new(format!("app:{uri}"));
        let shared = Arc::new(AppShared {
            uri,
            registry,
            state: Mutex::new(AppState {
                graphs: HashMap::new(),
                closing: false,
            }),
            client_sinks: Mutex::new(HashMap::new()),
        });

        Ok(Self {
            runloop,
            handle: AppHandle {
                runloop: handle,
                shared,
            },
        })
    }

    /// This app's URI.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.handle.shared.uri
    }

    /// Returns an in-process client for driving this app from other
    /// threads.
    #[must_use]
    pub fn client(&self) -> Client {
        Client::new(self.handle.clone())
    }

    /// Runs the app runloop on the calling thread.
    ///
    /// Returns only after a `close_app` command has stopped every
    /// graph, which includes waiting for each extension's
    /// `on_stop_done` and `on_deinit_done`.
    pub fn run(self) {
        info!(uri = %self.handle.shared.uri, "app running");
        self.runloop.run();
        // Unblock clients still waiting on results; dropping the
        // senders closes their streams.
        self.handle.shared.client_sinks.lock().clear();
        info!(uri = %self.handle.shared.uri, "app stopped");
    }
}

fn init_tracing(level: i64) {
    use tracing_subscriber::filter::LevelFilter;
    let filter = match level {
        0 => LevelFilter::OFF,
        1 => LevelFilter::ERROR,
        2 => LevelFilter::WARN,
        3 => LevelFilter::INFO,
        4 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    // Another subscriber may already be installed (tests host several
    // apps in one process); keep whichever won.
    let _ = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .try_init();
}

// ----------------------------------------------------------------------
// AppHandle: entry points posted from other threads
// ----------------------------------------------------------------------

impl AppHandle {
    /// Loc representing external clients of this app.
    pub(crate) fn client_loc(&self) -> Loc {
        Loc::new(Some(self.shared.uri.clone()), None::<String>, None::<String>)
    }

    /// Submits a client command together with its result sink.
    pub(crate) fn submit_client_cmd(
        &self,
        cmd: Cmd,
        tx: crossbeam_channel::Sender<CmdResult>,
    ) -> Result<(), RuntimeError> {
        let handle = self.clone();
        self.runloop
            .post_tail(move || client_submit(&handle, cmd, tx))
            .map_err(|_| RuntimeError::Closed)
    }

    /// Submits a command addressed at the app itself, expecting no
    /// reply. Used by [`Client::close_app`].
    pub(crate) fn submit_app_cmd(&self, cmd: Cmd) -> Result<(), RuntimeError> {
        let handle = self.clone();
        self.runloop
            .post_tail(move || dispatch_app_cmd(&handle, cmd))
            .map_err(|_| RuntimeError::Closed)
    }

    /// Submits a privileged command envelope from inside a graph.
    pub(crate) fn submit_envelope(&self, envelope: Arc<Envelope>) {
        let handle = self.clone();
        let posted = self.runloop.post_tail(move || {
            if let Envelope::Cmd(cmd) = (*envelope).clone() {
                dispatch_app_cmd(&handle, cmd);
            }
        });
        if posted.is_err() {
            debug!("privileged command dropped, app runloop closed");
        }
    }

    /// Records a lifecycle ack; the coordinator advances barriers on
    /// the app runloop.
    pub(crate) fn notify_lifecycle(&self, graph_id: GraphId, name: &str, state: ExtensionState) {
        let handle = self.clone();
        let name = name.to_string();
        let name_for_log = name.clone();
        let posted = self.runloop.post_tail(move || {
            on_lifecycle_ack(&handle, graph_id, &name, state);
        });
        if posted.is_err() {
            debug!(extension = %name_for_log, "lifecycle ack after app stop");
        }
    }

    /// Delivers a result addressed to an external client. Safe to call
    /// from any thread.
    pub(crate) fn deliver_client_result(&self, mut result: CmdResult) {
        let Some(id) = result.correlation_id else {
            debug!("client result without correlation id dropped");
            return;
        };
        let mut sinks = self.shared.client_sinks.lock();
        let Some(sink) = sinks.get_mut(&id) else {
            debug!(%id, "client result for unknown correlation id dropped");
            return;
        };

        let overall_final = if result.is_final {
            sink.remaining_finals -= 1;
            sink.remaining_finals == 0
        } else {
            false
        };
        result.is_final = overall_final;
        result.is_completed = overall_final && result.status_code == StatusCode::Ok;

        if sink.tx.send(result).is_err() {
            debug!(%id, "client sink dropped");
        }
        if overall_final {
            sinks.remove(&id);
        }
    }

    /// Builds and delivers a synchronous error reply for a client
    /// command that could not be dispatched.
    fn reply_client_error(&self, cmd: &Cmd, err: &RuntimeError) {
        use weft_types::ErrorCode;
        let mut result = CmdResult::from_cmd(StatusCode::Error, cmd);
        let _ = result.set_property("error.code", err.code());
        let _ = result.set_property("error.message", err.to_string());
        self.deliver_client_result(result);
    }
}

// ----------------------------------------------------------------------
// App-runloop tasks
// ----------------------------------------------------------------------

fn client_submit(handle: &AppHandle, mut cmd: Cmd, tx: crossbeam_channel::Sender<CmdResult>) {
    let id = CorrelationId::new();
    cmd.correlation_id = Some(id);
    if cmd.src.is_empty() {
        cmd.src = handle.client_loc();
    }
    handle.shared.client_sinks.lock().insert(
        id,
        ClientSink {
            tx,
            remaining_finals: 1,
        },
    );

    // No destination means the app itself.
    if cmd.dests.is_empty() {
        cmd.dests = vec![Loc::empty()];
    }

    // Split app-level and extension destinations.
    let mut ext_dests: Vec<Arc<ExtensionSlot>> = Vec::new();
    let mut app_level = false;
    for dest in &cmd.dests {
        match &dest.extension {
            None => app_level = true,
            Some(ext_name) => match find_slot(handle, dest.graph_id.as_deref(), ext_name) {
                Ok(slot) => ext_dests.push(slot),
                Err(err) => {
                    warn!(cmd = %cmd.name, %err, "client command not routable");
                    handle.reply_client_error(&cmd, &err);
                    return;
                }
            },
        }
    }

    if app_level {
        if ext_dests.is_empty() && is_privileged_cmd(&cmd.name) {
            dispatch_app_cmd(handle, cmd);
        } else {
            let err = RuntimeError::not_connected(weft_msg::MsgKind::Cmd, &cmd.name);
            handle.reply_client_error(&cmd, &err);
        }
        return;
    }

    handle
        .shared
        .client_sinks
        .lock()
        .get_mut(&id)
        .expect("sink registered above")
        .remaining_finals = ext_dests.len();

    let envelope = Arc::new(Envelope::Cmd(cmd));
    for dest in ext_dests {
        slot::deliver(&dest, Arc::clone(&envelope));
    }
}

/// Looks up an extension slot by graph id (string form) and name. An
/// absent or empty graph id is accepted while exactly one graph runs.
fn find_slot(
    handle: &AppHandle,
    graph_id: Option<&str>,
    extension: &str,
) -> Result<Arc<ExtensionSlot>, RuntimeError> {
    let state = handle.shared.state.lock();
    let graph = match graph_id {
        Some(id) if !id.is_empty() => {
            let parsed: GraphId = id
                .parse()
                .map_err(|_| RuntimeError::InvalidArgument(format!("bad graph id '{id}'")))?;
            state.graphs.get(&parsed)
        }
        _ => {
            if state.graphs.len() == 1 {
                state.graphs.values().next()
            } else {
                return Err(RuntimeError::InvalidArgument(
                    "graph id required when multiple graphs run".into(),
                ));
            }
        }
    };
    let graph = graph
        .ok_or_else(|| RuntimeError::InvalidArgument("no such graph".into()))?;
    let slot = graph
        .context
        .slot(extension)
        .ok_or_else(|| RuntimeError::not_connected(weft_msg::MsgKind::Cmd, extension))?;
    if !slot.state.get().accepts_messages() {
        return Err(RuntimeError::not_connected(weft_msg::MsgKind::Cmd, extension));
    }
    Ok(Arc::clone(slot))
}

fn dispatch_app_cmd(handle: &AppHandle, cmd: Cmd) {
    match cmd.name.as_str() {
        CMD_START_GRAPH => handle_start_graph(handle, cmd),
        CMD_CLOSE_APP => handle_close_app(handle),
        other => {
            let err = RuntimeError::InvalidArgument(format!("unknown app command '{other}'"));
            warn!(%err, "app command rejected");
            route_result_error(handle, &cmd, &err);
        }
    }
}

fn handle_start_graph(handle: &AppHandle, cmd: Cmd) {
    let def = match GraphDefinition::from_start_graph_cmd(&cmd) {
        Ok(def) => def,
        Err(err) => {
            warn!(%err, "start_graph rejected");
            route_result_error(handle, &cmd, &err);
            return;
        }
    };
    for node in &def.nodes {
        if !handle.shared.registry.contains(&node.addon) {
            let err =
                RuntimeError::InvalidArgument(format!("unknown addon: '{}'", node.addon));
            warn!(%err, "start_graph rejected");
            route_result_error(handle, &cmd, &err);
            return;
        }
    }

    let graph_id = GraphId::new();
    info!(graph = %graph_id, nodes = def.nodes.len(), "starting graph");

    // One runloop thread per extension group.
    let mut groups: HashMap<String, RunloopHandle> = HashMap::new();
    let mut joins = Vec::new();
    for node in &def.nodes {
        let group = GraphDefinition::group_of(node);
        if !groups.contains_key(&group) {
            let (rl, join) = Runloop::spawn(format!("group:{group}"));
            groups.insert(group.clone(), rl.clone());
            joins.push((rl, join));
        }
    }

    // Slots first, context second; both frozen before any extension
    // code runs.
    let mut extensions = HashMap::new();
    for node in &def.nodes {
        let group = GraphDefinition::group_of(node);
        let loc = Loc::new(
            Some(handle.shared.uri.clone()),
            Some(graph_id.to_string()),
            Some(node.name.clone()),
        );
        let slot = ExtensionSlot::new(
            node.name.clone(),
            loc,
            graph_id,
            groups[&group].clone(),
            handle.clone(),
        );
        extensions.insert(node.name.clone(), slot);
    }

    let mut routes = RouteTable::default();
    for conn in &def.connections {
        for (kind, route) in conn.routes() {
            let dests: Vec<Loc> = route
                .dest
                .iter()
                .map(|d| {
                    Loc::new(
                        Some(handle.shared.uri.clone()),
                        Some(graph_id.to_string()),
                        Some(d.extension.clone()),
                    )
                })
                .collect();
            routes.insert(conn.extension.clone(), kind, route.name.clone(), dests);
        }
    }

    let context = Arc::new(GraphContext {
        graph_id,
        app_uri: handle.shared.uri.clone(),
        routes,
        extensions,
        app: handle.clone(),
    });

    handle.shared.state.lock().graphs.insert(
        graph_id,
        GraphRuntime {
            context: Arc::clone(&context),
            groups: joins,
            start_cmd: Some(cmd),
            phase: GraphPhase::Configuring,
        },
    );

    // Create each extension on its own runloop and begin configure.
    for node in &def.nodes {
        let slot = Arc::clone(&context.extensions[&node.name]);
        let extension = handle
            .shared
            .registry
            .instantiate(&node.addon)
            .expect("addon checked above");
        let properties = node
            .property
            .as_ref()
            .map(|json| match PropertyValue::from_json(json) {
                PropertyValue::Object(map) => map,
                other => {
                    let mut map = PropertyMap::new();
                    map.insert("value".into(), other);
                    map
                }
            })
            .unwrap_or_default();
        let env = ExtensionEnv::new(Arc::clone(&slot), Arc::clone(&context), properties);

        let target = Arc::clone(&slot);
        let posted = slot.runloop.post_tail(move || {
            target.install_host(Host { extension, env });
            if target
                .state
                .transition(ExtensionState::Created, ExtensionState::Configuring)
                .is_err()
            {
                error!(extension = %target.name, "unexpected state at configure");
                return;
            }
            lifecycle_jitter();
            target.with_host(|extension, env| extension.on_configure(env));
        });
        if posted.is_err() {
            error!(extension = %node.name, "group runloop refused configure task");
        }
    }
}

fn handle_close_app(handle: &AppHandle) {
    let mut state = handle.shared.state.lock();
    if state.closing {
        return;
    }
    state.closing = true;
    info!("closing app");

    if state.graphs.is_empty() {
        drop(state);
        handle.runloop.stop();
        return;
    }
    let running: Vec<GraphId> = state
        .graphs
        .iter()
        .filter(|(_, g)| g.phase == GraphPhase::Running)
        .map(|(id, _)| *id)
        .collect();
    drop(state);

    // Graphs still starting finish their start barrier first; the
    // Running ack begins their stop.
    for graph_id in running {
        begin_graph_stop(handle, graph_id);
    }
}

fn begin_graph_stop(handle: &AppHandle, graph_id: GraphId) {
    let context = {
        let mut state = handle.shared.state.lock();
        let Some(graph) = state.graphs.get_mut(&graph_id) else {
            return;
        };
        if graph.phase != GraphPhase::Running {
            return;
        }
        graph.phase = GraphPhase::Stopping;
        Arc::clone(&graph.context)
    };
    info!(graph = %graph_id, "stopping graph");
    drive_phase(&context, ExtensionState::Started, ExtensionState::Stopping);
}

/// Posts the callback of `to` onto every extension of the graph.
fn drive_phase(context: &Arc<GraphContext>, from: ExtensionState, to: ExtensionState) {
    for slot in context.extensions.values() {
        let target = Arc::clone(slot);
        let posted = slot.runloop.post_tail(move || {
            if let Err(actual) = target.state.transition(from, to) {
                error!(
                    extension = %target.name,
                    expected = %from,
                    %actual,
                    "lifecycle drive out of order"
                );
                return;
            }
            lifecycle_jitter();
            target.with_host(|extension, env| match to {
                ExtensionState::Initializing => extension.on_init(env),
                ExtensionState::Starting => extension.on_start(env),
                ExtensionState::Stopping => extension.on_stop(env),
                ExtensionState::Deinitializing => extension.on_deinit(env),
                other => error!(state = %other, "not a drivable phase"),
            });
        });
        if posted.is_err() {
            error!(extension = %slot.name, "group runloop refused lifecycle task");
        }
    }
}

fn all_at_least(graph: &GraphRuntime, min: ExtensionState) -> bool {
    graph
        .context
        .extensions
        .values()
        .all(|slot| slot.state.get() >= min)
}

fn on_lifecycle_ack(handle: &AppHandle, graph_id: GraphId, name: &str, state: ExtensionState) {
    debug!(graph = %graph_id, extension = %name, state = %state, "lifecycle ack");

    let mut app_state = handle.shared.state.lock();
    let Some(graph) = app_state.graphs.get_mut(&graph_id) else {
        return;
    };

    match state {
        ExtensionState::Configured
            if graph.phase == GraphPhase::Configuring && all_at_least(graph, state) =>
        {
            graph.phase = GraphPhase::Initializing;
            let context = Arc::clone(&graph.context);
            drop(app_state);
            drive_phase(&context, ExtensionState::Configured, ExtensionState::Initializing);
        }
        ExtensionState::Initialized
            if graph.phase == GraphPhase::Initializing && all_at_least(graph, state) =>
        {
            graph.phase = GraphPhase::Starting;
            let context = Arc::clone(&graph.context);
            drop(app_state);
            drive_phase(&context, ExtensionState::Initialized, ExtensionState::Starting);
        }
        ExtensionState::Started
            if graph.phase == GraphPhase::Starting && all_at_least(graph, state) =>
        {
            graph.phase = GraphPhase::Running;
            let start_cmd = graph.start_cmd.take();
            let closing = app_state.closing;
            drop(app_state);

            info!(graph = %graph_id, "graph started");
            if let Some(cmd) = start_cmd {
                let mut result = CmdResult::from_cmd(StatusCode::Ok, &cmd);
                let _ = result.set_property("detail", graph_id.to_string());
                route_result(handle, result);
            }
            if closing {
                begin_graph_stop(handle, graph_id);
            }
        }
        ExtensionState::Stopped
            if graph.phase == GraphPhase::Stopping && all_at_least(graph, state) =>
        {
            graph.phase = GraphPhase::Deinitializing;
            let context = Arc::clone(&graph.context);
            drop(app_state);
            drive_phase(&context, ExtensionState::Stopped, ExtensionState::Deinitializing);
        }
        ExtensionState::Deinitialized
            if graph.phase == GraphPhase::Deinitializing && all_at_least(graph, state) =>
        {
            drop(app_state);
            teardown_graph(handle, graph_id);
        }
        _ => {}
    }
}

fn teardown_graph(handle: &AppHandle, graph_id: GraphId) {
    let Some(graph) = handle.shared.state.lock().graphs.remove(&graph_id) else {
        return;
    };
    info!(graph = %graph_id, "tearing down graph");

    // Dropping the host breaks the slot ↔ env cycle and frees the
    // extension on its own thread.
    for slot in graph.context.extensions.values() {
        let target = Arc::clone(slot);
        let _ = slot.runloop.post_tail(move || {
            drop(target.take_host());
        });
    }
    for (rl, join) in graph.groups {
        rl.stop();
        if join.join().is_err() {
            error!(graph = %graph_id, "group thread panicked");
        }
    }

    let state = handle.shared.state.lock();
    if state.closing && state.graphs.is_empty() {
        drop(state);
        handle.runloop.stop();
    }
}

/// Routes a result by its captured origin: extensionless origins go to
/// the client sinks, everything else back into the graph.
fn route_result(handle: &AppHandle, result: CmdResult) {
    let origin = result.dests().first().cloned().unwrap_or_default();
    match origin.extension {
        None => handle.deliver_client_result(result),
        Some(ext_name) => {
            match find_slot(handle, origin.graph_id.as_deref(), &ext_name) {
                Ok(dest) => slot::deliver(&dest, Arc::new(Envelope::CmdResult(result))),
                Err(err) => debug!(%err, "result origin no longer reachable"),
            }
        }
    }
}

fn route_result_error(handle: &AppHandle, cmd: &Cmd, err: &RuntimeError) {
    use weft_types::ErrorCode;
    let mut result = CmdResult::from_cmd(StatusCode::Error, cmd);
    let _ = result.set_property("error.code", err.code());
    let _ = result.set_property("error.message", err.to_string());
    route_result(handle, result);
}
