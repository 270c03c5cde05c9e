//! Standalone extension testing.
//!
//! The harness embeds an addon under test into a minimal two-node
//! graph: the subject plus a *bridge* extension that forwards every
//! inbound message to a user-written [`ExtensionTester`] running on
//! its own runloop. The bridge is symmetric: the tester sends through
//! an [`EnvTester`], which hops onto the bridge's runloop and performs
//! the real send there, so test code observes exactly the dispatch
//! contract an extension would.
//!
//! ```no_run
//! use weft_msg::Cmd;
//! use weft_runtime::testing::{EnvTester, ExtensionTester, TestHarness};
//! use weft_runtime::AddonRegistry;
//!
//! struct PingTester;
//!
//! impl ExtensionTester for PingTester {
//!     fn on_start(&mut self, env: &mut EnvTester) {
//!         let cmd = Cmd::new("ping");
//!         env.send_cmd_with(cmd, |env, result, _err| {
//!             let ok = result.is_some_and(|r| r.status_code.is_ok());
//!             env.stop_test(if ok { Ok(()) } else { Err("ping failed".into()) });
//!         })
//!         .unwrap();
//!     }
//! }
//!
//! let mut registry = AddonRegistry::new();
//! // registry.register("my_addon", || MyExtension::new());
//! let harness = TestHarness::new(PingTester, registry, "my_addon").unwrap();
//! harness.run().unwrap();
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;
use weft_msg::{AudioFrame, Cmd, CmdResult, Data, VideoFrame};

use crate::addon::AddonRegistry;
use crate::app::App;
use crate::graph::def;
use crate::runloop::RunloopHandle;
use crate::{EnvProxy, Extension, ExtensionEnv, Runloop, RuntimeError};

/// Addon name the harness registers its bridge under.
const BRIDGE_ADDON: &str = "weft_test_bridge";
/// Node name of the bridge inside the harness graph.
const BRIDGE_NODE: &str = "test_bridge";
/// Bridge node property carrying the registry key.
const TOKEN_PROP: &str = "tester_token";

/// Verdict of a harness run.
pub type TestResult = Result<(), String>;

/// User-written driver attached to a graph through the harness.
///
/// All callbacks run on the tester's own runloop, never concurrently.
pub trait ExtensionTester: Send + 'static {
    /// The graph is live; start driving the subject.
    fn on_start(&mut self, env: &mut EnvTester) {
        let _ = env;
    }

    /// A command the subject routed at the bridge.
    fn on_cmd(&mut self, env: &mut EnvTester, cmd: Cmd) {
        let _ = (env, cmd);
    }

    /// A data message from the subject.
    fn on_data(&mut self, env: &mut EnvTester, data: Data) {
        let _ = (env, data);
    }

    /// An audio frame from the subject.
    fn on_audio_frame(&mut self, env: &mut EnvTester, frame: AudioFrame) {
        let _ = (env, frame);
    }

    /// A video frame from the subject.
    fn on_video_frame(&mut self, env: &mut EnvTester, frame: VideoFrame) {
        let _ = (env, frame);
    }

    /// The graph is stopping underneath the tester.
    fn on_stop(&mut self, env: &mut EnvTester) {
        let _ = env;
    }
}

struct TesterHost {
    tester: Box<dyn ExtensionTester>,
    env: EnvTester,
}

/// Where the bridge forwards to: the tester runloop plus its host
/// cell.
#[derive(Clone)]
struct TesterChannel {
    runloop: RunloopHandle,
    host: Arc<Mutex<Option<TesterHost>>>,
}

impl TesterChannel {
    /// Posts `f` onto the tester runloop with the live tester + env.
    fn post(&self, f: impl FnOnce(&mut Box<dyn ExtensionTester>, &mut EnvTester) + Send + 'static) {
        let host = Arc::clone(&self.host);
        let posted = self.runloop.post_tail(move || {
            let mut guard = host.lock();
            match guard.as_mut() {
                Some(host) => f(&mut host.tester, &mut host.env),
                None => debug!("tester already detached; forward dropped"),
            }
        });
        if posted.is_err() {
            debug!("tester runloop closed; forward dropped");
        }
    }
}

/// Maps tester tokens to their channels, so a bridge inside a freshly
/// started graph can find its tester without smuggling pointers
/// through properties.
#[derive(Default)]
struct TesterRegistry {
    channels: Mutex<HashMap<String, TesterChannel>>,
}

impl TesterRegistry {
    fn insert(&self, token: String, channel: TesterChannel) {
        self.channels.lock().insert(token, channel);
    }

    fn get(&self, token: &str) -> Option<TesterChannel> {
        self.channels.lock().get(token).cloned()
    }
}

/// The tester's sending façade, mirroring [`ExtensionEnv`]'s contract
/// from outside the graph.
///
/// Every send hops onto the bridge extension's runloop and executes
/// there; result handlers hop back onto the tester runloop.
pub struct EnvTester {
    proxy: Option<EnvProxy>,
    channel: TesterChannel,
    verdict_tx: crossbeam_channel::Sender<TestResult>,
}

impl EnvTester {
    fn proxy(&self) -> Result<&EnvProxy, RuntimeError> {
        self.proxy
            .as_ref()
            .ok_or_else(|| RuntimeError::InvalidState("tester is not attached yet".into()))
    }

    /// Sends a command, discarding its results.
    ///
    /// # Errors
    ///
    /// `RT_INVALID_STATE` before attach, `RT_CLOSED` after shutdown.
    /// Routing failures surface asynchronously in logs only; use
    /// [`send_cmd_with`](Self::send_cmd_with) to observe them.
    pub fn send_cmd(&mut self, cmd: Cmd) -> Result<(), RuntimeError> {
        self.proxy()?.notify(move |ext_env| {
            if let Err(err) = ext_env.send_cmd(cmd) {
                warn!(error = %err.error, "tester send_cmd failed");
            }
        })
    }

    /// Sends a command with single-result semantics. The handler runs
    /// on the tester runloop; a send failure reaches it as `err`.
    ///
    /// # Errors
    ///
    /// `RT_INVALID_STATE` before attach, `RT_CLOSED` after shutdown.
    pub fn send_cmd_with<H>(&mut self, cmd: Cmd, handler: H) -> Result<(), RuntimeError>
    where
        H: FnMut(&mut EnvTester, Option<CmdResult>, Option<RuntimeError>) + Send + 'static,
    {
        self.bridge_cmd(cmd, handler, false)
    }

    /// Sends a command with multi-result semantics; the handler fires
    /// for every surfaced result.
    ///
    /// # Errors
    ///
    /// `RT_INVALID_STATE` before attach, `RT_CLOSED` after shutdown.
    pub fn send_cmd_ex<H>(&mut self, cmd: Cmd, handler: H) -> Result<(), RuntimeError>
    where
        H: FnMut(&mut EnvTester, Option<CmdResult>, Option<RuntimeError>) + Send + 'static,
    {
        self.bridge_cmd(cmd, handler, true)
    }

    fn bridge_cmd<H>(&mut self, cmd: Cmd, handler: H, multi: bool) -> Result<(), RuntimeError>
    where
        H: FnMut(&mut EnvTester, Option<CmdResult>, Option<RuntimeError>) + Send + 'static,
    {
        let channel = self.channel.clone();
        let handler = Arc::new(Mutex::new(handler));
        self.proxy()?.notify(move |ext_env| {
            let hop_channel = channel.clone();
            let hop_handler = Arc::clone(&handler);
            let relay = move |_env: &mut ExtensionEnv,
                              result: Option<CmdResult>,
                              err: Option<RuntimeError>| {
                forward_to_tester(&hop_channel, Arc::clone(&hop_handler), result, err);
            };
            let outcome = if multi {
                ext_env.send_cmd_ex(cmd, relay)
            } else {
                ext_env.send_cmd_with(cmd, relay)
            };
            if let Err(send_err) = outcome {
                let (err, _cmd) = send_err.into_parts();
                forward_to_tester(&channel, handler, None, Some(err));
            }
        })
    }

    /// Sends a one-way data message.
    ///
    /// # Errors
    ///
    /// `RT_INVALID_STATE` before attach, `RT_CLOSED` after shutdown.
    pub fn send_data(&mut self, data: Data) -> Result<(), RuntimeError> {
        self.proxy()?.notify(move |ext_env| {
            if let Err(err) = ext_env.send_data(data) {
                warn!(error = %err.error, "tester send_data failed");
            }
        })
    }

    /// Sends a one-way audio frame.
    ///
    /// # Errors
    ///
    /// `RT_INVALID_STATE` before attach, `RT_CLOSED` after shutdown.
    pub fn send_audio_frame(&mut self, frame: AudioFrame) -> Result<(), RuntimeError> {
        self.proxy()?.notify(move |ext_env| {
            if let Err(err) = ext_env.send_audio_frame(frame) {
                warn!(error = %err.error, "tester send_audio_frame failed");
            }
        })
    }

    /// Sends a one-way video frame.
    ///
    /// # Errors
    ///
    /// `RT_INVALID_STATE` before attach, `RT_CLOSED` after shutdown.
    pub fn send_video_frame(&mut self, frame: VideoFrame) -> Result<(), RuntimeError> {
        self.proxy()?.notify(move |ext_env| {
            if let Err(err) = ext_env.send_video_frame(frame) {
                warn!(error = %err.error, "tester send_video_frame failed");
            }
        })
    }

    /// Routes a result back to a command's originator, exactly as the
    /// bridge extension would.
    ///
    /// # Errors
    ///
    /// `RT_INVALID_STATE` before attach, `RT_CLOSED` after shutdown.
    pub fn return_result(&mut self, result: CmdResult) -> Result<(), RuntimeError> {
        self.proxy()?.notify(move |ext_env| {
            if let Err(err) = ext_env.return_result(result) {
                warn!(error = %err.error, "tester return_result failed");
            }
        })
    }

    /// Ends the test with `verdict`. The harness unwinds the graph and
    /// [`TestHarness::run`] returns the verdict.
    pub fn stop_test(&mut self, verdict: TestResult) {
        if self.verdict_tx.send(verdict).is_err() {
            debug!("verdict already delivered");
        }
    }
}

fn forward_to_tester<H>(
    channel: &TesterChannel,
    handler: Arc<Mutex<H>>,
    result: Option<CmdResult>,
    err: Option<RuntimeError>,
) where
    H: FnMut(&mut EnvTester, Option<CmdResult>, Option<RuntimeError>) + Send + 'static,
{
    channel.post(move |_tester, env| {
        (handler.lock())(env, result, err);
    });
}

/// The in-graph half of the harness: forwards everything it receives
/// to the tester channel.
struct BridgeExtension {
    registry: Arc<TesterRegistry>,
    channel: Option<TesterChannel>,
}

impl BridgeExtension {
    fn channel(&self) -> Option<&TesterChannel> {
        self.channel.as_ref()
    }
}

impl Extension for BridgeExtension {
    fn on_configure(&mut self, env: &mut ExtensionEnv) {
        match env
            .get_property_string(TOKEN_PROP)
            .ok()
            .and_then(|token| self.registry.get(&token))
        {
            Some(channel) => self.channel = Some(channel),
            None => warn!("bridge has no tester; forwards will drop"),
        }
        let _ = env.on_configure_done();
    }

    fn on_start(&mut self, env: &mut ExtensionEnv) {
        if let Some(channel) = self.channel() {
            match EnvProxy::new(env) {
                Ok(proxy) => channel.post(move |tester, tester_env| {
                    tester_env.proxy = Some(proxy);
                    tester.on_start(tester_env);
                }),
                Err(err) => warn!(%err, "bridge could not create proxy"),
            }
        }
        let _ = env.on_start_done();
    }

    fn on_stop(&mut self, env: &mut ExtensionEnv) {
        if let Some(channel) = self.channel() {
            channel.post(|tester, tester_env| tester.on_stop(tester_env));
        }
        let _ = env.on_stop_done();
    }

    fn on_cmd(&mut self, _env: &mut ExtensionEnv, cmd: Cmd) {
        if let Some(channel) = self.channel() {
            channel.post(move |tester, env| tester.on_cmd(env, cmd));
        }
    }

    fn on_data(&mut self, _env: &mut ExtensionEnv, data: Data) {
        if let Some(channel) = self.channel() {
            channel.post(move |tester, env| tester.on_data(env, data));
        }
    }

    fn on_audio_frame(&mut self, _env: &mut ExtensionEnv, frame: AudioFrame) {
        if let Some(channel) = self.channel() {
            channel.post(move |tester, env| tester.on_audio_frame(env, frame));
        }
    }

    fn on_video_frame(&mut self, _env: &mut ExtensionEnv, frame: VideoFrame) {
        if let Some(channel) = self.channel() {
            channel.post(move |tester, env| tester.on_video_frame(env, frame));
        }
    }
}

/// Embeds an addon under test in a throwaway app and drives it with an
/// [`ExtensionTester`].
pub struct TestHarness {
    app: App,
    subject: String,
    token: String,
    tester_runloop: RunloopHandle,
    tester_join: std::thread::JoinHandle<()>,
    host: Arc<Mutex<Option<TesterHost>>>,
    verdict_rx: crossbeam_channel::Receiver<TestResult>,
    timeout: Duration,
}

impl TestHarness {
    /// Builds a harness around `tester` and the addon named
    /// `subject` (which must be present in `registry`).
    ///
    /// # Errors
    ///
    /// `RT_INVALID_ARGUMENT` when the subject addon is missing.
    pub fn new(
        tester: impl ExtensionTester,
        mut registry: AddonRegistry,
        subject: &str,
    ) -> Result<Self, RuntimeError> {
        if !registry.contains(subject) {
            return Err(RuntimeError::InvalidArgument(format!(
                "subject addon '{subject}' is not registered"
            )));
        }

        let token = Uuid::new_v4().to_string();
        let (tester_runloop, tester_join) = Runloop::spawn("tester");
        let (verdict_tx, verdict_rx) = crossbeam_channel::bounded(1);

        let host = Arc::new(Mutex::new(None));
        let channel = TesterChannel {
            runloop: tester_runloop.clone(),
            host: Arc::clone(&host),
        };
        *host.lock() = Some(TesterHost {
            tester: Box::new(tester),
            env: EnvTester {
                proxy: None,
                channel: channel.clone(),
                verdict_tx,
            },
        });

        let testers = Arc::new(TesterRegistry::default());
        testers.insert(token.clone(), channel);
        let bridge_registry = Arc::clone(&testers);
        registry.register_boxed(BRIDGE_ADDON, move || {
            Box::new(BridgeExtension {
                registry: Arc::clone(&bridge_registry),
                channel: None,
            }) as Box<dyn Extension>
        });

        let app = App::new(
            registry,
            &format!(r#"{{ "weft": {{ "uri": "test://{token}", "log": {{ "level": 2 }} }} }}"#),
        )?;

        Ok(Self {
            app,
            subject: subject.to_string(),
            token,
            tester_runloop,
            tester_join,
            host,
            verdict_rx,
            timeout: Duration::from_secs(60),
        })
    }

    /// Replaces the verdict deadline (default 60 s).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Starts the harness graph, waits for
    /// [`EnvTester::stop_test`], unwinds everything, and returns the
    /// verdict.
    ///
    /// # Errors
    ///
    /// The tester's verdict, or a description of a harness-level
    /// failure (graph refused to start, verdict deadline passed).
    pub fn run(self) -> TestResult {
        let Self {
            app,
            subject,
            token,
            tester_runloop,
            tester_join,
            host,
            verdict_rx,
            timeout,
        } = self;

        let client = app.client();
        let app_join = std::thread::spawn(move || app.run());

        let graph_json = serde_json::json!({
            "nodes": [
                {
                    "type": "extension",
                    "name": BRIDGE_NODE,
                    "addon": BRIDGE_ADDON,
                    "extension_group": "test_bridge_group",
                    "property": { "tester_token": token }
                },
                {
                    "type": "extension",
                    "name": subject,
                    "addon": subject,
                    "extension_group": "tested_group"
                }
            ],
            "connections": [
                {
                    "extension": BRIDGE_NODE,
                    "cmd": [{ "name": "*", "dest": [{ "extension": subject }] }],
                    "data": [{ "name": "*", "dest": [{ "extension": subject }] }],
                    "audio_frame": [{ "name": "*", "dest": [{ "extension": subject }] }],
                    "video_frame": [{ "name": "*", "dest": [{ "extension": subject }] }]
                },
                {
                    "extension": subject,
                    "cmd": [{ "name": "*", "dest": [{ "extension": BRIDGE_NODE }] }],
                    "data": [{ "name": "*", "dest": [{ "extension": BRIDGE_NODE }] }],
                    "audio_frame": [{ "name": "*", "dest": [{ "extension": BRIDGE_NODE }] }],
                    "video_frame": [{ "name": "*", "dest": [{ "extension": BRIDGE_NODE }] }]
                }
            ]
        });

        let start = def::start_graph_cmd(&graph_json.to_string())
            .and_then(|cmd| client.send_cmd_and_recv_result(cmd));
        let verdict = match start {
            Ok(reply) if reply.status_code.is_ok() => verdict_rx
                .recv_timeout(timeout)
                .unwrap_or_else(|_| Err("test timed out without a verdict".into())),
            Ok(reply) => Err(format!("graph refused to start: {reply:?}")),
            Err(err) => Err(format!("start_graph failed: {err}")),
        };

        // Detach the tester before closing: dropping its EnvTester
        // releases the proxy, which the bridge's deinit barrier waits
        // on.
        drop(host.lock().take());
        tester_runloop.stop();
        if tester_join.join().is_err() {
            return Err("tester thread panicked".into());
        }

        let _ = client.close_app();
        if app_join.join().is_err() {
            return Err("app thread panicked".into());
        }

        verdict
    }
}
