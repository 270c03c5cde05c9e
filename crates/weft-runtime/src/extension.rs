//! The extension trait.
//!
//! Extensions are the user-written units a graph wires together. Each
//! one lives on its group's runloop and is only ever touched from that
//! thread; everything it does with the outside world goes through the
//! [`ExtensionEnv`] handed to every callback.
//!
//! # Lifecycle contract
//!
//! Each lifecycle callback must eventually acknowledge via the
//! matching `env.on_*_done()` call. Acks do not have to happen inside
//! the callback: an extension that needs async work before it is ready
//! can stash an [`EnvProxy`](crate::EnvProxy) and ack later from a
//! posted closure. The default implementations ack immediately.
//!
//! # Example
//!
//! ```no_run
//! use weft_msg::{Cmd, CmdResult, Message, StatusCode};
//! use weft_runtime::{Extension, ExtensionEnv};
//!
//! struct Greeter;
//!
//! impl Extension for Greeter {
//!     fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Cmd) {
//!         let mut result = CmdResult::from_cmd(StatusCode::Ok, &cmd);
//!         result.set_property("detail", "hello world, too").unwrap();
//!         let _ = env.return_result(result);
//!     }
//! }
//! ```

use tracing::{debug, warn};
use weft_msg::{AudioFrame, Cmd, CmdResult, Data, Message, StatusCode, VideoFrame};

use crate::ExtensionEnv;

/// A user-written graph node.
///
/// All callbacks run on the owning group's runloop thread, never
/// concurrently. Callbacks must not block; long work belongs on a
/// separate thread that reports back through an
/// [`EnvProxy`](crate::EnvProxy).
pub trait Extension: Send + 'static {
    /// First callback after creation. Read configuration, declare a
    /// manifest. Ack with [`ExtensionEnv::on_configure_done`].
    fn on_configure(&mut self, env: &mut ExtensionEnv) {
        let _ = env.on_configure_done();
    }

    /// Acquire resources. Ack with [`ExtensionEnv::on_init_done`].
    fn on_init(&mut self, env: &mut ExtensionEnv) {
        let _ = env.on_init_done();
    }

    /// The graph is live; every peer has initialized. Ack with
    /// [`ExtensionEnv::on_start_done`].
    fn on_start(&mut self, env: &mut ExtensionEnv) {
        let _ = env.on_start_done();
    }

    /// The graph is shutting down. Finish or abandon in-flight work,
    /// join worker threads. Ack with [`ExtensionEnv::on_stop_done`].
    fn on_stop(&mut self, env: &mut ExtensionEnv) {
        let _ = env.on_stop_done();
    }

    /// Last callback before destruction. Ack with
    /// [`ExtensionEnv::on_deinit_done`]; completion additionally waits
    /// for all env proxies to drop.
    fn on_deinit(&mut self, env: &mut ExtensionEnv) {
        let _ = env.on_deinit_done();
    }

    /// An inbound command. The default implementation answers with an
    /// ERROR result so the originator never hangs on an unhandled
    /// name.
    fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Cmd) {
        warn!(extension = env.name(), cmd = %cmd.name, "unhandled command");
        let mut result = CmdResult::from_cmd(StatusCode::Error, &cmd);
        let _ = result.set_property("error.code", "RT_GENERIC");
        let _ = result.set_property("error.message", format!("unhandled command: {}", cmd.name));
        if let Err(err) = env.return_result(result) {
            debug!(extension = env.name(), error = %err.error, "could not answer unhandled command");
        }
    }

    /// An inbound data message. Dropped by default.
    fn on_data(&mut self, env: &mut ExtensionEnv, data: Data) {
        debug!(extension = env.name(), data = data.name(), "data dropped");
    }

    /// An inbound audio frame. Dropped by default.
    fn on_audio_frame(&mut self, env: &mut ExtensionEnv, frame: AudioFrame) {
        debug!(extension = env.name(), frame = frame.name(), "audio frame dropped");
    }

    /// An inbound video frame. Dropped by default.
    fn on_video_frame(&mut self, env: &mut ExtensionEnv, frame: VideoFrame) {
        debug!(extension = env.name(), frame = frame.name(), "video frame dropped");
    }
}
