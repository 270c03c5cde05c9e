//! In-process client.
//!
//! The wire transport lives outside this workspace; tests and
//! embedders drive an [`App`](crate::App) through this client instead.
//! It speaks the same contract an external connection would: commands
//! in, result streams out, with the free-routing capability (explicit
//! destinations need not appear in any connection table).

use crossbeam_channel::{bounded, Receiver};
use std::time::Duration;
use weft_msg::{Cmd, CmdResult};

use crate::app::AppHandle;
use crate::RuntimeError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle for driving an app from any thread.
#[derive(Clone)]
pub struct Client {
    app: AppHandle,
    timeout: Duration,
}

impl Client {
    pub(crate) fn new(app: AppHandle) -> Self {
        Self {
            app,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Replaces the wait deadline used by the blocking calls.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Submits a command and returns the receiving end of its result
    /// stream.
    ///
    /// Every result of the command arrives on the channel; the overall
    /// final one carries `is_final = true` and closes the stream.
    ///
    /// # Errors
    ///
    /// `RT_CLOSED` when the app has already stopped.
    pub fn submit_cmd(&self, cmd: Cmd) -> Result<Receiver<CmdResult>, RuntimeError> {
        let (tx, rx) = bounded(16);
        self.app.submit_client_cmd(cmd, tx)?;
        Ok(rx)
    }

    /// Submits a command and blocks until its overall-final result.
    ///
    /// Intermediate results are discarded; use
    /// [`submit_cmd`](Self::submit_cmd) to observe the stream.
    ///
    /// # Errors
    ///
    /// `RT_CLOSED` when the app has stopped, `RT_TIMEOUT` when no
    /// final result arrives within the deadline.
    pub fn send_cmd_and_recv_result(&self, cmd: Cmd) -> Result<CmdResult, RuntimeError> {
        let rx = self.submit_cmd(cmd)?;
        let deadline = std::time::Instant::now() + self.timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(std::time::Instant::now())
                .ok_or(RuntimeError::Timeout)?;
            match rx.recv_timeout(remaining) {
                Ok(result) if result.is_final => return Ok(result),
                Ok(_) => {}
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    return Err(RuntimeError::Timeout)
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    return Err(RuntimeError::Closed)
                }
            }
        }
    }

    /// Asks the app to shut down. Fire and forget: `close_app` has no
    /// reply; observe completion by joining the thread running
    /// [`App::run`](crate::App::run).
    ///
    /// # Errors
    ///
    /// `RT_CLOSED` when the app has already stopped.
    pub fn close_app(&self) -> Result<(), RuntimeError> {
        self.app.submit_app_cmd(Cmd::new(crate::app::CMD_CLOSE_APP))
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("app", &self.app.shared.uri)
            .finish()
    }
}
