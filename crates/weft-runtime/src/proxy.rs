//! Cross-thread access to an extension's env.
//!
//! An [`EnvProxy`] is the only sanctioned way for code outside an
//! extension's runloop (worker threads, other runtimes) to reach its
//! [`ExtensionEnv`]: [`EnvProxy::notify`] posts a closure onto the
//! owning runloop, where it runs with the live env.
//!
//! # Teardown barrier
//!
//! While any proxy to an extension is alive, that extension cannot
//! finish deinitializing. A `notify` racing with shutdown therefore
//! either runs before deinit completes or fails with `RT_CLOSED`;
//! closures never observe a dead env.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

use crate::graph::slot::{self, ExtensionSlot};
use crate::lifecycle::ExtensionState;
use crate::{ExtensionEnv, RuntimeError};

/// Cloneable cross-thread handle to one extension's env.
pub struct EnvProxy {
    slot: Arc<ExtensionSlot>,
}

impl EnvProxy {
    /// Creates a proxy for the extension owning `env`. Must be called
    /// on the owning runloop (i.e. from a callback of that extension).
    ///
    /// # Errors
    ///
    /// `RT_CLOSED` once the extension has begun deinitializing.
    pub fn new(env: &ExtensionEnv) -> Result<Self, RuntimeError> {
        let slot = Arc::clone(env.slot());
        if slot.state.get() >= ExtensionState::Deinitializing {
            return Err(RuntimeError::Closed);
        }
        slot.proxy_count.fetch_add(1, Ordering::SeqCst);
        Ok(Self { slot })
    }

    /// Schedules `f` to run on the target extension's runloop with its
    /// live env.
    ///
    /// # Errors
    ///
    /// `RT_CLOSED` when the extension or its runloop is already gone;
    /// the closure is dropped without running.
    pub fn notify(
        &self,
        f: impl FnOnce(&mut ExtensionEnv) + Send + 'static,
    ) -> Result<(), RuntimeError> {
        if self.slot.state.get() >= ExtensionState::Deinitialized {
            return Err(RuntimeError::Closed);
        }
        let slot = Arc::clone(&self.slot);
        self.slot
            .runloop
            .post_tail(move || {
                slot.with_host(|_extension, env| f(env));
            })
            .map_err(|_| RuntimeError::Closed)
    }

    /// Name of the target extension.
    #[must_use]
    pub fn extension_name(&self) -> &str {
        &self.slot.name
    }
}

impl Clone for EnvProxy {
    fn clone(&self) -> Self {
        self.slot.proxy_count.fetch_add(1, Ordering::SeqCst);
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl Drop for EnvProxy {
    fn drop(&mut self) {
        let remaining = self.slot.proxy_count.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(extension = %self.slot.name, remaining, "env proxy released");
        if remaining == 0 {
            // The extension may be parked in deinit waiting for us.
            slot::maybe_finish_deinit(&self.slot);
        }
    }
}

impl std::fmt::Debug for EnvProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvProxy")
            .field("extension", &self.slot.name)
            .finish()
    }
}
