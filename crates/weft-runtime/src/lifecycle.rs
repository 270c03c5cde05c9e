//! Extension lifecycle states.
//!
//! ```text
//! Created → Configuring → Configured → Initializing → Initialized
//!         → Starting → Started → Stopping → Stopped
//!         → Deinitializing → Deinitialized
//! ```
//!
//! Each `*ing` → `*ed` edge is gated by the extension's own
//! `on_*_done` acknowledgement; the `*ed` → next-`*ing` edges are
//! driven by the graph coordinator once every member of the graph has
//! acknowledged the previous phase.

use std::sync::atomic::{AtomicU8, Ordering};

/// Per-extension lifecycle state.
///
/// Ordered: later phases compare greater, which is what the message
/// path uses to decide between rejecting, buffering, and delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ExtensionState {
    /// Slot exists; the extension instance may not yet.
    Created = 0,
    /// `on_configure` delivered, ack pending.
    Configuring = 1,
    /// Configure acked.
    Configured = 2,
    /// `on_init` delivered, ack pending.
    Initializing = 3,
    /// Init acked; the extension may now receive (buffered) messages.
    Initialized = 4,
    /// `on_start` delivered, ack pending.
    Starting = 5,
    /// Start acked; messages flow directly.
    Started = 6,
    /// `on_stop` delivered, ack pending.
    Stopping = 7,
    /// Stop acked.
    Stopped = 8,
    /// `on_deinit` delivered; ack and proxy-release pending.
    Deinitializing = 9,
    /// Fully shut down; the slot is about to be destroyed.
    Deinitialized = 10,
}

impl ExtensionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Configuring,
            2 => Self::Configured,
            3 => Self::Initializing,
            4 => Self::Initialized,
            5 => Self::Starting,
            6 => Self::Started,
            7 => Self::Stopping,
            8 => Self::Stopped,
            9 => Self::Deinitializing,
            10 => Self::Deinitialized,
            other => unreachable!("invalid extension state {other}"),
        }
    }

    /// Returns `true` once the extension may receive messages
    /// (possibly buffered until it has started).
    #[must_use]
    pub fn accepts_messages(self) -> bool {
        self >= Self::Initialized && self < Self::Deinitializing
    }

    /// Returns `true` while messages must be held back for the
    /// start barrier.
    #[must_use]
    pub fn buffers_messages(self) -> bool {
        self >= Self::Initialized && self < Self::Started
    }
}

impl std::fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Configuring => "configuring",
            Self::Configured => "configured",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Deinitializing => "deinitializing",
            Self::Deinitialized => "deinitialized",
        };
        f.write_str(s)
    }
}

/// Lock-free holder of an [`ExtensionState`], readable from any
/// thread. Transitions happen only on the owning runloop or the graph
/// coordinator.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ExtensionState::Created as u8))
    }

    pub(crate) fn get(&self) -> ExtensionState {
        ExtensionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn set(&self, state: ExtensionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Transitions `from` → `to`, failing when the current state is
    /// anything else. This is what catches out-of-order lifecycle
    /// acks.
    pub(crate) fn transition(
        &self,
        from: ExtensionState,
        to: ExtensionState,
    ) -> Result<(), ExtensionState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(ExtensionState::from_u8)
    }
}
