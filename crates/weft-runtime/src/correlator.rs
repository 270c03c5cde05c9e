//! Command/result correlation.
//!
//! Every outbound command with a result handler gets an entry here,
//! keyed by its correlation id. Inbound results look the entry up,
//! update fan-out accounting, and decide whether the handler fires.
//! Neither the command nor the result ever holds a reference to the
//! other; the id is the only link.
//!
//! The table lives inside an [`ExtensionEnv`](crate::ExtensionEnv) and
//! is only touched from the owning runloop, so it needs no locking.

use std::collections::HashMap;
use tracing::debug;
use weft_msg::CmdResult;
use weft_types::{CorrelationId, StatusCode};

use crate::{ExtensionEnv, RuntimeError};

/// Handler invoked with each surfaced result of a command.
///
/// Runs on the originating extension's runloop. Exactly one of
/// `result` / `err` is `Some`.
pub type ResultHandler =
    Box<dyn FnMut(&mut ExtensionEnv, Option<CmdResult>, Option<RuntimeError>) + Send>;

/// How many results a handler wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationMode {
    /// Only the overall-final result is surfaced.
    Single,
    /// Every intermediate result is surfaced too.
    Multi,
}

pub(crate) struct Entry {
    pub(crate) handler: ResultHandler,
    mode: CorrelationMode,
    /// One final result is expected per fan-out destination; the
    /// stream completes when the last arrives.
    remaining_finals: usize,
}

/// Outcome of accounting for one inbound result.
///
/// The entry is handed back to the caller while its handler runs so
/// the handler can freely use the env (including sending new
/// commands). When `retain` is set the caller must
/// [`restore`](Correlator::restore) the entry afterwards.
pub(crate) enum ResultDisposition {
    /// Fire the entry's handler with the rewritten result.
    Fire {
        id: CorrelationId,
        entry: Entry,
        result: CmdResult,
        retain: bool,
    },
    /// Intermediate result in single mode: nothing fires, the entry
    /// stays.
    Swallow { id: CorrelationId, entry: Entry },
    /// No entry for this id; the result is discarded.
    Unknown,
}

#[derive(Default)]
pub(crate) struct Correlator {
    entries: HashMap<CorrelationId, Entry>,
}

impl Correlator {
    pub(crate) fn insert(
        &mut self,
        id: CorrelationId,
        handler: ResultHandler,
        mode: CorrelationMode,
        fanout: usize,
    ) {
        self.entries.insert(
            id,
            Entry {
                handler,
                mode,
                remaining_finals: fanout.max(1),
            },
        );
    }

    /// Removes an entry without firing it. Used when a send fails
    /// after registration; the synchronous error is the caller's
    /// signal.
    pub(crate) fn remove(&mut self, id: CorrelationId) {
        self.entries.remove(&id);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Accounts for an inbound result and returns what to do with it.
    pub(crate) fn on_result(&mut self, mut result: CmdResult) -> ResultDisposition {
        let Some(id) = result.correlation_id else {
            debug!("result without correlation id dropped");
            return ResultDisposition::Unknown;
        };
        let Some(mut entry) = self.entries.remove(&id) else {
            debug!(%id, "result for unknown correlation id dropped");
            return ResultDisposition::Unknown;
        };

        let overall_final = if result.is_final {
            entry.remaining_finals -= 1;
            entry.remaining_finals == 0
        } else {
            false
        };

        // Invariant: at most one result per correlation id reaches the
        // originator with is_final set. A destination's final result is
        // demoted while other fan-out destinations still owe theirs.
        result.is_final = overall_final;
        result.is_completed = overall_final && result.status_code == StatusCode::Ok;

        let retain = !overall_final;
        match entry.mode {
            CorrelationMode::Multi => ResultDisposition::Fire {
                id,
                entry,
                result,
                retain,
            },
            CorrelationMode::Single if overall_final => ResultDisposition::Fire {
                id,
                entry,
                result,
                retain,
            },
            CorrelationMode::Single => ResultDisposition::Swallow { id, entry },
        }
    }

    /// Puts a still-live entry back after its handler ran.
    pub(crate) fn restore(&mut self, id: CorrelationId, entry: Entry) {
        self.entries.insert(id, entry);
    }

    /// Drains every open entry for shutdown; the caller fires each
    /// handler once with `RT_CLOSED` and no result.
    pub(crate) fn drain(&mut self) -> Vec<(CorrelationId, ResultHandler)> {
        self.entries
            .drain()
            .map(|(id, entry)| (id, entry.handler))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_msg::{Cmd, Message};
    use weft_types::Loc;

    fn handler() -> ResultHandler {
        Box::new(|_env, _result, _err| {})
    }

    fn result_for(id: CorrelationId, is_final: bool) -> CmdResult {
        let mut cmd = Cmd::new("test");
        cmd.correlation_id = Some(id);
        cmd.set_src(Loc::extension("origin"));
        let mut result = CmdResult::from_cmd(StatusCode::Ok, &cmd);
        result.set_final(is_final);
        result
    }

    #[test]
    fn single_mode_swallows_intermediates() {
        let mut c = Correlator::default();
        let id = CorrelationId::new();
        c.insert(id, handler(), CorrelationMode::Single, 1);

        match c.on_result(result_for(id, false)) {
            ResultDisposition::Swallow { id: got, entry } => {
                assert_eq!(got, id);
                c.restore(id, entry);
            }
            _ => panic!("expected swallow"),
        }

        match c.on_result(result_for(id, true)) {
            ResultDisposition::Fire { result, retain, .. } => {
                assert!(result.is_final);
                assert!(result.is_completed);
                assert!(!retain);
            }
            _ => panic!("expected fire"),
        }
        assert!(c.is_empty());
    }

    #[test]
    fn multi_mode_fires_every_result() {
        let mut c = Correlator::default();
        let id = CorrelationId::new();
        c.insert(id, handler(), CorrelationMode::Multi, 1);

        match c.on_result(result_for(id, false)) {
            ResultDisposition::Fire { id, entry, result, retain } => {
                assert!(!result.is_final);
                assert!(retain);
                c.restore(id, entry);
            }
            _ => panic!("expected fire"),
        }
        match c.on_result(result_for(id, true)) {
            ResultDisposition::Fire { result, retain, .. } => {
                assert!(result.is_final);
                assert!(!retain);
            }
            _ => panic!("expected fire"),
        }
    }

    #[test]
    fn fanout_demotes_early_finals() {
        let mut c = Correlator::default();
        let id = CorrelationId::new();
        c.insert(id, handler(), CorrelationMode::Multi, 2);

        // First destination's final arrives while the second still
        // owes one: demoted.
        match c.on_result(result_for(id, true)) {
            ResultDisposition::Fire { id, entry, result, retain } => {
                assert!(!result.is_final);
                assert!(retain);
                c.restore(id, entry);
            }
            _ => panic!("expected fire"),
        }
        match c.on_result(result_for(id, true)) {
            ResultDisposition::Fire { result, retain, .. } => {
                assert!(result.is_final);
                assert!(!retain);
            }
            _ => panic!("expected fire"),
        }
    }

    #[test]
    fn error_final_is_not_completed() {
        let mut c = Correlator::default();
        let id = CorrelationId::new();
        c.insert(id, handler(), CorrelationMode::Single, 1);

        let mut result = result_for(id, true);
        result.status_code = StatusCode::Error;
        match c.on_result(result) {
            ResultDisposition::Fire { result, .. } => {
                assert!(result.is_final);
                assert!(!result.is_completed);
            }
            _ => panic!("expected fire"),
        }
    }

    #[test]
    fn unknown_id_is_dropped() {
        let mut c = Correlator::default();
        assert!(matches!(
            c.on_result(result_for(CorrelationId::new(), true)),
            ResultDisposition::Unknown
        ));
    }

    #[test]
    fn removed_entry_never_fires() {
        let mut c = Correlator::default();
        let id = CorrelationId::new();
        c.insert(id, handler(), CorrelationMode::Single, 1);
        c.remove(id);

        assert!(matches!(
            c.on_result(result_for(id, true)),
            ResultDisposition::Unknown
        ));
    }

    #[test]
    fn drain_returns_open_entries() {
        let mut c = Correlator::default();
        c.insert(CorrelationId::new(), handler(), CorrelationMode::Single, 1);
        c.insert(CorrelationId::new(), handler(), CorrelationMode::Multi, 3);

        assert_eq!(c.drain().len(), 2);
        assert!(c.is_empty());
    }
}
