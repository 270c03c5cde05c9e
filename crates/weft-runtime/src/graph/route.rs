//! The connection (route) table of a graph.
//!
//! Keyed by `(source extension, message kind, message name)`. The
//! table is built once while the graph starts and never mutated after,
//! so resolution is pure: the same key always yields the same
//! destination list.

use std::collections::HashMap;
use weft_msg::MsgKind;
use weft_types::Loc;

/// Name that matches every message of its kind. Used by the tester
/// harness to wire a bridge to everything the subject emits.
pub(crate) const WILDCARD_NAME: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    src_extension: String,
    kind: MsgKind,
    name: String,
}

/// Immutable routing table.
#[derive(Debug, Default)]
pub(crate) struct RouteTable {
    routes: HashMap<RouteKey, Vec<Loc>>,
}

impl RouteTable {
    pub(crate) fn insert(
        &mut self,
        src_extension: impl Into<String>,
        kind: MsgKind,
        name: impl Into<String>,
        dests: Vec<Loc>,
    ) {
        let key = RouteKey {
            src_extension: src_extension.into(),
            kind,
            name: name.into(),
        };
        self.routes.entry(key).or_default().extend(dests);
    }

    /// Resolves the destinations declared for a message. An exact name
    /// match wins; otherwise a wildcard route for the same source and
    /// kind applies.
    pub(crate) fn resolve(&self, src_extension: &str, kind: MsgKind, name: &str) -> &[Loc] {
        let exact = RouteKey {
            src_extension: src_extension.to_string(),
            kind,
            name: name.to_string(),
        };
        if let Some(dests) = self.routes.get(&exact) {
            return dests;
        }
        let wildcard = RouteKey {
            src_extension: src_extension.to_string(),
            kind,
            name: WILDCARD_NAME.to_string(),
        };
        self.routes.get(&wildcard).map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_exact_route() {
        let mut table = RouteTable::default();
        table.insert("a", MsgKind::Cmd, "ping", vec![Loc::extension("b")]);

        assert_eq!(
            table.resolve("a", MsgKind::Cmd, "ping"),
            &[Loc::extension("b")]
        );
        assert!(table.resolve("a", MsgKind::Cmd, "pong").is_empty());
        assert!(table.resolve("a", MsgKind::Data, "ping").is_empty());
        assert!(table.resolve("b", MsgKind::Cmd, "ping").is_empty());
    }

    #[test]
    fn wildcard_catches_unlisted_names() {
        let mut table = RouteTable::default();
        table.insert("a", MsgKind::Cmd, WILDCARD_NAME, vec![Loc::extension("b")]);
        table.insert("a", MsgKind::Cmd, "special", vec![Loc::extension("c")]);

        assert_eq!(
            table.resolve("a", MsgKind::Cmd, "anything"),
            &[Loc::extension("b")]
        );
        // Exact beats wildcard.
        assert_eq!(
            table.resolve("a", MsgKind::Cmd, "special"),
            &[Loc::extension("c")]
        );
    }

    #[test]
    fn multiple_dests_accumulate() {
        let mut table = RouteTable::default();
        table.insert("a", MsgKind::Cmd, "fan", vec![Loc::extension("b")]);
        table.insert("a", MsgKind::Cmd, "fan", vec![Loc::extension("c")]);

        assert_eq!(table.resolve("a", MsgKind::Cmd, "fan").len(), 2);
    }
}
