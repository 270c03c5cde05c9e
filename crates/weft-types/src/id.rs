//! Identifier types for weft.
//!
//! All identifiers are UUID-based so they stay unique across processes
//! and can travel inside serialized envelopes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for a running graph instance.
///
/// A graph is a named topology of extensions plus connections. Each
/// `start_graph` command mints a fresh `GraphId`; the id is returned to
/// the client in the reply's `detail` property and is how external
/// senders address extensions inside that graph.
///
/// # Example
///
/// ```
/// use weft_types::GraphId;
///
/// let a = GraphId::new();
/// let b = GraphId::new();
/// assert_ne!(a, b);
///
/// // Ids round-trip through their string form.
/// let parsed: GraphId = a.to_string().parse().expect("valid id");
/// assert_eq!(a, parsed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphId(pub Uuid);

#[allow(clippy::new_without_default)] // Default would mint an unregistered graph id
impl GraphId {
    /// Creates a new random `GraphId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for GraphId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for GraphId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Opaque token minted per outbound command.
///
/// The correlation id ties a command to its result stream: the sender's
/// correlator registers the id when the command goes out, and every
/// result returned for that command carries the same id back.
///
/// `CorrelationId` intentionally does not implement `Default`; ids are
/// minted by the runtime at send time, never by user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

#[allow(clippy::new_without_default)]
impl CorrelationId {
    /// Creates a new random `CorrelationId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "corr:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_id_unique() {
        assert_ne!(GraphId::new(), GraphId::new());
    }

    #[test]
    fn graph_id_parse_roundtrip() {
        let id = GraphId::new();
        let parsed: GraphId = id.to_string().parse().expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn graph_id_parse_garbage() {
        assert!("not-a-uuid".parse::<GraphId>().is_err());
    }

    #[test]
    fn correlation_id_display_prefix() {
        let id = CorrelationId::new();
        assert!(id.to_string().starts_with("corr:"));
    }

    #[test]
    fn ids_serde_roundtrip() {
        let id = CorrelationId::new();
        let json = serde_json::to_string(&id).expect("serialize");
        let back: CorrelationId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, back);
    }
}
