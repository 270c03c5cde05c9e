//! The routing location triple.
//!
//! A [`Loc`] names a point in the deployment hierarchy:
//! app (process) → graph (topology instance) → extension (node).
//! Every field is optional; an absent field means "same as the
//! sender's" for that dimension. This is what lets an extension send
//! to `{extension: "b"}` without knowing which graph or app it is
//! running inside, and what makes `dests: [{}]` mean "this app".

use serde::{Deserialize, Serialize};

/// Routing triple `{app_uri, graph_id, extension}`.
///
/// # Matching Semantics
///
/// Two locs *match* when every field that is present on **both** sides
/// is equal. Matching is how destination locs are compared against the
/// fully-resolved locs in the extension table:
///
/// ```
/// use weft_types::Loc;
///
/// let full = Loc::new(Some("app://a"), Some("g1"), Some("ext"));
/// let partial = Loc::extension("ext");
///
/// assert!(partial.matches(&full));   // absent fields are wildcards
/// assert!(full.matches(&full));
/// assert!(!Loc::extension("other").matches(&full));
/// ```
///
/// Strict equality (`==`) compares all fields including absence and is
/// what serialized envelopes round-trip through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Loc {
    /// URI of the hosting app process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_uri: Option<String>,
    /// Graph instance id (string form of a `GraphId`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_id: Option<String>,
    /// Extension name inside the graph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

impl Loc {
    /// Creates a loc from optional parts.
    #[must_use]
    pub fn new(
        app_uri: Option<impl Into<String>>,
        graph_id: Option<impl Into<String>>,
        extension: Option<impl Into<String>>,
    ) -> Self {
        Self {
            app_uri: app_uri.map(Into::into),
            graph_id: graph_id.map(Into::into),
            extension: extension.map(Into::into),
        }
    }

    /// The empty loc. As a destination it means "this app".
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A loc naming only an extension; graph and app are inherited
    /// from the sender's scope at resolution time.
    #[must_use]
    pub fn extension(name: impl Into<String>) -> Self {
        Self {
            app_uri: None,
            graph_id: None,
            extension: Some(name.into()),
        }
    }

    /// Returns `true` if every field is absent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.app_uri.is_none() && self.graph_id.is_none() && self.extension.is_none()
    }

    /// Returns `true` if `self` matches `other`: every field present on
    /// both sides is equal. Absent fields act as wildcards.
    #[must_use]
    pub fn matches(&self, other: &Loc) -> bool {
        fn field(a: &Option<String>, b: &Option<String>) -> bool {
            match (a, b) {
                (Some(x), Some(y)) => x == y,
                _ => true,
            }
        }
        field(&self.app_uri, &other.app_uri)
            && field(&self.graph_id, &other.graph_id)
            && field(&self.extension, &other.extension)
    }

    /// Fills absent fields from `scope`, yielding a fully-qualified loc
    /// relative to the sender.
    #[must_use]
    pub fn resolved_against(&self, scope: &Loc) -> Loc {
        Loc {
            app_uri: self.app_uri.clone().or_else(|| scope.app_uri.clone()),
            graph_id: self.graph_id.clone().or_else(|| scope.graph_id.clone()),
            extension: self.extension.clone(),
        }
    }
}

impl std::fmt::Display for Loc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.app_uri.as_deref().unwrap_or("*"),
            self.graph_id.as_deref().unwrap_or("*"),
            self.extension.as_deref().unwrap_or("*"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_matches_everything() {
        let full = Loc::new(Some("app://x"), Some("g"), Some("e"));
        assert!(Loc::empty().matches(&full));
        assert!(full.matches(&Loc::empty()));
    }

    #[test]
    fn extension_only_match() {
        let full = Loc::new(Some("app://x"), Some("g"), Some("e"));
        assert!(Loc::extension("e").matches(&full));
        assert!(!Loc::extension("f").matches(&full));
    }

    #[test]
    fn resolved_against_fills_scope() {
        let scope = Loc::new(Some("app://x"), Some("g"), Some("sender"));
        let dest = Loc::extension("receiver");

        let resolved = dest.resolved_against(&scope);
        assert_eq!(resolved.app_uri.as_deref(), Some("app://x"));
        assert_eq!(resolved.graph_id.as_deref(), Some("g"));
        assert_eq!(resolved.extension.as_deref(), Some("receiver"));
    }

    #[test]
    fn resolved_never_inherits_extension() {
        let scope = Loc::new(Some("app://x"), Some("g"), Some("sender"));
        let resolved = Loc::empty().resolved_against(&scope);
        assert!(resolved.extension.is_none());
    }

    #[test]
    fn serde_skips_absent_fields() {
        let json = serde_json::to_string(&Loc::extension("e")).expect("serialize");
        assert_eq!(json, r#"{"extension":"e"}"#);

        let back: Loc = serde_json::from_str("{}").expect("deserialize");
        assert!(back.is_empty());
    }

    #[test]
    fn display_uses_wildcards() {
        assert_eq!(Loc::extension("e").to_string(), "*/*/e");
    }
}
