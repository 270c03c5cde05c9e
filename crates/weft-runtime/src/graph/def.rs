//! Graph definitions.
//!
//! A graph definition is the JSON document a `start_graph` command
//! carries: a list of nodes (extension name, addon, group, optional
//! property object) plus a list of connections (per source extension,
//! per message kind, name → destination list).

use serde::Deserialize;
use weft_msg::{Message, MsgKind, PropertyValue};

use crate::RuntimeError;

/// One node of a graph.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeDef {
    /// Node kind; only `"extension"` is meaningful.
    #[serde(rename = "type", default = "default_node_type")]
    pub node_type: String,
    /// Extension instance name, unique within the graph.
    pub name: String,
    /// Addon that creates the extension.
    pub addon: String,
    /// Scheduling group; every extension of a group shares one
    /// runloop thread. Defaults to a group per extension.
    #[serde(default)]
    pub extension_group: Option<String>,
    /// Hosting app URI. Single-app graphs may omit it.
    #[serde(default)]
    pub app: Option<String>,
    /// Initial property tree for the extension.
    #[serde(default)]
    pub property: Option<serde_json::Value>,
}

fn default_node_type() -> String {
    "extension".to_string()
}

/// Destination of a route.
#[derive(Debug, Clone, Deserialize)]
pub struct DestDef {
    /// Destination app URI.
    #[serde(default)]
    pub app: Option<String>,
    /// Destination extension name.
    pub extension: String,
}

/// One route: a message name and where it goes.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteDef {
    /// Message name, or `"*"` for every name of the kind.
    pub name: String,
    /// Destinations.
    pub dest: Vec<DestDef>,
}

/// All routes declared for one source extension.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionDef {
    /// Source app URI.
    #[serde(default)]
    pub app: Option<String>,
    /// Source extension name.
    pub extension: String,
    /// Command routes.
    #[serde(default)]
    pub cmd: Vec<RouteDef>,
    /// Data routes.
    #[serde(default)]
    pub data: Vec<RouteDef>,
    /// Audio frame routes.
    #[serde(default)]
    pub audio_frame: Vec<RouteDef>,
    /// Video frame routes.
    #[serde(default)]
    pub video_frame: Vec<RouteDef>,
}

impl ConnectionDef {
    /// Iterates `(kind, route)` over every declared route.
    pub(crate) fn routes(&self) -> impl Iterator<Item = (MsgKind, &RouteDef)> {
        self.cmd
            .iter()
            .map(|r| (MsgKind::Cmd, r))
            .chain(self.data.iter().map(|r| (MsgKind::Data, r)))
            .chain(self.audio_frame.iter().map(|r| (MsgKind::AudioFrame, r)))
            .chain(self.video_frame.iter().map(|r| (MsgKind::VideoFrame, r)))
    }
}

/// A complete graph definition.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphDefinition {
    /// Graph nodes.
    pub nodes: Vec<NodeDef>,
    /// Declared routes.
    #[serde(default)]
    pub connections: Vec<ConnectionDef>,
}

impl GraphDefinition {
    /// Parses a definition from JSON text.
    ///
    /// # Errors
    ///
    /// `RT_INVALID_ARGUMENT` on malformed JSON or an invalid topology.
    pub fn from_json(json: &str) -> Result<Self, RuntimeError> {
        let def: Self = serde_json::from_str(json)
            .map_err(|e| RuntimeError::InvalidArgument(format!("invalid graph json: {e}")))?;
        def.validate()?;
        Ok(def)
    }

    /// Extracts a definition from a `start_graph` command's `nodes` /
    /// `connections` properties.
    ///
    /// # Errors
    ///
    /// `RT_INVALID_ARGUMENT` when the properties are missing or do not
    /// describe a valid topology.
    pub fn from_start_graph_cmd(cmd: &weft_msg::Cmd) -> Result<Self, RuntimeError> {
        let nodes = cmd
            .get_property("nodes")
            .map_err(RuntimeError::from)?
            .ok_or_else(|| {
                RuntimeError::InvalidArgument("start_graph without 'nodes' property".into())
            })?;
        let connections = cmd.get_property("connections").map_err(RuntimeError::from)?;

        let mut doc = serde_json::Map::new();
        doc.insert("nodes".into(), nodes.to_json().map_err(RuntimeError::from)?);
        if let Some(connections) = connections {
            doc.insert(
                "connections".into(),
                connections.to_json().map_err(RuntimeError::from)?,
            );
        }

        let def: Self = serde_json::from_value(serde_json::Value::Object(doc))
            .map_err(|e| RuntimeError::InvalidArgument(format!("invalid graph: {e}")))?;
        def.validate()?;
        Ok(def)
    }

    /// Group name for a node: its declared group, or a private group
    /// named after the node.
    #[must_use]
    pub fn group_of(node: &NodeDef) -> String {
        node.extension_group
            .clone()
            .unwrap_or_else(|| format!("{}__group", node.name))
    }

    fn validate(&self) -> Result<(), RuntimeError> {
        if self.nodes.is_empty() {
            return Err(RuntimeError::InvalidArgument("graph has no nodes".into()));
        }
        let mut names = std::collections::HashSet::new();
        for node in &self.nodes {
            if node.node_type != "extension" {
                return Err(RuntimeError::InvalidArgument(format!(
                    "unsupported node type '{}'",
                    node.node_type
                )));
            }
            if node.name.is_empty() || node.addon.is_empty() {
                return Err(RuntimeError::InvalidArgument(
                    "node requires both 'name' and 'addon'".into(),
                ));
            }
            if !names.insert(node.name.as_str()) {
                return Err(RuntimeError::InvalidArgument(format!(
                    "duplicate node name '{}'",
                    node.name
                )));
            }
        }
        for conn in &self.connections {
            if !names.contains(conn.extension.as_str()) {
                return Err(RuntimeError::InvalidArgument(format!(
                    "connection source '{}' is not a node",
                    conn.extension
                )));
            }
            for (_, route) in conn.routes() {
                for dest in &route.dest {
                    if !names.contains(dest.extension.as_str()) {
                        return Err(RuntimeError::InvalidArgument(format!(
                            "route '{}' destination '{}' is not a node",
                            route.name, dest.extension
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Builds a `start_graph` command carrying `definition_json`.
///
/// # Errors
///
/// `RT_INVALID_ARGUMENT` when the JSON is not a valid definition.
pub fn start_graph_cmd(definition_json: &str) -> Result<weft_msg::Cmd, RuntimeError> {
    // Validate eagerly so the caller hears about a bad topology before
    // anything is in flight.
    let _ = GraphDefinition::from_json(definition_json)?;
    let doc: serde_json::Value = serde_json::from_str(definition_json)
        .map_err(|e| RuntimeError::InvalidArgument(format!("invalid graph json: {e}")))?;

    let mut cmd = weft_msg::Cmd::new(crate::app::CMD_START_GRAPH);
    if let Some(nodes) = doc.get("nodes") {
        cmd.properties_mut()
            .insert("nodes".into(), PropertyValue::from_json(nodes));
    }
    if let Some(connections) = doc.get("connections") {
        cmd.properties_mut()
            .insert("connections".into(), PropertyValue::from_json(connections));
    }
    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_NODE_GRAPH: &str = r#"{
        "nodes": [
            { "type": "extension", "name": "a", "addon": "addon_a",
              "extension_group": "shared" },
            { "type": "extension", "name": "b", "addon": "addon_b",
              "extension_group": "shared",
              "property": { "test_prop": 1568 } }
        ],
        "connections": [{
            "extension": "a",
            "cmd": [{ "name": "ping", "dest": [{ "extension": "b" }] }]
        }]
    }"#;

    #[test]
    fn parses_nodes_and_connections() {
        let def = GraphDefinition::from_json(TWO_NODE_GRAPH).expect("parse");
        assert_eq!(def.nodes.len(), 2);
        assert_eq!(def.connections.len(), 1);
        assert_eq!(def.connections[0].cmd[0].dest[0].extension, "b");
    }

    #[test]
    fn group_defaults_to_private() {
        let def = GraphDefinition::from_json(
            r#"{ "nodes": [{ "name": "solo", "addon": "x" }] }"#,
        )
        .expect("parse");
        assert_eq!(GraphDefinition::group_of(&def.nodes[0]), "solo__group");
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = GraphDefinition::from_json(
            r#"{ "nodes": [
                { "name": "a", "addon": "x" },
                { "name": "a", "addon": "y" }
            ] }"#,
        )
        .expect_err("duplicate");
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn unknown_route_endpoint_rejected() {
        let err = GraphDefinition::from_json(
            r#"{
                "nodes": [{ "name": "a", "addon": "x" }],
                "connections": [{
                    "extension": "a",
                    "cmd": [{ "name": "n", "dest": [{ "extension": "ghost" }] }]
                }]
            }"#,
        )
        .expect_err("ghost dest");
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn empty_graph_rejected() {
        assert!(GraphDefinition::from_json(r#"{ "nodes": [] }"#).is_err());
    }

    #[test]
    fn start_graph_cmd_roundtrip() {
        let cmd = start_graph_cmd(TWO_NODE_GRAPH).expect("build");
        let def = GraphDefinition::from_start_graph_cmd(&cmd).expect("extract");
        assert_eq!(def.nodes.len(), 2);
        assert_eq!(def.nodes[1].property.as_ref().unwrap()["test_prop"], 1568);
    }
}
