//! Extension manifests.
//!
//! A manifest declares what an extension is and which messages it
//! exchanges, optionally with typed property schemas on each entry.
//! The runtime checks inbound commands against the destination's
//! `cmd_in` schema before they reach `on_cmd`; a violation is answered
//! with an ERROR result on the originator's behalf.

use serde::Deserialize;
use std::collections::BTreeMap;
use weft_msg::{Cmd, Message, PropertyValue};

use crate::RuntimeError;

/// Parsed manifest of an extension.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    /// Package kind, `"extension"` for graph nodes.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Package name.
    #[serde(default)]
    pub name: String,
    /// Semver string.
    #[serde(default)]
    pub version: String,
    /// Declared message surface.
    #[serde(default)]
    pub api: Api,
}

/// The message surface of a manifest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Api {
    /// Commands this extension accepts.
    #[serde(default)]
    pub cmd_in: Vec<ApiEntry>,
    /// Commands this extension emits.
    #[serde(default)]
    pub cmd_out: Vec<ApiEntry>,
    /// Data messages this extension accepts.
    #[serde(default)]
    pub data_in: Vec<ApiEntry>,
    /// Data messages this extension emits.
    #[serde(default)]
    pub data_out: Vec<ApiEntry>,
    /// Audio frames this extension accepts.
    #[serde(default)]
    pub audio_frame_in: Vec<ApiEntry>,
    /// Audio frames this extension emits.
    #[serde(default)]
    pub audio_frame_out: Vec<ApiEntry>,
    /// Video frames this extension accepts.
    #[serde(default)]
    pub video_frame_in: Vec<ApiEntry>,
    /// Video frames this extension emits.
    #[serde(default)]
    pub video_frame_out: Vec<ApiEntry>,
}

/// One declared message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiEntry {
    /// Message name.
    pub name: String,
    /// Optional property schema.
    #[serde(default)]
    pub property: Option<PropertySchema>,
}

/// Property schema of a declared message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PropertySchema {
    /// Per-property type declarations.
    #[serde(default)]
    pub properties: BTreeMap<String, TypeDecl>,
    /// Properties that must be present.
    #[serde(default)]
    pub required: Vec<String>,
}

/// A declared property type.
#[derive(Debug, Clone, Deserialize)]
pub struct TypeDecl {
    /// Type name: `bool`, `int8`..`int64`, `uint8`..`uint64`,
    /// `float32`, `float64`, `string`, `buf`, `array`, `object`.
    #[serde(rename = "type")]
    pub ty: String,
}

impl Manifest {
    /// Parses a manifest from its JSON text.
    ///
    /// # Errors
    ///
    /// `RT_INVALID_ARGUMENT` on malformed JSON.
    pub fn from_json(json: &str) -> Result<Self, RuntimeError> {
        serde_json::from_str(json)
            .map_err(|e| RuntimeError::InvalidArgument(format!("invalid manifest: {e}")))
    }

    /// Checks an inbound command against this manifest's `cmd_in`
    /// declarations.
    ///
    /// Commands with no matching declaration pass; declaring a command
    /// constrains it.
    ///
    /// # Errors
    ///
    /// A human-readable description of the first violation.
    pub fn check_cmd_in(&self, cmd: &Cmd) -> Result<(), String> {
        let Some(entry) = self.api.cmd_in.iter().find(|e| e.name == cmd.name) else {
            return Ok(());
        };
        let Some(schema) = &entry.property else {
            return Ok(());
        };

        for required in &schema.required {
            if !cmd.properties().contains_key(required) {
                return Err(format!(
                    "command '{}' is missing required property '{required}'",
                    cmd.name
                ));
            }
        }
        for (name, decl) in &schema.properties {
            if let Some(value) = cmd.properties().get(name) {
                if !type_matches(&decl.ty, value) {
                    return Err(format!(
                        "command '{}' property '{name}' must be {}, got {}",
                        cmd.name,
                        decl.ty,
                        value.type_name()
                    ));
                }
            }
        }
        Ok(())
    }
}

fn int_fits(value: &PropertyValue, min: i128, max: i128) -> bool {
    match (value.to_i64(), value.to_u64()) {
        (Some(v), _) => i128::from(v) >= min && i128::from(v) <= max,
        (None, Some(v)) => i128::from(v) >= min && i128::from(v) <= max,
        _ => false,
    }
}

fn type_matches(declared: &str, value: &PropertyValue) -> bool {
    match declared {
        "bool" => matches!(value, PropertyValue::Bool(_)),
        "int8" => int_fits(value, i128::from(i8::MIN), i128::from(i8::MAX)),
        "int16" => int_fits(value, i128::from(i16::MIN), i128::from(i16::MAX)),
        "int32" => int_fits(value, i128::from(i32::MIN), i128::from(i32::MAX)),
        "int64" => int_fits(value, i128::from(i64::MIN), i128::from(i64::MAX)),
        "uint8" => int_fits(value, 0, i128::from(u8::MAX)),
        "uint16" => int_fits(value, 0, i128::from(u16::MAX)),
        "uint32" => int_fits(value, 0, i128::from(u32::MAX)),
        "uint64" => int_fits(value, 0, i128::from(u64::MAX)),
        "float32" | "float64" => value.to_f64().is_some(),
        "string" => matches!(value, PropertyValue::String(_)),
        "buf" => matches!(value, PropertyValue::Bytes(_)),
        "ptr" => matches!(value, PropertyValue::Ptr(_)),
        "array" => matches!(value, PropertyValue::Array(_)),
        "object" => matches!(value, PropertyValue::Object(_)),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> Manifest {
        Manifest::from_json(
            r#"{
                "type": "extension",
                "name": "probe",
                "version": "0.1.0",
                "api": {
                    "cmd_in": [{
                        "name": "test",
                        "property": {
                            "properties": {
                                "test_data": { "type": "int32" }
                            },
                            "required": ["test_data"]
                        }
                    }]
                }
            }"#,
        )
        .expect("parse")
    }

    #[test]
    fn parses_api_entries() {
        let m = manifest();
        assert_eq!(m.name, "probe");
        assert_eq!(m.api.cmd_in.len(), 1);
        assert_eq!(m.api.cmd_in[0].name, "test");
    }

    #[test]
    fn accepts_matching_command() {
        let mut cmd = Cmd::new("test");
        cmd.set_property("test_data", 12_344_321i32).expect("set");
        assert!(manifest().check_cmd_in(&cmd).is_ok());
    }

    #[test]
    fn rejects_missing_required() {
        let cmd = Cmd::new("test");
        let err = manifest().check_cmd_in(&cmd).expect_err("missing property");
        assert!(err.contains("test_data"));
    }

    #[test]
    fn rejects_type_violation() {
        let mut cmd = Cmd::new("test");
        cmd.set_property("test_data", "not a number").expect("set");
        let err = manifest().check_cmd_in(&cmd).expect_err("wrong type");
        assert!(err.contains("int32"));
    }

    #[test]
    fn widened_integers_satisfy_narrow_declarations() {
        // JSON-sourced properties arrive as i64.
        let mut cmd = Cmd::new("test");
        cmd.set_property("test_data", 1568i64).expect("set");
        assert!(manifest().check_cmd_in(&cmd).is_ok());
    }

    #[test]
    fn undeclared_commands_pass() {
        let cmd = Cmd::new("anything_else");
        assert!(manifest().check_cmd_in(&cmd).is_ok());
    }

    #[test]
    fn malformed_json_fails() {
        assert!(Manifest::from_json("{").is_err());
    }
}
