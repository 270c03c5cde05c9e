//! Result status codes.

use serde::{Deserialize, Serialize};

/// Status carried by a command result.
///
/// Serialized as the bare integer (`Ok = 0`, `Error = 1`) so the value
/// survives transports that know nothing about the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum StatusCode {
    /// The command succeeded.
    Ok,
    /// The command failed; details live in the result's `error`
    /// property.
    Error,
}

impl StatusCode {
    /// Returns `true` for [`StatusCode::Ok`].
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl From<StatusCode> for u8 {
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::Ok => 0,
            StatusCode::Error => 1,
        }
    }
}

impl TryFrom<u8> for StatusCode {
    type Error = String;

    // Spelled out because `Self::Error` would name the associated type
    // here, not the variant.
    fn try_from(v: u8) -> Result<StatusCode, String> {
        match v {
            0 => Ok(StatusCode::Ok),
            1 => Ok(StatusCode::Error),
            other => Err(format!("unknown status code: {other}")),
        }
    }
}
