//! Message layer errors.
//!
//! All variants implement [`ErrorCode`] with the `MSG_` prefix.

use weft_types::ErrorCode;

/// Error produced by envelope and property operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MsgError {
    /// Malformed input: empty name, bad property path, or an opaque
    /// pointer value where a transportable value is required.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A typed getter found a value of a different type.
    #[error("type mismatch at '{path}': expected {expected}, found {found}")]
    TypeMismatch {
        /// Property path that was read.
        path: String,
        /// Requested type.
        expected: &'static str,
        /// Actual type of the stored value.
        found: &'static str,
    },

    /// Encoding or decoding an envelope failed.
    #[error("codec: {0}")]
    Codec(String),
}

impl MsgError {
    pub(crate) fn mismatch(path: &str, expected: &'static str, found: &'static str) -> Self {
        Self::TypeMismatch {
            path: path.to_string(),
            expected,
            found,
        }
    }
}

impl ErrorCode for MsgError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "MSG_INVALID_ARGUMENT",
            Self::TypeMismatch { .. } => "MSG_TYPE_MISMATCH",
            Self::Codec(_) => "MSG_CODEC",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::assert_error_codes;

    #[test]
    fn all_error_codes_valid() {
        assert_error_codes(
            &[
                MsgError::InvalidArgument("x".into()),
                MsgError::mismatch("a.b", "i32", "string"),
                MsgError::Codec("x".into()),
            ],
            "MSG_",
        );
    }

    #[test]
    fn mismatch_message_names_path() {
        let err = MsgError::mismatch("a.b", "i32", "string");
        assert!(err.to_string().contains("'a.b'"));
        assert!(err.to_string().contains("i32"));
    }
}
