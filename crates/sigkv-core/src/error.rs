//! Protocol error type

use thiserror::Error;

/// Error surfaced by every fallible codec operation.
///
/// The protocol defines a single error shape: a human-readable message
/// pinpointing the violated expectation (missing field, wrong type,
/// out-of-range value, duplicate identifier, decryption or decompression
/// failure). Parsing short-circuits on the first failure and never returns
/// a partial result alongside an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ErrorInfo {
    pub message: String,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_message() {
        let err = ErrorInfo::new("Partition id is not type of Integer.");
        assert_eq!(err.to_string(), "Partition id is not type of Integer.");
    }
}
