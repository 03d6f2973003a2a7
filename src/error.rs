//! Error types for the PAC scanner.
//!
//! Only conditions that must abort an operation are errors. Unknown
//! opcodes, truncated instructions and empty buffers are modeled as data
//! in the entity model instead.

use thiserror::Error;

/// Primary error type for the PAC scanner.
#[derive(Debug, Error)]
pub enum PacError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A definition row is missing fields or carries invalid values.
    #[error("Malformed definition row at line {line}: {reason}")]
    MalformedDefinitionRow { line: usize, reason: String },

    /// Two decoded parameters of one instruction share a `(label, name)` key.
    #[error(
        "Duplicate parameter key ({label}; {name}) in instruction at offset 0x{offset:08X}"
    )]
    DuplicateParameterKey {
        offset: usize,
        label: String,
        name: String,
    },

    /// Truncated data when reading.
    #[error("Truncated data at offset {offset}: expected {expected} bytes, got {actual}")]
    TruncatedData {
        offset: usize,
        expected: usize,
        actual: usize,
    },
}

/// Result type alias for scanner operations.
pub type Result<T> = std::result::Result<T, PacError>;

impl PacError {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        PacError::MalformedDefinitionRow {
            line,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PacError::TruncatedData {
            offset: 16,
            expected: 4,
            actual: 1,
        };
        assert!(err.to_string().contains("16"));
        assert!(err.to_string().contains("4"));
    }

    #[test]
    fn test_duplicate_key_display() {
        let err = PacError::DuplicateParameterKey {
            offset: 0xBEEF,
            label: "uint32".into(),
            name: "count".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("0000BEEF"));
        assert!(msg.contains("uint32; count"));
    }

    #[test]
    fn test_malformed_row() {
        let err = PacError::malformed(7, "not enough fields");
        assert!(err.to_string().contains("line 7"));
    }
}
