//! Error types for sftkit.

use thiserror::Error;

/// Result type alias for sftkit operations.
pub type Result<T> = std::result::Result<T, SftError>;

/// A raw example that cannot be turned into a training record.
///
/// These are per-example failures: the caller logs them, drops the example
/// and carries on with the rest of the batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidExample {
    /// Conversation has fewer turns than a back-and-forth needs.
    #[error("conversation has {count} turn(s), at least 2 are required")]
    TooFewTurns {
        /// Number of turns found.
        count: usize,
    },

    /// Turn speaker not present in the role lookup.
    #[error("turn {index}: unknown speaker '{from}'")]
    UnknownRole {
        /// Index of the offending turn.
        index: usize,
        /// The unrecognised `from` value.
        from: String,
    },

    /// Roles do not alternate user/assistant.
    #[error("turn {index}: expected role '{expected}', found '{found}'")]
    RoleMismatch {
        /// Index of the offending turn.
        index: usize,
        /// Role required at this position.
        expected: String,
        /// Role actually present.
        found: String,
    },

    /// A required field is absent.
    #[error("missing required field '{key}'")]
    MissingField {
        /// Field name.
        key: String,
    },

    /// A field is present but has the wrong shape.
    #[error("invalid field '{key}': {reason}")]
    InvalidField {
        /// Field name.
        key: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Main error type for sftkit operations.
#[derive(Error, Debug)]
pub enum SftError {
    /// Structurally invalid example (drop and continue).
    #[error("Invalid example: {0}")]
    InvalidExample(#[from] InvalidExample),

    /// Generated text does not contain the expected response marker.
    #[error("Malformed output: response marker '{marker}' not found")]
    MalformedOutput {
        /// The marker that was searched for.
        marker: String,
    },

    /// Tokenizer errors.
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Configuration errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl SftError {
    /// Whether the failure only concerns the current example.
    ///
    /// Batch processing skips recoverable errors and aborts on everything else.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidExample(_))
    }
}

impl From<serde_json::Error> for SftError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
