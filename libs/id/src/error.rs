use thiserror::Error;

/// Why a string is not a valid identifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("empty identifier")]
    Empty,

    /// Well-formed, but for another resource type (e.g. a node id where a
    /// zone id was expected).
    #[error("identifier prefix is '{actual}', expected '{expected}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    #[error("identifier has no '_' between prefix and ULID")]
    MissingSeparator,

    #[error("identifier ULID is malformed: {0}")]
    InvalidUlid(String),
}
