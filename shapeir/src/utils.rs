use strum::{EnumIs, EnumTryAs};
use thiserror::Error;

/// A single error reported by the text parser.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParserError {
    /// Byte offset of the start of the offending text.
    pub start: usize,
    /// Byte offset one past the end of the offending text.
    pub end: usize,
    pub message: String,
}

impl std::fmt::Display for ParserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}: {}", self.start, self.end, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumIs, EnumTryAs, Error)]
pub enum Error {
    /// The text form could not be parsed.
    #[error(
        "Failed to parse module: {} error(s) reported, first: {}",
        .errors.len(),
        .errors.first().map(ToString::to_string).unwrap_or_default()
    )]
    ParserErrors { errors: Vec<ParserError> },

    /// The module could not be encoded into the binary container.
    #[error("Failed to serialize module into the binary container: {0}")]
    Serialize(String),

    /// The binary payload could not be decoded.
    #[error("Failed to deserialize module from the binary container: {0}")]
    Deserialize(String),

    /// The binary container does not start with the expected magic bytes.
    #[error("Invalid magic bytes: the data is not a serialized module.")]
    InvalidMagic,

    /// The binary container was produced by an incompatible writer.
    #[error(
        "Incompatible serialized module: written by version {found}, this reader requires {required}."
    )]
    UnsupportedBytecodeVersion { found: String, required: String },
}
