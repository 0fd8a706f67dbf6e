//! Error types for the tool synthesis system.

use thiserror::Error;

/// Result type alias for tool operations.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Errors that can occur while synthesizing, storing or running tools.
#[derive(Error, Debug)]
pub enum ToolError {
    /// A required environment variable is not set.
    #[error("MissingPrecondition: {0}")]
    MissingPrecondition(String),

    /// Installing a declared dependency failed.
    #[error("DependencyProvisioningFailure: {packages}: {reason}")]
    DependencyProvisioning { packages: String, reason: String },

    /// A generative call failed or returned unusable structure.
    #[error("GenerationFailure: {0}")]
    GenerationFailed(String),

    /// A cache hit resolved to a record the store does not have.
    #[error("StoreInconsistency: cache entry {0} has no stored record")]
    StoreInconsistency(String),

    /// The child process outlived its time bound.
    #[error("ExecutionTimeout: tool {tool_id} exceeded {secs}s")]
    ExecutionTimeout { tool_id: String, secs: u64 },

    /// The child process could not be run.
    #[error("ExecutionFailure: {0}")]
    ExecutionFailed(String),

    /// Output text could not be parsed as a literal value.
    #[error("DecodeFailure: {0}")]
    Decode(#[from] LiteralError),

    /// Tool not found.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// Invalid tool definition.
    #[error("invalid tool definition: {0}")]
    InvalidDefinition(String),

    /// The generative backend could not be reached or answered with an error.
    #[error("backend error: {0}")]
    Backend(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Embedding or similarity index failure.
    #[error("embedding error: {0}")]
    Embedding(#[from] toolsmith_embeddings::EmbeddingError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to create storage directory.
    #[error("failed to create directory: {0}")]
    CreateDirectory(String),

    /// Failed to read a file.
    #[error("failed to read file: {0}")]
    ReadFile(String),

    /// Failed to write a file.
    #[error("failed to write file: {0}")]
    WriteFile(String),

    /// Failed to delete a file.
    #[error("failed to delete file: {0}")]
    DeleteFile(String),
}

/// Errors from the literal value decoder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LiteralError {
    /// Input ended inside a value.
    #[error("unexpected end of input")]
    UnexpectedEnd,

    /// A character that cannot start or continue a literal.
    #[error("unexpected character {found:?} at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },

    /// Text after a complete value.
    #[error("trailing input at offset {0}")]
    TrailingInput(usize),

    /// A bare name that is not one of the literal keywords.
    #[error("not a literal: {0}")]
    NotALiteral(String),

    /// A malformed number or escape sequence.
    #[error("invalid {kind}: {text}")]
    Invalid { kind: &'static str, text: String },

    /// Nesting deeper than the decoder accepts.
    #[error("nesting too deep")]
    TooDeep,
}
