//! Error types for the Colloquy domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

use crate::encoding::Token;

/// The top-level error type for all Colloquy operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Token source errors ---
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    // --- Stream parse errors ---
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Backend not reachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Backend returned status {status_code}: {message}")]
    BadStatus { status_code: u16, message: String },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Source produces encoding '{actual}', session requires '{expected}'")]
    EncodingMismatch { expected: String, actual: String },

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("Model load failed: {0}")]
    ModelLoadFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unexpected {marker} marker in {phase} phase")]
    UnexpectedMarker {
        marker: &'static str,
        phase: &'static str,
    },

    #[error("Content byte outside a message in {phase} phase")]
    UnexpectedContent { phase: &'static str },

    #[error("Token id {0} is outside the vocabulary")]
    UnknownToken(Token),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("No tool accepts recipient '{0}'")]
    UnknownRecipient(String),

    #[error("Tool '{0}' is recognized but not enabled")]
    NotEnabled(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("Failed to parse config file {path}: {reason}")]
    ParseFailed { path: String, reason: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Missing required setting: {0}")]
    Missing(String),
}
