//! # Colloquy Core
//!
//! Domain types, the streaming message parser, and trait seams for the
//! Colloquy chat driver. This crate has **zero transport dependencies** — it
//! defines the data model and contracts that all other crates implement
//! against.
//!
//! The flow through the system:
//! conversation → rendered tokens → token source → streaming parser →
//! completed messages → tool router → conversation.
//!
//! Every external collaborator sits behind a trait defined here
//! ([`TokenSource`] for backends, [`ToolCapability`] for tools), which keeps
//! the session loop independent of backend identity and lets tests drive it
//! with scripted implementations.

pub mod encoding;
pub mod error;
pub mod message;
pub mod parser;
pub mod source;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use encoding::{Marker, Token, TokenSet, ENCODING_NAME};
pub use error::{ConfigError, Error, ParseError, Result, SourceError, ToolError};
pub use message::{Author, Conversation, ContentBlock, Message, Role, ASSISTANT_RECIPIENT};
pub use parser::{ParsePhase, StreamParser};
pub use source::TokenSource;
pub use tool::{ToolCapability, ToolClass, ToolRouter};
