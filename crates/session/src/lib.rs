//! The Colloquy session loop.
//!
//! Owns the conversation and drives the generate → parse → dispatch cycle:
//! a user message triggers a generation turn; if the turn ends in a tool
//! call the router runs it, appends the results, and generation resumes;
//! the cycle ends when the assistant addresses the user.

pub mod observer;
pub mod prompt;
pub mod session;

pub use observer::{NullObserver, TurnObserver};
pub use prompt::{build_developer_message, build_system_message, PromptOptions};
pub use session::Session;
