//! Turn observation callbacks.
//!
//! The session reports streaming progress through this trait so the CLI can
//! render either raw token echo or formatted output. Observers are
//! presentation only; the loop never depends on their behavior.

use colloquy_core::encoding::Token;
use colloquy_core::Message;

/// Callbacks fired while a turn streams.
pub trait TurnObserver {
    /// A raw token arrived from the source.
    fn on_token(&mut self, _token: Token) {}

    /// A message header completed; content follows.
    fn on_message_start(&mut self, _channel: Option<&str>, _recipient: Option<&str>) {}

    /// Newly decoded content text.
    fn on_content_delta(&mut self, _delta: &str) {}

    /// A message finished (assistant output or an appended tool result).
    fn on_message_complete(&mut self, _message: &Message) {}
}

/// Observer that ignores everything.
pub struct NullObserver;

impl TurnObserver for NullObserver {}
