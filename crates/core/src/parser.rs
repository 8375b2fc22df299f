//! The streaming message parser.
//!
//! Consumes one token at a time and incrementally builds structured messages:
//! `AwaitingStart` (between messages) → `Header` (author, then channel, then
//! content-type spans) → `Content` (body bytes, emitting text deltas) → back
//! to `AwaitingStart` when a terminator arrives. One parser lives for exactly
//! one generation turn and may emit several completed messages in that turn.
//!
//! Content deltas surface only at valid UTF-8 boundaries: a multi-byte
//! character split across tokens yields an empty delta until its last byte
//! arrives. Invalid byte sequences decode to U+FFFD rather than failing the
//! stream.

use crate::encoding::{Marker, Token};
use crate::error::ParseError;
use crate::message::{Author, ContentBlock, Message, Role};
use tracing::trace;

/// Which part of the message the parser is currently accumulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsePhase {
    /// Between messages, expecting `<|start|>`
    AwaitingStart,
    /// After `<|start|>`, accumulating the author span
    HeaderAuthor,
    /// After `<|channel|>`, accumulating the channel span
    HeaderChannel,
    /// After `<|constrain|>`, accumulating the content-type span
    HeaderConstrain,
    /// After `<|message|>`, accumulating the body
    Content,
}

impl ParsePhase {
    fn name(self) -> &'static str {
        match self {
            ParsePhase::AwaitingStart => "awaiting-start",
            ParsePhase::HeaderAuthor => "header-author",
            ParsePhase::HeaderChannel => "header-channel",
            ParsePhase::HeaderConstrain => "header-constrain",
            ParsePhase::Content => "content",
        }
    }
}

/// The per-turn streaming parser state machine.
#[derive(Debug)]
pub struct StreamParser {
    phase: ParsePhase,
    author_span: Vec<u8>,
    channel_span: Vec<u8>,
    constrain_span: Vec<u8>,
    content: Vec<u8>,
    /// Bytes of `content` already surfaced as deltas
    content_emitted: usize,
    /// Text surfaced so far for the in-progress message
    content_text: String,
    last_delta: String,
    messages: Vec<Message>,
}

impl StreamParser {
    /// A parser expecting a full message stream, beginning with `<|start|>`.
    pub fn new() -> Self {
        Self {
            phase: ParsePhase::AwaitingStart,
            author_span: Vec::new(),
            channel_span: Vec::new(),
            constrain_span: Vec::new(),
            content: Vec::new(),
            content_emitted: 0,
            content_text: String::new(),
            last_delta: String::new(),
            messages: Vec::new(),
        }
    }

    /// A parser primed for an assistant turn. Completion rendering ends with
    /// an open `<|start|>assistant` header, so the turn's first tokens
    /// continue the header rather than starting a new message.
    pub fn assistant_turn() -> Self {
        let mut parser = Self::new();
        parser.phase = ParsePhase::HeaderAuthor;
        parser.author_span = Role::Assistant.as_str().as_bytes().to_vec();
        parser
    }

    pub fn phase(&self) -> ParsePhase {
        self.phase
    }

    /// The text newly decoded by the most recent `process` call. Empty when
    /// the token was structural or completed no UTF-8 character.
    pub fn last_content_delta(&self) -> &str {
        &self.last_delta
    }

    /// Channel of the in-progress message, once its header span is complete.
    pub fn current_channel(&self) -> Option<String> {
        let channel = span_text(&self.channel_span);
        let (channel, _) = split_recipient(&channel);
        if channel.is_empty() { None } else { Some(channel) }
    }

    /// Recipient of the in-progress message, parsed from whichever header
    /// span carries the ` to=` suffix.
    pub fn current_recipient(&self) -> Option<String> {
        let (_, from_channel) = split_recipient(&span_text(&self.channel_span));
        let (_, from_author) = split_recipient(&span_text(&self.author_span));
        from_channel.or(from_author)
    }

    /// Messages completed so far this turn.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn take_messages(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.messages)
    }

    /// Feed one token. Returns `true` when the token completed a message.
    pub fn process(&mut self, token: Token) -> Result<bool, ParseError> {
        self.last_delta.clear();
        match Marker::from_token(token) {
            None => {
                let byte = u8::try_from(token).map_err(|_| ParseError::UnknownToken(token))?;
                match self.phase {
                    ParsePhase::AwaitingStart => {
                        return Err(ParseError::UnexpectedContent {
                            phase: self.phase.name(),
                        });
                    }
                    ParsePhase::HeaderAuthor => self.author_span.push(byte),
                    ParsePhase::HeaderChannel => self.channel_span.push(byte),
                    ParsePhase::HeaderConstrain => self.constrain_span.push(byte),
                    ParsePhase::Content => {
                        self.content.push(byte);
                        self.last_delta = self.drain_content_delta();
                        self.content_text.push_str(&self.last_delta);
                    }
                }
                Ok(false)
            }
            Some(Marker::Start) => {
                if self.phase != ParsePhase::AwaitingStart {
                    return Err(self.unexpected(Marker::Start));
                }
                self.phase = ParsePhase::HeaderAuthor;
                Ok(false)
            }
            Some(Marker::Channel) => {
                if self.phase != ParsePhase::HeaderAuthor {
                    return Err(self.unexpected(Marker::Channel));
                }
                self.phase = ParsePhase::HeaderChannel;
                Ok(false)
            }
            Some(Marker::Constrain) => {
                if !matches!(
                    self.phase,
                    ParsePhase::HeaderAuthor | ParsePhase::HeaderChannel
                ) {
                    return Err(self.unexpected(Marker::Constrain));
                }
                self.phase = ParsePhase::HeaderConstrain;
                Ok(false)
            }
            Some(Marker::Message) => {
                if !matches!(
                    self.phase,
                    ParsePhase::HeaderAuthor
                        | ParsePhase::HeaderChannel
                        | ParsePhase::HeaderConstrain
                ) {
                    return Err(self.unexpected(Marker::Message));
                }
                self.phase = ParsePhase::Content;
                Ok(false)
            }
            Some(marker @ (Marker::End | Marker::Return | Marker::Call)) => {
                if self.phase == ParsePhase::AwaitingStart {
                    // Stray terminator at a message boundary: tolerated so
                    // synthetic termination stays idempotent.
                    trace!(marker = marker.tag(), "Ignoring terminator between messages");
                    return Ok(false);
                }
                self.finalize();
                Ok(true)
            }
        }
    }

    /// Finalize the in-progress message and reset for the next one.
    fn finalize(&mut self) {
        // Any trailing incomplete UTF-8 sequence decodes to U+FFFD.
        let tail = &self.content[self.content_emitted..];
        if !tail.is_empty() {
            self.content_text.push_str(&String::from_utf8_lossy(tail));
        }

        let (author_name, author_recipient) = split_recipient(&span_text(&self.author_span));
        let (channel, channel_recipient) = split_recipient(&span_text(&self.channel_span));
        let (role, name) = Role::from_author_name(&author_name);
        let content_type = span_text(&self.constrain_span);

        let message = Message {
            author: Author { role, name },
            recipient: channel_recipient.or(author_recipient),
            channel: if channel.is_empty() { None } else { Some(channel) },
            content_type: if content_type.is_empty() {
                None
            } else {
                Some(content_type)
            },
            content: vec![ContentBlock::Text {
                text: std::mem::take(&mut self.content_text),
            }],
        };
        trace!(
            role = message.role().as_str(),
            channel = message.channel.as_deref().unwrap_or(""),
            recipient = message.recipient.as_deref().unwrap_or(""),
            "Message complete"
        );
        self.messages.push(message);

        self.phase = ParsePhase::AwaitingStart;
        self.author_span.clear();
        self.channel_span.clear();
        self.constrain_span.clear();
        self.content.clear();
        self.content_emitted = 0;
    }

    /// Decode the not-yet-emitted content bytes up to the last valid UTF-8
    /// boundary, replacing definitely-invalid sequences with U+FFFD.
    fn drain_content_delta(&mut self) -> String {
        let mut out = String::new();
        loop {
            let tail = &self.content[self.content_emitted..];
            if tail.is_empty() {
                break;
            }
            match std::str::from_utf8(tail) {
                Ok(s) => {
                    out.push_str(s);
                    self.content_emitted = self.content.len();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    if valid > 0 {
                        out.push_str(&String::from_utf8_lossy(&tail[..valid]));
                    }
                    match e.error_len() {
                        Some(bad) => {
                            out.push('\u{FFFD}');
                            self.content_emitted += valid + bad;
                        }
                        None => {
                            // Incomplete trailing sequence: wait for more bytes.
                            self.content_emitted += valid;
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    fn unexpected(&self, marker: Marker) -> ParseError {
        ParseError::UnexpectedMarker {
            marker: marker.tag(),
            phase: self.phase.name(),
        }
    }
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

fn span_text(span: &[u8]) -> String {
    String::from_utf8_lossy(span).trim().to_string()
}

/// Split a header span into its text and an optional ` to={recipient}`
/// suffix (`"commentary to=python"` → `("commentary", Some("python"))`).
fn split_recipient(span: &str) -> (String, Option<String>) {
    if let Some(idx) = span.find("to=") {
        let before = span[..idx].trim();
        let recipient = span[idx + 3..].trim();
        // "to=" at the start of a span means the whole span is the suffix
        if (idx == 0 || span[..idx].ends_with(' ')) && !recipient.is_empty() {
            return (before.to_string(), Some(recipient.to_string()));
        }
    }
    (span.trim().to_string(), None)
}
