//! The registered vocabulary shared by token sources and the parser.
//!
//! Token ids 0–255 are literal bytes; ids 256–262 are the reserved structural
//! markers that delimit message headers, channels, content bodies, and
//! terminators. A source and a parser must agree on this encoding — the
//! session checks encoding names at startup, never mid-stream.
//!
//! Rendering a message produces
//! `<|start|>{author}<|channel|>{channel}<|message|>{content}<|end|>`
//! with the recipient rendered as a ` to={name}` suffix of the channel span
//! for assistant tool calls, or of the author span for tool results, and an
//! optional ` <|constrain|>{type}` before the body.

use crate::message::{ContentBlock, Conversation, Message, Role};

/// An opaque token id. Meaningful only through this vocabulary.
pub type Token = u32;

/// Name of this vocabulary, compared against a source's `encoding_name()`.
pub const ENCODING_NAME: &str = "harmony-byte-v1";

const MARKER_BASE: Token = 256;

/// The reserved structural markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// `<|start|>` — begins a message header
    Start,
    /// `<|channel|>` — switches header accumulation to the channel span
    Channel,
    /// `<|constrain|>` — switches to the content-type span
    Constrain,
    /// `<|message|>` — begins the content body
    Message,
    /// `<|end|>` — ends a message (more may follow in the turn)
    End,
    /// `<|return|>` — ends the turn's final user-addressed message
    Return,
    /// `<|call|>` — ends a tool-call message
    Call,
}

impl Marker {
    pub const ALL: [Marker; 7] = [
        Marker::Start,
        Marker::Channel,
        Marker::Constrain,
        Marker::Message,
        Marker::End,
        Marker::Return,
        Marker::Call,
    ];

    pub fn token(self) -> Token {
        MARKER_BASE + self as Token
    }

    pub fn from_token(token: Token) -> Option<Marker> {
        Marker::ALL.get(token.checked_sub(MARKER_BASE)? as usize).copied()
    }

    /// The bracketed tag this marker decodes to.
    pub fn tag(self) -> &'static str {
        match self {
            Marker::Start => "<|start|>",
            Marker::Channel => "<|channel|>",
            Marker::Constrain => "<|constrain|>",
            Marker::Message => "<|message|>",
            Marker::End => "<|end|>",
            Marker::Return => "<|return|>",
            Marker::Call => "<|call|>",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Marker> {
        Marker::ALL.into_iter().find(|m| m.tag() == tag)
    }
}

/// The stop set passed to token sources for an assistant turn. `<|end|>` is
/// deliberately absent: it separates messages within a turn and must flow
/// through to the parser.
pub fn stop_tokens_for_assistant_turn() -> TokenSet {
    TokenSet::from_markers(&[Marker::Return, Marker::Call])
}

/// A set of token ids, used as a generation stop set.
#[derive(Debug, Clone, Default)]
pub struct TokenSet(Vec<Token>);

impl TokenSet {
    pub fn from_markers(markers: &[Marker]) -> Self {
        Self(markers.iter().map(|m| m.token()).collect())
    }

    pub fn contains(&self, token: Token) -> bool {
        self.0.contains(&token)
    }
}

/// Encode plain text as byte tokens. Marker tags inside `text` are treated as
/// ordinary characters, not structure.
pub fn encode_text(text: &str) -> Vec<Token> {
    text.bytes().map(Token::from).collect()
}

/// Encode text, mapping embedded reserved tags to their marker ids.
///
/// A streamed backend speaks text, so structural tags arrive as literal
/// `<|end|>` spans; this is the re-encoding path that must accept them
/// rather than reject "unknown special text".
pub fn encode_with_special_tokens(text: &str) -> Vec<Token> {
    let mut out = Vec::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    'outer: while i < bytes.len() {
        if bytes[i] == b'<' {
            for marker in Marker::ALL {
                let tag = marker.tag().as_bytes();
                if bytes[i..].starts_with(tag) {
                    out.push(marker.token());
                    i += tag.len();
                    continue 'outer;
                }
            }
        }
        out.push(Token::from(bytes[i]));
        i += 1;
    }
    out
}

/// Decode a token sequence back to text. Byte runs decode as UTF-8 (lossily);
/// marker ids decode to their literal tags. Unknown ids are skipped.
pub fn decode(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut bytes: Vec<u8> = Vec::new();
    for &token in tokens {
        if token < MARKER_BASE {
            bytes.push(token as u8);
        } else {
            if !bytes.is_empty() {
                out.push_str(&String::from_utf8_lossy(&bytes));
                bytes.clear();
            }
            if let Some(marker) = Marker::from_token(token) {
                out.push_str(marker.tag());
            }
        }
    }
    if !bytes.is_empty() {
        out.push_str(&String::from_utf8_lossy(&bytes));
    }
    out
}

/// Render one message to tokens.
pub fn render_message(message: &Message) -> Vec<Token> {
    let mut out = vec![Marker::Start.token()];
    out.extend(encode_text(message.author.header_name()));

    // Assistant tool calls carry the recipient in the channel span; tool
    // results (and everything else) carry it in the author span.
    let recipient_in_channel =
        message.author.role == Role::Assistant && message.channel.is_some();
    if let Some(recipient) = &message.recipient {
        if !recipient_in_channel {
            out.extend(encode_text(&format!(" to={recipient}")));
        }
    }

    if let Some(channel) = &message.channel {
        out.push(Marker::Channel.token());
        out.extend(encode_text(channel));
        if recipient_in_channel {
            if let Some(recipient) = &message.recipient {
                out.extend(encode_text(&format!(" to={recipient}")));
            }
        }
    }

    if let Some(content_type) = &message.content_type {
        out.extend(encode_text(" "));
        out.push(Marker::Constrain.token());
        out.extend(encode_text(content_type));
    }

    out.push(Marker::Message.token());
    for block in &message.content {
        let ContentBlock::Text { text } = block;
        out.extend(encode_text(text));
    }

    let terminator = if message.is_tool_call() && message.author.role == Role::Assistant {
        Marker::Call
    } else {
        Marker::End
    };
    out.push(terminator.token());
    out
}

/// Render a whole conversation to tokens.
pub fn render_conversation(conversation: &Conversation) -> Vec<Token> {
    let mut out = Vec::new();
    for message in conversation.messages() {
        out.extend(render_message(message));
    }
    out
}

/// Render a conversation as the prompt for an assistant completion: the full
/// history followed by an open `<|start|>assistant` header for generation to
/// continue inside.
pub fn render_conversation_for_completion(conversation: &Conversation) -> Vec<Token> {
    let mut out = render_conversation(conversation);
    out.push(Marker::Start.token());
    out.extend(encode_text(Role::Assistant.as_str()));
    out
}

/// A chunk-safe re-encoder for streamed text.
///
/// Backends deliver text in arbitrary fragments, so a marker tag can be split
/// across two chunks (`…<|me` + `ssage|>…`). The encoder holds back any
/// suffix that could still become a tag and emits it once disambiguated.
#[derive(Debug, Default)]
pub struct StreamEncoder {
    pending: String,
}

impl StreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of streamed text, returning the tokens that are safe to
    /// emit so far.
    pub fn push(&mut self, chunk: &str) -> Vec<Token> {
        self.pending.push_str(chunk);
        let hold = Self::ambiguous_suffix_len(&self.pending);
        let emit_up_to = self.pending.len() - hold;
        if emit_up_to == 0 {
            return Vec::new();
        }
        let rest = self.pending.split_off(emit_up_to);
        let tokens = encode_with_special_tokens(&self.pending);
        self.pending = rest;
        tokens
    }

    /// Flush any held-back text once the stream has ended.
    pub fn finish(&mut self) -> Vec<Token> {
        let pending = std::mem::take(&mut self.pending);
        encode_with_special_tokens(&pending)
    }

    /// Length of the longest suffix of `text` that is a proper prefix of some
    /// marker tag. Tags are ASCII, so byte indexing stays on char boundaries.
    fn ambiguous_suffix_len(text: &str) -> usize {
        let mut longest = 0;
        for marker in Marker::ALL {
            let tag = marker.tag();
            let max = tag.len().min(text.len() + 1).saturating_sub(1);
            for k in (1..=max).rev() {
                if text.ends_with(&tag[..k]) {
                    longest = longest.max(k);
                    break;
                }
            }
        }
        longest
    }
}
