//! Message and Conversation domain types.
//!
//! These are the value objects that flow through the whole driver: the user
//! sends a message → the session renders the conversation → the parser emits
//! assistant messages → the tool router appends tool results. Messages are
//! immutable once constructed and a [`Conversation`] is append-only.

use serde::{Deserialize, Serialize};

/// The recipient sentinel that addresses a message back to the assistant
/// (used on tool results so the model sees the tool's output next turn).
pub const ASSISTANT_RECIPIENT: &str = "assistant";

/// The role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (identity, date, enabled tools)
    System,
    /// Operator-provided instructions and function declarations
    Developer,
    /// The end user
    User,
    /// The model
    Assistant,
    /// A tool reporting its output
    Tool,
}

impl Role {
    /// The wire name of this role, as it appears in a message header.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Developer => "developer",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    /// Parse a header author name into a role. Names that are not one of the
    /// four reserved roles belong to tools (e.g. `browser.search`,
    /// `functions.apply_patch`).
    pub fn from_author_name(name: &str) -> (Role, Option<String>) {
        match name {
            "system" => (Role::System, None),
            "developer" => (Role::Developer, None),
            "user" => (Role::User, None),
            "assistant" => (Role::Assistant, None),
            other => (Role::Tool, Some(other.to_string())),
        }
    }
}

/// A message author: a role plus an optional named identity (tool name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Author {
    pub fn new(role: Role) -> Self {
        Self { role, name: None }
    }

    pub fn named(role: Role, name: impl Into<String>) -> Self {
        Self {
            role,
            name: Some(name.into()),
        }
    }

    /// The name this author renders as in a message header.
    pub fn header_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.role.as_str())
    }
}

/// One block of message content. Text-only today; a closed enum so richer
/// block kinds can be added without changing the message shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
}

/// A single message in a conversation. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who authored this message
    pub author: Author,

    /// Where this message is addressed: a tool/function target, the
    /// assistant sentinel, or nothing (a final user-facing message)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,

    /// Semantic stream tag: "analysis" (reasoning), "commentary"
    /// (tool traffic), "final" (the user-facing answer)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Content-type constraint on a tool call (e.g. "json")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Ordered content blocks
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Create a message from a role and a single text block.
    pub fn from_role_and_content(role: Role, text: impl Into<String>) -> Self {
        Self {
            author: Author::new(role),
            recipient: None,
            channel: None,
            content_type: None,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::from_role_and_content(Role::System, text)
    }

    pub fn developer(text: impl Into<String>) -> Self {
        Self::from_role_and_content(Role::Developer, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::from_role_and_content(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::from_role_and_content(Role::Assistant, text)
    }

    /// Create a tool-output message authored by the named tool and addressed
    /// back to the assistant.
    pub fn tool_output(tool_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: Author::named(Role::Tool, tool_name),
            recipient: Some(ASSISTANT_RECIPIENT.to_string()),
            channel: None,
            content_type: None,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn role(&self) -> Role {
        self.author.role
    }

    /// The concatenated text of all content blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|b| match b {
                ContentBlock::Text { text } => text.as_str(),
            })
            .collect()
    }

    /// Whether this message calls a tool (recipient set to something other
    /// than the assistant sentinel).
    pub fn is_tool_call(&self) -> bool {
        matches!(self.recipient.as_deref(), Some(r) if r != ASSISTANT_RECIPIENT)
    }
}

/// An append-only, causally ordered sequence of messages. The single source
/// of truth for prompt reconstruction: rendering to tokens is a pure function
/// of this sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        Self {
            messages: messages.into_iter().collect(),
        }
    }

    /// Append a message. Messages are never mutated or removed.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
