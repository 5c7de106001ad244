//! Append-only session transcript.
//!
//! The transcript is the full ordered history resent to the model on every
//! call. Messages are never mutated after they are appended and a stored
//! message always carries at least one content part.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Text prepended to every action result injected back into the transcript.
pub const COMMAND_OUTPUT_PREFIX: &str = "Command Output:\n";

/// Marker that opens the textual encoding of an action summary.
pub const SYSTEM_ACTION_MARKER: &str = "[System Action:";

/// Author of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Narrative text, stored verbatim.
    Text { text: String },
    /// Audit record of an action the model requested.
    ActionSummary { command: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn action_summary(command: impl Into<String>) -> Self {
        ContentPart::ActionSummary {
            command: command.into(),
        }
    }

    /// Textual form sent to the model and written to logs.
    pub fn render(&self) -> String {
        match self {
            ContentPart::Text { text } => text.clone(),
            ContentPart::ActionSummary { command } => {
                format!("{SYSTEM_ACTION_MARKER} Executed {command}]")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self { role, content }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::text(text)])
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentPart::text(text)])
    }

    /// User message carrying the textual result of an executed action.
    pub fn command_output(result_text: &str) -> Self {
        Self::user_text(format!("{COMMAND_OUTPUT_PREFIX}{result_text}"))
    }

    /// All parts rendered and joined with newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(ContentPart::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Ordered, append-only message history for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    /// Start a transcript with the instruction message the model sees first.
    pub fn seeded(instructions: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user_text(instructions)],
        }
    }

    /// Append a message. Messages without content are rejected.
    pub fn append(&mut self, message: Message) -> Result<()> {
        if message.content.is_empty() {
            bail!("refusing to append {} message with no content", message.role.as_str());
        }
        self.messages.push(message);
        Ok(())
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

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Pretty JSON array of messages with a trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let mut buf = serde_json::to_string_pretty(self)?;
        buf.push('\n');
        Ok(buf)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let transcript: Transcript = serde_json::from_str(raw)?;
        if let Some(empty) = transcript.messages.iter().find(|m| m.content.is_empty()) {
            bail!("transcript contains an empty {} message", empty.role.as_str());
        }
        Ok(transcript)
    }
}
