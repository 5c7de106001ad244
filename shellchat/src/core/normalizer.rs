//! Response normalization: raw model output items into transcript parts and actions.
//!
//! Providers return loosely-shaped JSON items. Each item is parsed into a
//! tagged [`OutputItem`] and then split into assistant content (narrative
//! text plus `[System Action: ...]` audit parts) and typed [`Action`]s, in
//! the order the model produced them. Unknown or malformed items are skipped.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::action::{Action, ActionRequest, CommandLine, ToolCall};
use crate::core::transcript::ContentPart;

/// Function name under which the shell capability is offered to function-calling models.
pub const SHELL_FUNCTION: &str = "shell";

/// Summary used when a shell call arrives without a usable command.
const UNKNOWN_COMMAND: &str = "unknown";

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    Text {
        text: String,
    },
    Message {
        #[serde(default)]
        content: Vec<MessageContent>,
    },
    LocalShellCall {
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        action: Option<Value>,
    },
    ToolCall {
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        arguments: Option<Value>,
    },
    FunctionCall {
        #[serde(default)]
        call_id: Option<String>,
        name: String,
        #[serde(default)]
        arguments: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MessageContent {
    OutputText {
        text: String,
        #[serde(default)]
        annotations: Vec<Annotation>,
    },
    Refusal {
        refusal: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Annotation {
    #[serde(default)]
    filename: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ShellPayload {
    #[serde(default)]
    command: Option<CommandLine>,
    #[serde(default)]
    working_directory: Option<PathBuf>,
    #[serde(default)]
    env: Option<BTreeMap<String, String>>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

/// Canonical view of one model response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedResponse {
    /// Assistant content for the transcript, in response order.
    pub parts: Vec<ContentPart>,
    /// Requested actions, in response order.
    pub actions: Vec<Action>,
}

impl NormalizedResponse {
    /// Narrative text only (action summaries excluded), joined by newlines.
    pub fn narrative_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::ActionSummary { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Split raw output items into transcript parts and actions.
pub fn normalize(items: &[Value]) -> NormalizedResponse {
    let mut normalized = NormalizedResponse::default();

    for raw in items {
        let item = match OutputItem::deserialize(raw) {
            Ok(item) => item,
            Err(err) => {
                warn!(err = %err, "skipping malformed output item");
                continue;
            }
        };

        match item {
            OutputItem::Text { text } => normalized.parts.push(ContentPart::text(text)),
            OutputItem::Message { content } => {
                for part in content {
                    match part {
                        MessageContent::OutputText { text, annotations } => normalized
                            .parts
                            .push(ContentPart::text(with_sources(text, &annotations))),
                        MessageContent::Refusal { refusal } => {
                            normalized.parts.push(ContentPart::text(refusal));
                        }
                        MessageContent::Other => {}
                    }
                }
            }
            OutputItem::LocalShellCall { call_id, action } => {
                push_shell(&mut normalized, call_id, action);
            }
            OutputItem::ToolCall { call_id, arguments } => {
                push_shell(&mut normalized, call_id, arguments);
            }
            OutputItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => {
                if name == SHELL_FUNCTION {
                    push_shell(&mut normalized, call_id, arguments);
                } else {
                    let arguments = arguments
                        .and_then(decode_arguments)
                        .unwrap_or_else(|| Value::Object(Default::default()));
                    push_action(
                        &mut normalized,
                        Action::Tool(ToolCall { name, arguments }),
                    );
                }
            }
            OutputItem::Unknown => {
                debug!(kind = ?raw.get("type"), "ignoring unknown output item");
            }
        }
    }

    normalized
}

fn push_shell(normalized: &mut NormalizedResponse, call_id: Option<String>, payload: Option<Value>) {
    let payload = payload
        .and_then(decode_arguments)
        .and_then(|value| match ShellPayload::deserialize(&value) {
            Ok(payload) => Some(payload),
            Err(err) => {
                warn!(err = %err, "malformed shell payload");
                None
            }
        })
        .unwrap_or_default();

    match payload.command {
        Some(command) if !command.is_empty() => {
            let request = ActionRequest {
                call_id,
                command,
                working_directory: payload.working_directory,
                env: payload.env.unwrap_or_default(),
                timeout: payload.timeout_ms.map(Duration::from_millis),
            };
            push_action(normalized, Action::Shell(request));
        }
        _ => {
            warn!("shell call without a command; recording only");
            normalized
                .parts
                .push(ContentPart::action_summary(UNKNOWN_COMMAND));
        }
    }
}

fn push_action(normalized: &mut NormalizedResponse, action: Action) {
    normalized
        .parts
        .push(ContentPart::action_summary(action.describe()));
    normalized.actions.push(action);
}

/// Arguments arrive either as a JSON object or as a JSON-encoded string.
fn decode_arguments(value: Value) -> Option<Value> {
    match value {
        Value::String(raw) => match serde_json::from_str(&raw) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                warn!(err = %err, "arguments string is not valid JSON");
                None
            }
        },
        Value::Null => None,
        other => Some(other),
    }
}

/// Append a `Sources:` list for file citations, deduplicated in first-seen order.
fn with_sources(text: String, annotations: &[Annotation]) -> String {
    let mut sources: Vec<&str> = Vec::new();
    for name in annotations.iter().filter_map(|a| a.filename.as_deref()) {
        if !sources.contains(&name) {
            sources.push(name);
        }
    }
    if sources.is_empty() {
        return text;
    }
    let mut out = text;
    out.push_str("\n\nSources:\n");
    for source in sources {
        out.push_str("- ");
        out.push_str(source);
        out.push('\n');
    }
    out
}
