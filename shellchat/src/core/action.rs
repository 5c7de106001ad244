//! Typed action requests and their execution results.
//!
//! Raw model payloads are converted into these types once, in the
//! normalizer. Nothing downstream inspects response JSON again.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Text recorded when the operator declines a command.
pub const REFUSAL_TEXT: &str = "execution refused by operator";

/// Command as sent by the model: a single shell-like string or an argv list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Text(String),
    Argv(Vec<String>),
}

impl CommandLine {
    pub fn is_empty(&self) -> bool {
        match self {
            CommandLine::Text(text) => text.trim().is_empty(),
            CommandLine::Argv(argv) => argv.is_empty(),
        }
    }

    /// Literal command shown to the operator and recorded in the transcript.
    pub fn display(&self) -> String {
        match self {
            CommandLine::Text(text) => text.clone(),
            CommandLine::Argv(argv) => shlex::try_join(argv.iter().map(String::as_str))
                .unwrap_or_else(|_| argv.join(" ")),
        }
    }
}

/// Request to run one local command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    /// Provider-assigned id, when the response carries one.
    pub call_id: Option<String>,
    pub command: CommandLine,
    pub working_directory: Option<PathBuf>,
    /// Overlaid on the inherited environment; these win on collision.
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl ActionRequest {
    pub fn new(command: CommandLine) -> Self {
        Self {
            call_id: None,
            command,
            working_directory: None,
            env: BTreeMap::new(),
            timeout: None,
        }
    }
}

/// Call to one of the built-in inspection tools.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Anything the model asked the loop to do before it continues.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Shell(ActionRequest),
    Tool(ToolCall),
}

impl Action {
    /// Short description used in the `[System Action: ...]` audit text.
    pub fn describe(&self) -> String {
        match self {
            Action::Shell(request) => request.command.display(),
            Action::Tool(call) => match &call.arguments {
                serde_json::Value::Object(map) if map.is_empty() => call.name.clone(),
                serde_json::Value::Null => call.name.clone(),
                args => format!("{} {}", call.name, args),
            },
        }
    }
}

/// Outcome of a single action, folded into the transcript as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub combined_output: String,
    pub failed: bool,
    pub error_detail: Option<String>,
    pub refused: bool,
}

impl ExecutionResult {
    pub fn completed(combined_output: impl Into<String>) -> Self {
        Self {
            combined_output: combined_output.into(),
            failed: false,
            error_detail: None,
            refused: false,
        }
    }

    pub fn failure(combined_output: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            combined_output: combined_output.into(),
            failed: true,
            error_detail: Some(detail.into()),
            refused: false,
        }
    }

    pub fn refused() -> Self {
        Self {
            combined_output: REFUSAL_TEXT.to_string(),
            failed: false,
            error_detail: None,
            refused: true,
        }
    }

    /// Text appended after the `Command Output:` prefix.
    pub fn transcript_text(&self) -> String {
        match &self.error_detail {
            Some(detail) if self.combined_output.is_empty() => format!("[{detail}]"),
            Some(detail) if self.combined_output.ends_with('\n') => {
                format!("{}[{detail}]", self.combined_output)
            }
            Some(detail) => format!("{}\n[{detail}]", self.combined_output),
            None => self.combined_output.clone(),
        }
    }
}
