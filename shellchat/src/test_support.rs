//! Scripted fakes for driving the conversation loop in tests.

use std::cell::RefCell;
use std::collections::VecDeque;

use anyhow::Result;
use serde_json::{Value, json};

use crate::core::action::ExecutionResult;
use crate::core::transcript::Transcript;
use crate::io::executor::Confirm;
use crate::io::model::{ModelClient, ModelError};
use crate::io::session_log::SessionLogPaths;
use crate::io::terminal::{Notice, Operator, is_affirmative};

/// A `{"type": "text"}` output item.
pub fn text_item(text: &str) -> Value {
    json!({"type": "text", "text": text})
}

/// A `local_shell_call` output item; `command` is a string or an argv array.
pub fn shell_call(command: Value) -> Value {
    json!({
        "type": "local_shell_call",
        "call_id": "call_1",
        "action": {"type": "exec", "command": command}
    })
}

/// Model that replays canned responses and records what it was sent.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: RefCell<VecDeque<Result<Vec<Value>, ModelError>>>,
    seen: RefCell<Vec<Transcript>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<Vec<Value>, ModelError>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            seen: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.borrow().len()
    }

    /// Transcript snapshots, one per call.
    pub fn transcripts_seen(&self) -> Vec<Transcript> {
        self.seen.borrow().clone()
    }
}

impl ModelClient for ScriptedModel {
    fn respond(&self, transcript: &Transcript) -> Result<Vec<Value>, ModelError> {
        self.seen.borrow_mut().push(transcript.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Decode("scripted model exhausted".to_string())))
    }
}

/// Owned copy of a [`Notice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedNotice {
    Ready,
    Thinking,
    ActionRequested(String),
    ActionFinished(ExecutionResult),
    Answer(String),
    TurnFailed(String),
    LogsWritten(SessionLogPaths),
    LogsFailed(String),
}

impl From<Notice<'_>> for RecordedNotice {
    fn from(notice: Notice<'_>) -> Self {
        match notice {
            Notice::Ready => Self::Ready,
            Notice::Thinking => Self::Thinking,
            Notice::ActionRequested(action) => Self::ActionRequested(action.to_string()),
            Notice::ActionFinished(result) => Self::ActionFinished(result.clone()),
            Notice::Answer(text) => Self::Answer(text.to_string()),
            Notice::TurnFailed(message) => Self::TurnFailed(message.to_string()),
            Notice::LogsWritten(paths) => Self::LogsWritten(paths.clone()),
            Notice::LogsFailed(message) => Self::LogsFailed(message.to_string()),
        }
    }
}

/// Operator with pre-typed input lines and confirmation answers.
///
/// Running out of either behaves like end of input.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    inputs: VecDeque<String>,
    confirmations: VecDeque<String>,
    confirm_requests: Vec<String>,
    notices: Vec<RecordedNotice>,
}

impl ScriptedOperator {
    pub fn with_inputs(inputs: &[&str]) -> Self {
        Self {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_confirmations(answers: &[&str]) -> Self {
        Self {
            confirmations: answers.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn and_confirmations(mut self, answers: &[&str]) -> Self {
        self.confirmations = answers.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Command lines the operator was asked to confirm, in order.
    pub fn confirm_requests(&self) -> Vec<&str> {
        self.confirm_requests.iter().map(String::as_str).collect()
    }

    pub fn notices(&self) -> &[RecordedNotice] {
        &self.notices
    }

    pub fn answers(&self) -> Vec<&str> {
        self.notices
            .iter()
            .filter_map(|n| match n {
                RecordedNotice::Answer(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<&str> {
        self.notices
            .iter()
            .filter_map(|n| match n {
                RecordedNotice::TurnFailed(message) => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn log_failures(&self) -> Vec<&str> {
        self.notices
            .iter()
            .filter_map(|n| match n {
                RecordedNotice::LogsFailed(message) => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl Confirm for ScriptedOperator {
    fn confirm(&mut self, command_line: &str) -> Result<bool> {
        self.confirm_requests.push(command_line.to_string());
        Ok(self
            .confirmations
            .pop_front()
            .is_some_and(|answer| is_affirmative(&answer)))
    }
}

impl Operator for ScriptedOperator {
    fn read_input(&mut self) -> Result<Option<String>> {
        Ok(self.inputs.pop_front())
    }

    fn notify(&mut self, notice: Notice<'_>) {
        self.notices.push(notice.into());
    }
}
