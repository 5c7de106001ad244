//! Ollama chat API client (`/api/chat`, non-streaming, function tools).

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::instrument;

use crate::core::transcript::Transcript;
use crate::io::model::{JsonHttp, ModelClient, ModelError};
use crate::io::tools::{ToolSpec, inspection_specs, shell_spec};

pub struct OllamaClient {
    http: JsonHttp,
    url: String,
    model: String,
    tools: Vec<Value>,
}

impl OllamaClient {
    pub fn new(host: &str, model: impl Into<String>, tools: Vec<Value>, timeout: Duration) -> Self {
        Self {
            http: JsonHttp::new(timeout),
            url: format!("{}/api/chat", host.trim_end_matches('/')),
            model: model.into(),
            tools,
        }
    }
}

impl ModelClient for OllamaClient {
    #[instrument(skip_all, fields(model = %self.model, messages = transcript.len()))]
    fn respond(&self, transcript: &Transcript) -> Result<Vec<Value>, ModelError> {
        let body = build_request(&self.model, transcript, &self.tools);
        let response = self.http.post(&self.url, None, &body)?;
        reply_to_items(response)
    }
}

/// Function tools: `shell` plus the inspection functions when enabled.
pub fn build_tools(shell: bool, inspection: bool) -> Vec<Value> {
    let mut specs = Vec::new();
    if shell {
        specs.push(shell_spec());
    }
    if inspection {
        specs.extend(inspection_specs());
    }
    specs.iter().map(ToolSpec::ollama_json).collect()
}

pub fn build_request(model: &str, transcript: &Transcript, tools: &[Value]) -> Value {
    let messages: Vec<Value> = transcript
        .messages()
        .iter()
        .map(|message| json!({"role": message.role.as_str(), "content": message.text()}))
        .collect();

    let mut body = json!({"model": model, "messages": messages, "stream": false});
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools.to_vec());
    }
    body
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ReplyToolCall>,
}

#[derive(Debug, Deserialize)]
struct ReplyToolCall {
    function: ReplyFunction,
}

#[derive(Debug, Deserialize)]
struct ReplyFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Convert a chat reply into the generic output-item shape the normalizer reads.
pub fn reply_to_items(response: Value) -> Result<Vec<Value>, ModelError> {
    let reply: ChatReply =
        serde_json::from_value(response).map_err(|err| ModelError::Decode(err.to_string()))?;

    let mut items = Vec::new();
    if !reply.message.content.trim().is_empty() {
        items.push(json!({"type": "text", "text": reply.message.content}));
    }
    for call in reply.message.tool_calls {
        items.push(json!({
            "type": "function_call",
            "name": call.function.name,
            "arguments": call.function.arguments,
        }));
    }
    Ok(items)
}
