//! OpenAI Responses API client.

use std::time::Duration;

use serde_json::{Value, json};
use tracing::instrument;

use crate::core::transcript::{Role, Transcript};
use crate::io::model::{JsonHttp, ModelClient, ModelError};
use crate::io::tools::{ToolSpec, inspection_specs};

pub struct OpenAiClient {
    http: JsonHttp,
    url: String,
    api_key: String,
    model: String,
    tools: Vec<Value>,
}

impl OpenAiClient {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        tools: Vec<Value>,
        timeout: Duration,
    ) -> Self {
        Self {
            http: JsonHttp::new(timeout),
            url: format!("{}/responses", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: model.into(),
            tools,
        }
    }
}

impl ModelClient for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.model, messages = transcript.len()))]
    fn respond(&self, transcript: &Transcript) -> Result<Vec<Value>, ModelError> {
        let body = build_request(&self.model, transcript, &self.tools);
        let response = self.http.post(&self.url, Some(&self.api_key), &body)?;
        parse_output(response)
    }
}

/// Tool declarations: `local_shell`, the inspection functions, and
/// `file_search` when a vector store is configured.
pub fn build_tools(
    shell: bool,
    inspection: bool,
    vector_store_id: Option<&str>,
) -> Vec<Value> {
    let mut tools = Vec::new();
    if shell {
        tools.push(json!({"type": "local_shell"}));
    }
    if inspection {
        tools.extend(inspection_specs().iter().map(ToolSpec::openai_json));
    }
    if let Some(id) = vector_store_id {
        tools.push(json!({"type": "file_search", "vector_store_ids": [id]}));
    }
    tools
}

pub fn build_request(model: &str, transcript: &Transcript, tools: &[Value]) -> Value {
    let input: Vec<Value> = transcript
        .messages()
        .iter()
        .map(|message| {
            let part_type = match message.role {
                Role::User => "input_text",
                Role::Assistant => "output_text",
            };
            let content: Vec<Value> = message
                .content
                .iter()
                .map(|part| json!({"type": part_type, "text": part.render()}))
                .collect();
            json!({"role": message.role.as_str(), "content": content})
        })
        .collect();

    let mut body = json!({"model": model, "input": input});
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools.to_vec());
    }
    body
}

pub fn parse_output(mut response: Value) -> Result<Vec<Value>, ModelError> {
    match response.get_mut("output").map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(ModelError::Decode(format!(
            "`output` is not an array: {other}"
        ))),
        None => Err(ModelError::Decode("response has no `output` field".to_string())),
    }
}
