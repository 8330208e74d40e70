//! OpenAI-compatible streaming adapter.
//!
//! Works with OpenAI, Ollama, vLLM, LM Studio, DeepSeek, Together and any
//! other endpoint that follows the chat completions contract.

use crate::decoder::StreamDecoder;
use crate::sse::sse_event_stream;
use crate::traits::{ChatRequest, LlmProvider};
use crate::util::from_reqwest;
use cs_domain::config::LlmConfig;
use cs_domain::error::{Error, Result};
use cs_domain::stream::{BoxStream, StreamEvent};
use cs_domain::tool::{ContentPart, Message, MessageContent, Role, ToolDefinition};
use cs_domain::trace::TraceEvent;
use futures_util::TryStreamExt;
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.provider_id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// Build the JSON body for a streaming completion.
pub(crate) fn build_chat_body(req: &ChatRequest) -> Value {
    let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "stream": true,
        "stream_options": {"include_usage": true},
    });

    if !req.tools.is_empty() {
        let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
        body["tools"] = Value::Array(tools);
    }
    if let Some(temp) = req.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    body
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => tool_result_to_openai(msg),
        Role::Assistant => assistant_to_openai(msg),
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content.extract_all_text(),
        }),
    }
}

fn assistant_to_openai(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text),
                    ContentPart::ToolUse { id, name, input } => {
                        // A string input is the raw text of a call whose
                        // arguments never parsed; replay it verbatim.
                        let arguments = match input {
                            Value::String(raw) => raw.clone(),
                            other => other.to_string(),
                        };
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {"name": name, "arguments": arguments},
                        }));
                    }
                    ContentPart::ToolResult { .. } => {}
                }
            }
        }
    }

    obj["content"] = if text_parts.is_empty() {
        Value::Null
    } else {
        Value::String(text_parts.join("\n"))
    };
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_openai(msg: &Message) -> Value {
    let (id, content) = match &msg.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .find_map(|p| match p {
                ContentPart::ToolResult { tool_use_id, content } => {
                    Some((tool_use_id.as_str(), content.as_str()))
                }
                _ => None,
            })
            .unwrap_or(("", "")),
        MessageContent::Text(t) => ("", t.as_str()),
    };
    serde_json::json!({"role": "tool", "tool_call_id": id, "content": content})
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = self.chat_url();
        let body = build_chat_body(&req);

        TraceEvent::LlmRequest {
            provider: self.id.clone(),
            model: req.model.clone(),
            messages: req.messages.len(),
            tools: req.tools.len(),
        }
        .emit();
        tracing::debug!(provider = %self.id, url = %url, "openai_compat stream request");

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream");
        if let Some(key) = &req.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.json(&body).send().await.map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }

        let bytes = resp.bytes_stream().map_err(from_reqwest);
        Ok(sse_event_stream(bytes, StreamDecoder::new(self.id.clone())))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
