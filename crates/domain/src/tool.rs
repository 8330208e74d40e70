use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A fully assembled tool invocation (provider-agnostic).
///
/// `arguments` is a parsed JSON object. When the streamed argument text did
/// not parse, `malformed` carries the parse error and `arguments` holds the
/// raw text as a JSON string so the call can still be persisted and replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub malformed: Option<String>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            malformed: None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        self.malformed.is_some()
    }

    /// The argument text as it should be sent back upstream.
    pub fn arguments_text(&self) -> String {
        match (&self.malformed, &self.arguments) {
            (Some(_), Value::String(raw)) => raw.clone(),
            _ => self.arguments.to_string(),
        }
    }
}

/// The outcome of one tool invocation.
///
/// `content` is always plain text: upstream models expect tool responses
/// as strings, never structured payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

/// A message in the upstream conversation (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: MessageContent::Text(text.into()) }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: MessageContent::Text(text.into()) }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::Text(text.into()) }
    }

    /// An assistant message carrying text (if any) plus tool invocations.
    pub fn assistant_with_tools(text: &str, calls: &[ToolCall]) -> Self {
        let mut parts = Vec::new();
        if !text.is_empty() {
            parts.push(ContentPart::Text { text: text.to_string() });
        }
        for call in calls {
            parts.push(ContentPart::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.arguments.clone(),
            });
        }
        Self { role: Role::Assistant, content: MessageContent::Parts(parts) }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
            }]),
        }
    }
}

impl MessageContent {
    /// Extract the plain-text content (first text part, or the full text).
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }

    /// Join every text part with newlines.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_call_replays_raw_arguments() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "calculator".into(),
            arguments: Value::String("{\"expression\": 1+".into()),
            malformed: Some("EOF while parsing".into()),
        };
        assert!(call.is_malformed());
        assert_eq!(call.arguments_text(), "{\"expression\": 1+");
    }

    #[test]
    fn well_formed_call_serializes_arguments() {
        let call = ToolCall::new("call_2", "web_search", serde_json::json!({"query": "rust"}));
        assert_eq!(call.arguments_text(), r#"{"query":"rust"}"#);
    }

    #[test]
    fn assistant_with_tools_skips_empty_text() {
        let call = ToolCall::new("c", "calculator", serde_json::json!({}));
        let msg = Message::assistant_with_tools("", &[call]);
        match msg.content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 1);
                assert!(matches!(parts[0], ContentPart::ToolUse { .. }));
            }
            MessageContent::Text(_) => panic!("expected parts"),
        }
    }
}
