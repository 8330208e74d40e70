use std::fmt;

use cs_domain::error::Result;
use cs_domain::stream::{BoxStream, StreamEvent};
use cs_domain::tool::{Message, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic streaming chat completion request.
#[derive(Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    /// The conversation messages to send, system message first.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Bearer credential for this request (the requesting user's key).
    pub api_key: Option<String>,
}

impl fmt::Debug for ChatRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatRequest")
            .field("model", &self.model)
            .field("messages", &self.messages.len())
            .field("tools", &self.tools.len())
            .field("temperature", &self.temperature)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An upstream model endpoint.
///
/// `chat_stream` resolves once response headers arrive: an `Err` here is a
/// failure before any output (nothing was forwarded yet). Failures after
/// that arrive as `Err` items inside the returned stream.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
