use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events decoded from an upstream completion stream (provider-agnostic).
///
/// Provider-specific field names never leak past the decoder: every
/// reasoning variant (`reasoning_content`, `reasoning`, `thought`) arrives
/// here as [`StreamEvent::Reasoning`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A fragment of answer text.
    Content { text: String },

    /// A fragment of reasoning/thinking text.
    Reasoning { text: String },

    /// One fragment of an in-progress tool call.
    ToolCallDelta(ToolCallDelta),

    /// Token usage totals reported by the provider.
    Usage(Usage),

    /// The provider signalled completion. `reason` is `None` when the
    /// stream ended without an explicit finish reason.
    Finish { reason: Option<String> },
}

/// A single tool-call fragment keyed by the provider's slot index.
///
/// `arguments` is a raw substring of the JSON argument text; fragments for
/// the same slot must be concatenated in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolCallDelta {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}
