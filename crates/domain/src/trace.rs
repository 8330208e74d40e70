use serde::Serialize;

/// Structured trace events emitted across all chatstream crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    LlmRequest {
        provider: String,
        model: String,
        messages: usize,
        tools: usize,
    },
    ToolDispatched {
        tool: String,
        user_id: Option<String>,
        duration_ms: u64,
        is_error: bool,
    },
    RateLimited {
        user_id: String,
        tool: String,
    },
    TurnPersisted {
        chat_id: String,
        role: String,
        turn_id: String,
    },
    TurnFinished {
        chat_id: String,
        phase: String,
        prompt_tokens: u32,
        completion_tokens: u32,
        tool_calls: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cs_event");
    }
}
