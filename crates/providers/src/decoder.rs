//! Chunk classification for OpenAI-compatible completion streams.
//!
//! A [`StreamDecoder`] turns each `data:` payload into zero or more
//! [`StreamEvent`]s. It is stateful (finish handling spans chunks) and
//! single-use: construct a fresh one per upstream call.

use cs_domain::error::{Error, Result};
use cs_domain::stream::{StreamEvent, ToolCallDelta, Usage};
use serde_json::Value;

/// Delta fields that carry reasoning text, by provider.
const REASONING_FIELDS: &[&str] = &["reasoning_content", "reasoning", "thought"];

pub struct StreamDecoder {
    provider: String,
    /// Finish reason seen on a chunk without usage; held until the trailing
    /// usage chunk (or anything else) arrives.
    pending_finish: Option<String>,
    finished: bool,
}

impl StreamDecoder {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            pending_finish: None,
            finished: false,
        }
    }

    /// `true` once a `Finish` event has been produced. Further input is ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode one SSE `data:` payload.
    ///
    /// `[DONE]` ends the stream. Invalid JSON and `{"error": ..}` payloads are
    /// returned as `Err`; the caller is expected to stop reading.
    pub fn decode_data(&mut self, data: &str) -> Result<Vec<StreamEvent>> {
        if self.finished {
            return Ok(Vec::new());
        }
        let data = data.trim();
        if data == "[DONE]" {
            return Ok(self.end());
        }

        let v: Value = serde_json::from_str(data)?;
        if let Some(err) = v.get("error").filter(|e| !e.is_null()) {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .map(String::from)
                .unwrap_or_else(|| err.to_string());
            return Err(Error::Provider {
                provider: self.provider.clone(),
                message,
            });
        }
        Ok(self.decode_chunk(&v))
    }

    /// Classify one parsed chunk.
    ///
    /// Order within a chunk is reasoning, content, tool-call deltas, usage,
    /// then finish.
    pub fn decode_chunk(&mut self, v: &Value) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }

        let usage = v.get("usage").and_then(parse_usage);
        let choice = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first());

        if let Some(reason) = self.pending_finish.take() {
            match (usage, choice) {
                (Some(u), _) => out.push(StreamEvent::Usage(u)),
                // Heartbeat between finish and the usage chunk.
                (None, None) => {
                    self.pending_finish = Some(reason);
                    return out;
                }
                (None, Some(_)) => {}
            }
            out.push(StreamEvent::Finish { reason: Some(reason) });
            self.finished = true;
            return out;
        }

        if let Some(delta) = choice.and_then(|c| c.get("delta")) {
            if let Some(text) = reasoning_text(delta) {
                out.push(StreamEvent::Reasoning { text: text.to_string() });
            }
            if let Some(text) = delta
                .get("content")
                .and_then(|v| v.as_str())
                .filter(|t| !t.is_empty())
            {
                out.push(StreamEvent::Content { text: text.to_string() });
            }
            if let Some(calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
                out.extend(
                    calls
                        .iter()
                        .filter_map(|tc| parse_tool_delta(tc, &self.provider))
                        .map(StreamEvent::ToolCallDelta),
                );
            }
        }

        if let Some(u) = usage {
            out.push(StreamEvent::Usage(u));
        }

        let finish_reason = choice
            .and_then(|c| c.get("finish_reason"))
            .and_then(|f| f.as_str());
        if let Some(reason) = finish_reason {
            if usage.is_some() {
                out.push(StreamEvent::Finish { reason: Some(reason.to_string()) });
                self.finished = true;
            } else {
                self.pending_finish = Some(reason.to_string());
            }
        }

        out
    }

    /// Flush at end of input (`[DONE]` or connection close).
    pub fn end(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        vec![StreamEvent::Finish {
            reason: self.pending_finish.take(),
        }]
    }
}

fn reasoning_text(delta: &Value) -> Option<&str> {
    REASONING_FIELDS
        .iter()
        .filter_map(|field| delta.get(*field).and_then(|v| v.as_str()))
        .find(|t| !t.is_empty())
}

/// `None` for a fragment whose slot index is not a `u32`; folding it into
/// another slot would corrupt that call's arguments.
fn parse_tool_delta(tc: &Value, provider: &str) -> Option<ToolCallDelta> {
    let index = match tc.get("index") {
        None | Some(Value::Null) => 0,
        Some(raw) => match raw.as_u64().and_then(|i| u32::try_from(i).ok()) {
            Some(i) => i,
            None => {
                tracing::warn!(provider, index = %raw, "dropping tool-call delta with invalid slot index");
                return None;
            }
        },
    };
    let function = tc.get("function");
    let non_empty = |v: Option<&Value>| {
        v.and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    Some(ToolCallDelta {
        index,
        id: non_empty(tc.get("id")),
        name: non_empty(function.and_then(|f| f.get("name"))),
        arguments: non_empty(function.and_then(|f| f.get("arguments"))),
    })
}

fn saturating_u32(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

fn parse_usage(v: &Value) -> Option<Usage> {
    let prompt = saturating_u32(v.get("prompt_tokens")?.as_u64()?);
    let completion = saturating_u32(v.get("completion_tokens")?.as_u64()?);
    let total = v
        .get("total_tokens")
        .and_then(|t| t.as_u64())
        .map(saturating_u32)
        .unwrap_or_else(|| prompt.saturating_add(completion));
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
