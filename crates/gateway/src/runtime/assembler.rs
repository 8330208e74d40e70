//! Reassembles streamed tool-call fragments into complete calls.
//!
//! Providers send arguments as arbitrary substrings keyed by a slot index,
//! and several calls may interleave. Fragments for a slot are appended in
//! arrival order; nothing is parsed until [`ToolCallAssembler::finalize`].

use std::collections::BTreeMap;

use serde_json::Value;

use cs_domain::stream::ToolCallDelta;
use cs_domain::tool::ToolCall;

#[derive(Debug, Default)]
struct PendingToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    slots: BTreeMap<u32, PendingToolCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn ingest(&mut self, delta: &ToolCallDelta) {
        let slot = self.slots.entry(delta.index).or_default();
        if slot.id.is_none() {
            slot.id = delta.id.clone().filter(|id| !id.is_empty());
        }
        if let Some(name) = delta.name.as_deref().filter(|n| !n.is_empty()) {
            slot.name = name.to_string();
        }
        if let Some(fragment) = &delta.arguments {
            slot.arguments.push_str(fragment);
        }
    }

    /// Complete calls ordered by slot index. Unparseable arguments yield a
    /// call flagged as malformed that keeps the raw text.
    pub fn finalize(self) -> Vec<ToolCall> {
        self.slots
            .into_iter()
            .map(|(index, pending)| {
                let id = pending
                    .id
                    .unwrap_or_else(|| format!("call_{}_{}", index, uuid::Uuid::new_v4().simple()));
                let (arguments, malformed) = parse_arguments(&pending.arguments);
                if let Some(reason) = &malformed {
                    tracing::warn!(
                        tool = %pending.name,
                        call_id = %id,
                        error = %reason,
                        "tool call arguments did not parse"
                    );
                }
                ToolCall {
                    id,
                    name: pending.name,
                    arguments,
                    malformed,
                }
            })
            .collect()
    }
}

fn parse_arguments(raw: &str) -> (Value, Option<String>) {
    if raw.trim().is_empty() {
        return (Value::Object(Default::default()), None);
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => (v, None),
        Ok(_) => (
            Value::String(raw.to_string()),
            Some("arguments must be a JSON object".into()),
        ),
        Err(e) => (Value::String(raw.to_string()), Some(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delta(index: u32, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> ToolCallDelta {
        ToolCallDelta {
            index,
            id: id.map(String::from),
            name: name.map(String::from),
            arguments: args.map(String::from),
        }
    }

    #[test]
    fn interleaved_slots_keep_fragment_order() {
        let mut asm = ToolCallAssembler::new();
        asm.ingest(&delta(1, Some("b"), Some("web_search"), Some("{\"que")));
        asm.ingest(&delta(0, Some("a"), Some("calculator"), Some("{\"expression\":")));
        asm.ingest(&delta(1, None, None, Some("ry\":\"rust\"}")));
        asm.ingest(&delta(0, None, None, Some("\"2*3\"}")));

        let calls = asm.finalize();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[0].arguments, json!({"expression": "2*3"}));
        assert_eq!(calls[1].id, "b");
        assert_eq!(calls[1].arguments, json!({"query": "rust"}));
    }

    #[test]
    fn malformed_slot_does_not_abort_siblings() {
        let mut asm = ToolCallAssembler::new();
        asm.ingest(&delta(0, Some("c0"), Some("calc"), None));
        asm.ingest(&delta(1, Some("c1"), None, Some("{\"a\":1}")));
        asm.ingest(&delta(0, None, None, Some("1+")));

        let calls = asm.finalize();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "calc");
        assert!(calls[0].is_malformed());
        assert_eq!(calls[0].arguments, Value::String("1+".into()));
        assert!(!calls[1].is_malformed());
        assert_eq!(calls[1].arguments, json!({"a": 1}));
    }

    #[test]
    fn later_name_overwrites_and_empty_args_mean_empty_object() {
        let mut asm = ToolCallAssembler::new();
        asm.ingest(&delta(3, None, Some("read"), None));
        asm.ingest(&delta(3, Some("late-id"), Some("read_memories"), None));
        asm.ingest(&delta(3, None, Some(""), None));

        let calls = asm.finalize();
        assert_eq!(calls[0].id, "late-id");
        assert_eq!(calls[0].name, "read_memories");
        assert_eq!(calls[0].arguments, json!({}));
    }

    #[test]
    fn missing_id_is_generated() {
        let mut asm = ToolCallAssembler::new();
        asm.ingest(&delta(2, None, Some("calculator"), Some("{}")));
        let calls = asm.finalize();
        assert!(calls[0].id.starts_with("call_2_"));
    }

    #[test]
    fn non_object_json_is_malformed() {
        let mut asm = ToolCallAssembler::new();
        asm.ingest(&delta(0, Some("x"), Some("calculator"), Some("[1,2]")));
        let calls = asm.finalize();
        assert_eq!(calls[0].malformed.as_deref(), Some("arguments must be a JSON object"));
    }
}
