//! Persisted conversation records and the read models the orchestrator
//! and tool handlers consume from external storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::ToolCall;

/// Identifier assigned by the store to an appended turn.
pub type TurnId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::Tool => "tool",
        }
    }
}

/// One persisted conversation entry.
///
/// `tool_calls` is the JSON-serialized list of [`ToolCall`]s, matching the
/// external schema where the column holds text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            reasoning: None,
            tool_calls: None,
            tool_call_id: None,
            name: None,
            created_at: Utc::now(),
        }
    }

    /// An assistant turn. Empty reasoning is stored as `None`; an empty
    /// call list stores no `tool_calls` column.
    pub fn assistant(
        content: impl Into<String>,
        reasoning: &str,
        calls: &[ToolCall],
    ) -> crate::error::Result<Self> {
        let tool_calls = if calls.is_empty() {
            None
        } else {
            Some(serde_json::to_string(calls)?)
        };
        Ok(Self {
            role: TurnRole::Assistant,
            content: content.into(),
            reasoning: (!reasoning.is_empty()).then(|| reasoning.to_string()),
            tool_calls,
            tool_call_id: None,
            name: None,
            created_at: Utc::now(),
        })
    }

    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: TurnRole::Tool,
            content: content.into(),
            reasoning: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            created_at: Utc::now(),
        }
    }

    /// Decode the persisted tool-call list. A missing or unreadable column
    /// yields an empty list.
    pub fn parsed_tool_calls(&self) -> Vec<ToolCall> {
        self.tool_calls
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

/// Everything the orchestrator loads before opening the upstream stream.
#[derive(Debug, Clone, Default)]
pub struct ChatContext {
    pub system_prompt: String,
    pub prior_turns: Vec<ConversationTurn>,
    pub memory_snippets: Vec<String>,
    /// Workspace scope of the chat, if any.
    pub workspace_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memories
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub category: String,
    pub importance: u8,
    pub created_at: DateTime<Utc>,
}

/// A memory to be stored; values are already normalized by the caller.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub user_id: String,
    pub content: String,
    pub category: String,
    pub importance: u8,
}

/// Filters for reading memories. `category` is an exact match, `query` a
/// case-insensitive substring match; both apply together.
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    pub user_id: String,
    pub category: Option<String>,
    pub query: Option<String>,
    pub limit: usize,
}

impl MemoryQuery {
    pub fn matches(&self, entry: &MemoryEntry) -> bool {
        if entry.user_id != self.user_id {
            return false;
        }
        if let Some(category) = &self.category {
            if &entry.category != category {
                return false;
            }
        }
        if let Some(query) = &self.query {
            if !entry.content.to_lowercase().contains(&query.to_lowercase()) {
                return false;
            }
        }
        true
    }

    /// Filter, order by importance then recency (both descending), and cap.
    pub fn apply<'a>(&self, entries: impl IntoIterator<Item = &'a MemoryEntry>) -> Vec<MemoryEntry> {
        let mut hits: Vec<MemoryEntry> = entries
            .into_iter()
            .filter(|e| self.matches(e))
            .cloned()
            .collect();
        hits.sort_by(|a, b| {
            b.importance
                .cmp(&a.importance)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        hits.truncate(self.limit);
        hits
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A ranked-search request restricted to one workspace and user.
///
/// `match_expression` is the full-text query (`"term"* OR "term"*`);
/// `terms` are the sanitized terms it was built from, for backends that
/// do their own matching.
#[derive(Debug, Clone)]
pub struct WorkspaceSearchRequest {
    pub terms: Vec<String>,
    pub match_expression: String,
    pub workspace_id: String,
    pub user_id: String,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceHit {
    pub chat_title: String,
    pub role: TurnRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn memory(id: &str, category: &str, importance: u8, age_min: i64, content: &str) -> MemoryEntry {
        MemoryEntry {
            id: id.into(),
            user_id: "u1".into(),
            content: content.into(),
            category: category.into(),
            importance,
            created_at: Utc::now() - Duration::minutes(age_min),
        }
    }

    #[test]
    fn query_orders_by_importance_then_recency() {
        let entries = vec![
            memory("a", "general", 3, 10, "likes tea"),
            memory("b", "general", 5, 30, "name is Sam"),
            memory("c", "general", 3, 1, "lives in Oslo"),
        ];
        let q = MemoryQuery { user_id: "u1".into(), category: None, query: None, limit: 10 };
        let ids: Vec<_> = q.apply(&entries).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn query_filters_combine_with_and() {
        let entries = vec![
            memory("a", "work", 3, 10, "Uses Rust at work"),
            memory("b", "hobby", 3, 10, "Writes rust on weekends"),
            memory("c", "work", 3, 10, "Standup at nine"),
        ];
        let q = MemoryQuery {
            user_id: "u1".into(),
            category: Some("work".into()),
            query: Some("RUST".into()),
            limit: 10,
        };
        let ids: Vec<_> = q.apply(&entries).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn assistant_turn_without_calls_has_no_column() {
        let turn = ConversationTurn::assistant("hi", "", &[]).unwrap();
        assert!(turn.tool_calls.is_none());
        assert!(turn.reasoning.is_none());
    }

    #[test]
    fn assistant_turn_round_trips_tool_calls() {
        let call = ToolCall::new("call_1", "calculator", serde_json::json!({"expression": "2+2"}));
        let turn = ConversationTurn::assistant("", "thinking", &[call.clone()]).unwrap();
        assert_eq!(turn.parsed_tool_calls(), vec![call]);
        assert_eq!(turn.reasoning.as_deref(), Some("thinking"));
    }
}
