//! `add_memory` / `read_memories`: long-lived facts about the user.

use std::sync::Arc;

use serde_json::Value;

use cs_domain::error::Result;
use cs_domain::store::MemoryStore;
use cs_domain::turn::{MemoryEntry, MemoryQuery, NewMemory};

use crate::args::{int_arg, str_arg};
use crate::dispatch::ToolContext;

pub const DEFAULT_CATEGORY: &str = "general";
pub const DEFAULT_IMPORTANCE: i64 = 3;
pub const DEFAULT_READ_LIMIT: i64 = 10;

pub const NO_USER: &str = "Memories are unavailable: no user is associated with this conversation.";
pub const NO_MEMORIES: &str = "No memories found. You haven't saved any memories yet.";

/// Clamp a requested importance into `1..=5`.
pub fn normalize_importance(requested: Option<i64>) -> u8 {
    requested.unwrap_or(DEFAULT_IMPORTANCE).clamp(1, 5) as u8
}

/// Lowercase, trimmed; empty means the default category.
pub fn normalize_category(requested: Option<&str>) -> String {
    requested
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string())
}

pub struct MemoryTools {
    store: Arc<dyn MemoryStore>,
}

impl MemoryTools {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }

    pub async fn add(&self, args: &Value, ctx: &ToolContext) -> Result<String> {
        let Some(user_id) = ctx.user() else {
            return Ok(NO_USER.into());
        };
        let Some(content) = str_arg(args, "content") else {
            return Ok("Nothing to remember: 'content' must not be empty.".into());
        };

        let entry = self
            .store
            .insert(NewMemory {
                user_id: user_id.to_string(),
                content: content.to_string(),
                category: normalize_category(str_arg(args, "category")),
                importance: normalize_importance(int_arg(args, "importance")),
            })
            .await?;

        tracing::debug!(memory_id = %entry.id, category = %entry.category, "memory saved");
        Ok(format!(
            "Memory saved (id: {}, category: {}, importance: {}/5).",
            entry.id, entry.category, entry.importance
        ))
    }

    pub async fn read(&self, args: &Value, ctx: &ToolContext) -> Result<String> {
        let Some(user_id) = ctx.user() else {
            return Ok(NO_USER.into());
        };
        let category = str_arg(args, "category").map(|c| c.to_lowercase());
        let query = str_arg(args, "query").map(String::from);
        let limit = int_arg(args, "limit").unwrap_or(DEFAULT_READ_LIMIT).clamp(1, 50) as usize;

        let mut entries = self
            .store
            .query(MemoryQuery {
                user_id: user_id.to_string(),
                category: category.clone(),
                query: query.clone(),
                limit,
            })
            .await?;
        entries.sort_by(|a, b| {
            b.importance
                .cmp(&a.importance)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        entries.truncate(limit);

        if entries.is_empty() {
            return Ok(empty_message(category.as_deref(), query.as_deref()));
        }
        Ok(format_memories(&entries))
    }
}

fn empty_message(category: Option<&str>, query: Option<&str>) -> String {
    match (category, query) {
        (None, None) => NO_MEMORIES.to_string(),
        (Some(c), None) => format!("No memories found in category '{c}'."),
        (None, Some(q)) => format!("No memories found matching '{q}'."),
        (Some(c), Some(q)) => format!("No memories found in category '{c}' matching '{q}'."),
    }
}

fn stars(importance: u8) -> String {
    let filled = importance.min(5) as usize;
    format!("{}{}", "★".repeat(filled), "☆".repeat(5 - filled))
}

fn format_memories(entries: &[MemoryEntry]) -> String {
    let noun = if entries.len() == 1 { "memory" } else { "memories" };
    let mut out = format!("Found {} {noun}:\n", entries.len());
    for (i, m) in entries.iter().enumerate() {
        out.push_str(&format!(
            "\n{}. [{}] {}\n   Importance: {} | Saved: {}",
            i + 1,
            m.category,
            m.content,
            stars(m.importance),
            m.created_at.format("%Y-%m-%d"),
        ));
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
