//! In-memory persistence backend.
//!
//! Implements every storage seam the orchestrator and tools consume. State
//! lives for the lifetime of the process; restart loses it.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use cs_domain::error::{Error, Result};
use cs_domain::store::{ConversationStore, MemoryStore, WorkspaceIndex};
use cs_domain::turn::{
    ChatContext, ConversationTurn, MemoryEntry, MemoryQuery, NewMemory, TurnId, TurnRole,
    WorkspaceHit, WorkspaceSearchRequest,
};

#[derive(Debug, Clone)]
struct ChatRecord {
    user_id: String,
    title: String,
    workspace_id: Option<String>,
    system_prompt: String,
    turns: Vec<(TurnId, ConversationTurn)>,
    updated_at: DateTime<Utc>,
}

/// Summary of one chat, for inspection.
#[derive(Debug, Clone)]
pub struct ChatSummary {
    pub chat_id: String,
    pub title: String,
    pub workspace_id: Option<String>,
    pub turn_count: usize,
    pub updated_at: DateTime<Utc>,
}

pub struct InMemoryStore {
    default_system_prompt: String,
    memory_snippet_limit: usize,
    chats: RwLock<HashMap<String, ChatRecord>>,
    memories: RwLock<Vec<MemoryEntry>>,
}

impl InMemoryStore {
    pub fn new(default_system_prompt: impl Into<String>, memory_snippet_limit: usize) -> Self {
        Self {
            default_system_prompt: default_system_prompt.into(),
            memory_snippet_limit,
            chats: RwLock::new(HashMap::new()),
            memories: RwLock::new(Vec::new()),
        }
    }

    /// Create (or re-scope) a chat. Chats not created here are created
    /// lazily, without a workspace, on first context load.
    ///
    /// Only the owner may re-scope an existing chat.
    pub fn create_chat(
        &self,
        chat_id: &str,
        user_id: &str,
        title: &str,
        workspace_id: Option<&str>,
    ) -> Result<()> {
        let mut chats = self.chats.write();
        let record = chats
            .entry(chat_id.to_owned())
            .or_insert_with(|| self.new_record(user_id));
        if record.user_id != user_id {
            return Err(Error::Auth(format!("chat {chat_id} belongs to another user")));
        }
        record.title = title.to_owned();
        record.workspace_id = workspace_id.map(String::from);
        Ok(())
    }

    /// Persisted turns for a chat, oldest first.
    pub fn turns(&self, chat_id: &str) -> Vec<ConversationTurn> {
        self.chats
            .read()
            .get(chat_id)
            .map(|c| c.turns.iter().map(|(_, t)| t.clone()).collect())
            .unwrap_or_default()
    }

    pub fn chat(&self, chat_id: &str) -> Option<ChatSummary> {
        self.chats.read().get(chat_id).map(|c| ChatSummary {
            chat_id: chat_id.to_owned(),
            title: c.title.clone(),
            workspace_id: c.workspace_id.clone(),
            turn_count: c.turns.len(),
            updated_at: c.updated_at,
        })
    }

    fn new_record(&self, user_id: &str) -> ChatRecord {
        ChatRecord {
            user_id: user_id.to_owned(),
            title: "New chat".into(),
            workspace_id: None,
            system_prompt: self.default_system_prompt.clone(),
            turns: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    fn snippets_for(&self, user_id: &str) -> Vec<String> {
        let query = MemoryQuery {
            user_id: user_id.to_owned(),
            category: None,
            query: None,
            limit: self.memory_snippet_limit,
        };
        query
            .apply(self.memories.read().iter())
            .into_iter()
            .map(|m| m.content)
            .collect()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn load_context(&self, chat_id: &str, user_id: &str) -> Result<ChatContext> {
        let (system_prompt, prior_turns, workspace_id) = {
            let mut chats = self.chats.write();
            let record = chats
                .entry(chat_id.to_owned())
                .or_insert_with(|| self.new_record(user_id));
            if record.user_id != user_id {
                return Err(Error::Persistence(format!(
                    "chat {chat_id} belongs to another user"
                )));
            }
            (
                record.system_prompt.clone(),
                record.turns.iter().map(|(_, t)| t.clone()).collect(),
                record.workspace_id.clone(),
            )
        };

        Ok(ChatContext {
            system_prompt,
            prior_turns,
            memory_snippets: self.snippets_for(user_id),
            workspace_id,
        })
    }

    async fn append_turn(&self, chat_id: &str, turn: ConversationTurn) -> Result<TurnId> {
        let mut chats = self.chats.write();
        let record = chats
            .get_mut(chat_id)
            .ok_or_else(|| Error::Persistence(format!("unknown chat {chat_id}")))?;
        let id = format!("msg_{}", uuid::Uuid::new_v4().simple());
        record.turns.push((id.clone(), turn));
        Ok(id)
    }

    async fn touch_chat(&self, chat_id: &str) -> Result<()> {
        let mut chats = self.chats.write();
        let record = chats
            .get_mut(chat_id)
            .ok_or_else(|| Error::Persistence(format!("unknown chat {chat_id}")))?;
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn insert(&self, memory: NewMemory) -> Result<MemoryEntry> {
        let entry = MemoryEntry {
            id: format!("mem_{}", uuid::Uuid::new_v4().simple()),
            user_id: memory.user_id,
            content: memory.content,
            category: memory.category,
            importance: memory.importance,
            created_at: Utc::now(),
        };
        self.memories.write().push(entry.clone());
        Ok(entry)
    }

    async fn query(&self, query: MemoryQuery) -> Result<Vec<MemoryEntry>> {
        Ok(query.apply(self.memories.read().iter()))
    }
}

#[async_trait]
impl WorkspaceIndex for InMemoryStore {
    /// Case-insensitive prefix match on words; ranked by matched-term count,
    /// then recency.
    async fn search_workspace(&self, req: WorkspaceSearchRequest) -> Result<Vec<WorkspaceHit>> {
        let terms: Vec<String> = req.terms.iter().map(|t| t.to_lowercase()).collect();
        let chats = self.chats.read();

        let mut scored: Vec<(usize, WorkspaceHit)> = Vec::new();
        for record in chats.values() {
            if record.user_id != req.user_id
                || record.workspace_id.as_deref() != Some(req.workspace_id.as_str())
            {
                continue;
            }
            for (_, turn) in &record.turns {
                if turn.role == TurnRole::Tool {
                    continue;
                }
                let score = match_score(&turn.content, &terms);
                if score == 0 {
                    continue;
                }
                scored.push((
                    score,
                    WorkspaceHit {
                        chat_title: record.title.clone(),
                        role: turn.role,
                        content: turn.content.clone(),
                        created_at: turn.created_at,
                    },
                ));
            }
        }

        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.created_at.cmp(&a.1.created_at))
        });
        Ok(scored
            .into_iter()
            .take(req.limit)
            .map(|(_, hit)| hit)
            .collect())
    }
}

fn match_score(content: &str, terms: &[String]) -> usize {
    let words: Vec<String> = content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    terms
        .iter()
        .filter(|t| words.iter().any(|w| w.starts_with(t.as_str())))
        .count()
}
