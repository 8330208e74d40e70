//! Interfaces to the external collaborators the orchestrator depends on:
//! conversation persistence, memories, workspace search and credentials.
//!
//! Implementations may be a real database, a remote service, or the
//! in-memory test double shipped with the gateway.

use async_trait::async_trait;

use crate::error::Result;
use crate::turn::{
    ChatContext, ConversationTurn, MemoryEntry, MemoryQuery, NewMemory, TurnId, WorkspaceHit,
    WorkspaceSearchRequest,
};

/// Read access to prior turns plus an append-only write sink.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// System prompt, prior turns (oldest first) and memory snippets.
    async fn load_context(&self, chat_id: &str, user_id: &str) -> Result<ChatContext>;

    /// Append one turn and return its identifier.
    async fn append_turn(&self, chat_id: &str, turn: ConversationTurn) -> Result<TurnId>;

    /// Refresh the chat's "last updated" timestamp.
    async fn touch_chat(&self, chat_id: &str) -> Result<()>;
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn insert(&self, memory: NewMemory) -> Result<MemoryEntry>;

    async fn query(&self, query: MemoryQuery) -> Result<Vec<MemoryEntry>>;
}

#[async_trait]
pub trait WorkspaceIndex: Send + Sync {
    async fn search_workspace(&self, req: WorkspaceSearchRequest) -> Result<Vec<WorkspaceHit>>;
}

/// Credential lookup. `None` means "not configured".
pub trait CredentialSource: Send + Sync {
    /// The upstream LLM credential to use for this user's turns.
    fn api_credential(&self, user_id: &str) -> Option<String>;

    /// The external search-API credential.
    fn search_credential(&self) -> Option<String>;
}

/// Credentials fixed at startup (resolved from configuration).
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    pub api_key: Option<String>,
    pub search_key: Option<String>,
}

impl CredentialSource for StaticCredentials {
    fn api_credential(&self, _user_id: &str) -> Option<String> {
        self.api_key.clone().filter(|k| !k.is_empty())
    }

    fn search_credential(&self) -> Option<String> {
        self.search_key.clone().filter(|k| !k.is_empty())
    }
}
