use std::sync::Arc;

use cs_domain::config::Config;
use cs_tools::RateLimiter;

use crate::runtime::{ChatLockMap, ConversationOrchestrator};
use crate::store::InMemoryStore;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub store: Arc<InMemoryStore>,
    /// Shared by every rate-gated tool; one budget per user.
    pub limiter: Arc<RateLimiter>,
    pub chat_locks: Arc<ChatLockMap>,
}
