//! AppState construction extracted from `main.rs`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use cs_domain::config::{Config, ConfigSeverity};
use cs_domain::store::{CredentialSource, StaticCredentials};
use cs_providers::util::resolve_credential;
use cs_providers::{LlmProvider, OpenAiCompatProvider};
use cs_tools::{RateLimiter, ToolDeps, ToolDispatcher};

use crate::runtime::{ChatLockMap, ConversationOrchestrator, OrchestratorSettings};
use crate::state::AppState;
use crate::store::InMemoryStore;

const LOCK_PRUNE_INTERVAL: Duration = Duration::from_secs(300);

/// Validate config, resolve credentials, and wire every collaborator into
/// an [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }

    // ── Credentials ──────────────────────────────────────────────────
    let credentials = StaticCredentials {
        api_key: resolve_credential(&config.llm.auth),
        search_key: resolve_credential(&config.tools.web_search.auth),
    };
    if credentials.api_key.is_none() {
        tracing::warn!("no LLM credential resolved; turns will be rejected until one is configured");
    }
    if credentials.search_key.is_none() {
        tracing::info!("no search credential resolved; web_search will report it is not configured");
    }
    let credentials: Arc<dyn CredentialSource> = Arc::new(credentials);

    // ── Storage ──────────────────────────────────────────────────────
    let store = Arc::new(InMemoryStore::new(
        config.llm.system_prompt.clone(),
        config.llm.memory_snippet_limit,
    ));

    // ── Tools ────────────────────────────────────────────────────────
    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
    tracing::info!(
        window_secs = config.rate_limit.window_secs,
        max_requests = config.rate_limit.max_requests,
        "tool rate limiter ready"
    );
    let tools = Arc::new(
        ToolDispatcher::new(ToolDeps {
            config: config.tools.clone(),
            limiter: limiter.clone(),
            credentials: credentials.clone(),
            memories: store.clone(),
            workspace: store.clone(),
        })
        .context("initializing tool dispatcher")?,
    );

    // ── LLM provider ─────────────────────────────────────────────────
    let provider: Arc<dyn LlmProvider> = Arc::new(
        OpenAiCompatProvider::from_config(&config.llm).context("initializing LLM provider")?,
    );
    tracing::info!(
        provider = %config.llm.provider_id,
        base_url = %config.llm.base_url,
        model = %config.llm.default_model,
        "LLM provider ready"
    );

    let orchestrator = Arc::new(ConversationOrchestrator::new(
        provider,
        store.clone(),
        credentials,
        tools,
        OrchestratorSettings::from_config(&config.llm),
    ));

    Ok(AppState {
        config,
        orchestrator,
        store,
        limiter,
        chat_locks: Arc::new(ChatLockMap::new()),
    })
}

/// Periodic housekeeping for process-lifetime maps.
pub fn spawn_background_tasks(state: &AppState) {
    let locks = state.chat_locks.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LOCK_PRUNE_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            locks.prune_idle();
            tracing::debug!(chats = locks.chat_count(), "pruned idle chat locks");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_boots() {
        let state = build_app_state(Arc::new(Config::default())).unwrap();
        assert_eq!(state.orchestrator.model(), "gpt-4o-mini");
        assert_eq!(state.limiter.max_requests(), 10);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = Config::default();
        config.server.port = 0;
        let err = build_app_state(Arc::new(config)).err().unwrap();
        assert!(err.to_string().contains("1 error(s)"));
    }
}
