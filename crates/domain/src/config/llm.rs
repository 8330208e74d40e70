use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upstream LLM provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The OpenAI-compatible chat-completion endpoint used for every turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider identifier used in logs and error messages.
    #[serde(default = "d_provider_id")]
    pub provider_id: String,
    /// Base URL; `/chat/completions` is appended.
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default = "d_model")]
    pub default_model: String,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    /// Whole-request timeout for the streaming call (seconds).
    #[serde(default = "d_120")]
    pub request_timeout_secs: u64,
    #[serde(default = "d_llm_auth")]
    pub auth: AuthConfig,
    /// System prompt given to chats that do not carry their own.
    #[serde(default = "d_system_prompt")]
    pub system_prompt: String,
    /// Maximum memory snippets injected into the system message.
    #[serde(default = "d_10")]
    pub memory_snippet_limit: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider_id: d_provider_id(),
            base_url: d_base_url(),
            default_model: d_model(),
            temperature: d_temperature(),
            request_timeout_secs: 120,
            auth: d_llm_auth(),
            system_prompt: d_system_prompt(),
            memory_snippet_limit: 10,
        }
    }
}

/// Where to find an API key.
///
/// Precedence at resolution time: `key` → keychain (`service` + `account`)
/// → `env` → `{SERVICE}_{ACCOUNT}` env fallback.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (for config-only setups; prefer env or keychain).
    #[serde(default)]
    pub key: Option<String>,
    /// Keychain service name (e.g., "chatstream").
    #[serde(default)]
    pub service: Option<String>,
    /// Keychain account name (e.g., "openai-api-key").
    #[serde(default)]
    pub account: Option<String>,
}

impl AuthConfig {
    pub fn from_env(var: &str) -> Self {
        Self {
            env: Some(var.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    ApiKey,
    Keychain,
    None,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_provider_id() -> String {
    "openai".into()
}
fn d_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_model() -> String {
    "gpt-4o-mini".into()
}
fn d_temperature() -> f32 {
    0.7
}
fn d_120() -> u64 {
    120
}
fn d_10() -> usize {
    10
}
fn d_llm_auth() -> AuthConfig {
    AuthConfig::from_env("OPENAI_API_KEY")
}
fn d_system_prompt() -> String {
    "You are a helpful assistant. Use the available tools when they help \
     answer the user's question, and cite sources for web results."
        .into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
