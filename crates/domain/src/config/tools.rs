use serde::{Deserialize, Serialize};

use super::AuthConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub web_search: WebSearchConfig,
    #[serde(default)]
    pub web_fetch: WebFetchConfig,
}

/// External search API (Brave-compatible `web.results[]` responses).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default = "d_search_url")]
    pub base_url: String,
    /// Number of results requested from the provider and rendered.
    #[serde(default = "d_5")]
    pub max_results: usize,
    #[serde(default = "d_search_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "d_search_auth")]
    pub auth: AuthConfig,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            base_url: d_search_url(),
            max_results: 5,
            timeout_secs: d_search_timeout(),
            auth: d_search_auth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebFetchConfig {
    /// Hard deadline for the whole fetch (connect + body).
    #[serde(default = "d_10")]
    pub timeout_secs: u64,
    /// Extracted text is cut to this many characters.
    #[serde(default = "d_8000")]
    pub max_chars: usize,
    /// Download cap on the raw response body.
    #[serde(default = "d_2mib")]
    pub max_bytes: usize,
    #[serde(default = "d_user_agent")]
    pub user_agent: String,
}

impl Default for WebFetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_chars: 8000,
            max_bytes: 2 * 1024 * 1024,
            user_agent: d_user_agent(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_search_url() -> String {
    "https://api.search.brave.com/res/v1/web/search".into()
}
fn d_5() -> usize {
    5
}
fn d_search_timeout() -> u64 {
    15
}
fn d_search_auth() -> AuthConfig {
    AuthConfig::from_env("CS_SEARCH_API_KEY")
}
fn d_10() -> u64 {
    10
}
fn d_8000() -> usize {
    8000
}
fn d_2mib() -> usize {
    2 * 1024 * 1024
}
fn d_user_agent() -> String {
    "chatstream/0.1 (+web_fetch)".into()
}
