//! `web_search`: query an external search API (Brave-compatible).

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use cs_domain::config::WebSearchConfig;
use cs_domain::error::{Error, Result};
use cs_domain::store::CredentialSource;

use crate::args::{int_arg, str_arg};
use crate::dispatch::ToolContext;
use crate::rate_limit::RateLimiter;

pub const NOT_CONFIGURED: &str =
    "Web search is not configured: no search API key has been set for this server.";

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

pub struct WebSearch {
    client: reqwest::Client,
    cfg: WebSearchConfig,
    limiter: Arc<RateLimiter>,
    credentials: Arc<dyn CredentialSource>,
}

impl WebSearch {
    pub fn new(
        cfg: WebSearchConfig,
        limiter: Arc<RateLimiter>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            client,
            cfg,
            limiter,
            credentials,
        })
    }

    pub async fn run(&self, args: &Value, ctx: &ToolContext) -> Result<String> {
        let query = str_arg(args, "query")
            .ok_or_else(|| Error::Other("missing required argument 'query'".into()))?;

        let Some(key) = self.credentials.search_credential() else {
            return Ok(NOT_CONFIGURED.into());
        };
        if !self.limiter.check(ctx.rate_key(), "web_search") {
            return Ok(self.limiter.denial_message());
        }

        let max = self.cfg.max_results.max(1);
        let count = int_arg(args, "count")
            .map(|n| n.clamp(1, max as i64) as usize)
            .unwrap_or(max);

        tracing::debug!(query = %query, count, "web_search request");

        let count_param = count.to_string();
        let resp = self
            .client
            .get(&self.cfg.base_url)
            .query(&[("q", query), ("count", count_param.as_str())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", key)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Http(format!(
                "search API returned HTTP {}",
                status.as_u16()
            )));
        }
        let body: Value = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;

        Ok(format_results(query, &parse_results(&body, count)))
    }
}

/// Extract hits from a `web.results[]` response.
pub fn parse_results(body: &Value, limit: usize) -> Vec<SearchHit> {
    body.get("web")
        .and_then(|w| w.get("results"))
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|r| {
                    let url = r.get("url")?.as_str()?.to_string();
                    let title = r
                        .get("title")
                        .and_then(|t| t.as_str())
                        .map(strip_markup)
                        .unwrap_or_else(|| url.clone());
                    let snippet = r
                        .get("description")
                        .and_then(|d| d.as_str())
                        .map(strip_markup)
                        .unwrap_or_default();
                    Some(SearchHit { title, url, snippet })
                })
                .take(limit)
                .collect()
        })
        .unwrap_or_default()
}

pub fn format_results(query: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("No results found for \"{query}\".");
    }
    let mut out = format!("Search results for \"{query}\":\n");
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!("\n{}. {}\n   URL: {}\n", i + 1, hit.title, hit.url));
        if !hit.snippet.is_empty() {
            out.push_str(&format!("   {}\n", hit.snippet));
        }
    }
    out.trim_end().to_string()
}

/// Search APIs highlight matches with inline tags (`<strong>`).
fn strip_markup(text: &str) -> String {
    static TAGS: OnceLock<Option<Regex>> = OnceLock::new();
    let stripped = match TAGS.get_or_init(|| Regex::new(r"<[^>]+>").ok()) {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    };
    stripped
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_domain::store::StaticCredentials;
    use serde_json::json;

    fn tool(search_key: Option<&str>, max_requests: u32) -> WebSearch {
        WebSearch::new(
            WebSearchConfig::default(),
            Arc::new(RateLimiter::new(Duration::from_secs(60), max_requests)),
            Arc::new(StaticCredentials {
                api_key: None,
                search_key: search_key.map(String::from),
            }),
        )
        .unwrap()
    }

    #[test]
    fn parses_and_formats_results() {
        let body = json!({"web": {"results": [
            {"title": "The <strong>Rust</strong> Book", "url": "https://doc.rust-lang.org/book/", "description": "Learn &amp; build"},
            {"url": "https://example.com"},
            {"title": "no url"}
        ]}});
        let hits = parse_results(&body, 5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "The Rust Book");
        assert_eq!(hits[0].snippet, "Learn & build");
        assert_eq!(hits[1].title, "https://example.com");

        let text = format_results("rust", &hits);
        assert!(text.starts_with("Search results for \"rust\":"));
        assert!(text.contains("1. The Rust Book\n   URL: https://doc.rust-lang.org/book/"));
        assert!(text.contains("2. https://example.com"));
    }

    #[test]
    fn result_count_is_bounded() {
        let results: Vec<Value> = (0..10)
            .map(|i| json!({"title": format!("r{i}"), "url": format!("https://e.com/{i}")}))
            .collect();
        let body = json!({"web": {"results": results}});
        assert_eq!(parse_results(&body, 3).len(), 3);
    }

    #[test]
    fn zero_results_is_explicit() {
        assert_eq!(
            format_results("zzqx", &parse_results(&json!({}), 5)),
            "No results found for \"zzqx\"."
        );
    }

    #[tokio::test]
    async fn missing_credential_is_reported_not_raised() {
        let ctx = ToolContext::for_user("u1");
        let out = tool(None, 10).run(&json!({"query": "rust"}), &ctx).await.unwrap();
        assert_eq!(out, NOT_CONFIGURED);
    }

    #[tokio::test]
    async fn rate_limit_denial_is_text() {
        let ctx = ToolContext::for_user("u1");
        let out = tool(Some("key"), 0).run(&json!({"query": "rust"}), &ctx).await.unwrap();
        assert!(out.starts_with("Rate limit exceeded"));
    }

    #[tokio::test]
    async fn missing_query_is_an_error() {
        let ctx = ToolContext::for_user("u1");
        assert!(tool(Some("key"), 10).run(&json!({}), &ctx).await.is_err());
    }
}
