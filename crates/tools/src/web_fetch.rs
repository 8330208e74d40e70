//! `web_fetch`: read a web page as plain text.
//!
//! Limits:
//! - Hard deadline on the whole fetch (`timeout_secs`); the request is
//!   dropped on expiry
//! - Download cap (`max_bytes`)
//! - Text-like content types only
//! - Output cut to `max_chars` with a truncation marker

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::StreamExt;
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use serde_json::Value;

use cs_domain::config::WebFetchConfig;
use cs_domain::error::{Error, Result};

use crate::args::{str_arg, truncate_chars};
use crate::dispatch::ToolContext;
use crate::rate_limit::RateLimiter;

pub struct WebFetch {
    client: reqwest::Client,
    cfg: WebFetchConfig,
    limiter: Arc<RateLimiter>,
}

impl WebFetch {
    pub fn new(cfg: WebFetchConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { client, cfg, limiter })
    }

    pub async fn run(&self, args: &Value, ctx: &ToolContext) -> Result<String> {
        let raw = str_arg(args, "url").unwrap_or_default();
        let Some(url) = sanitize_url(raw) else {
            return Ok(invalid_url_message(raw));
        };
        if !self.limiter.check(ctx.rate_key(), "web_fetch") {
            return Ok(self.limiter.denial_message());
        }

        let deadline = Duration::from_secs(self.cfg.timeout_secs);
        match tokio::time::timeout(deadline, self.fetch(&url)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(url = %url, timeout_secs = self.cfg.timeout_secs, "web_fetch timed out");
                Ok(format!(
                    "Timed out fetching {url}: no complete response within {} seconds.",
                    self.cfg.timeout_secs
                ))
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        tracing::debug!(url = %url, "web_fetch request");

        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, &self.cfg.user_agent)
            .header(ACCEPT, "text/html,application/xhtml+xml,text/plain;q=0.9,*/*;q=0.5")
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Ok(format!("Failed to fetch {url}: HTTP {}", status.as_u16()));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !is_text_like(&content_type) {
            return Ok(format!(
                "Cannot read {url}: unsupported content type '{content_type}'. \
                 Only text and HTML pages can be fetched."
            ));
        }

        // Stream body with a hard byte cap; anything beyond it is dropped.
        let mut stream = resp.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Http(e.to_string()))?;
            let room = self.cfg.max_bytes.saturating_sub(buf.len());
            if chunk.len() >= room {
                buf.extend_from_slice(&chunk[..room]);
                break;
            }
            buf.extend_from_slice(&chunk);
        }

        let body = String::from_utf8_lossy(&buf);
        let text = if content_type.contains("html") || (content_type.is_empty() && looks_like_html(&body)) {
            html_to_text(&body)
        } else {
            collapse_whitespace(&body)
        };
        if text.is_empty() {
            return Ok(format!("The page at {url} contained no readable text."));
        }

        let marker = format!("\n\n[Content truncated at {} characters]", self.cfg.max_chars);
        Ok(format!(
            "Content from {url}:\n\n{}",
            truncate_chars(&text, self.cfg.max_chars, &marker)
        ))
    }
}

fn url_pattern() -> Option<&'static Regex> {
    static URL: OnceLock<Option<Regex>> = OnceLock::new();
    URL.get_or_init(|| Regex::new(r#"https?://[^\s"'<>]+"#).ok()).as_ref()
}

/// Pull the first `http(s)://` token out of model-supplied text.
///
/// Tolerates junk around the URL (`":https://x"`, `"see https://x."`);
/// returns `None` when no well-formed http(s) URL is present.
pub fn sanitize_url(raw: &str) -> Option<String> {
    let found = url_pattern()?.find(raw)?.as_str();
    let candidate = found.trim_end_matches(['.', ',', ';', ')', ']']);
    let parsed = reqwest::Url::parse(candidate).ok()?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Some(candidate.to_string()),
        _ => None,
    }
}

fn invalid_url_message(raw: &str) -> String {
    format!("Invalid URL '{raw}': provide a full address starting with http:// or https://.")
}

fn is_text_like(content_type: &str) -> bool {
    content_type.is_empty()
        || content_type.starts_with("text/")
        || content_type.contains("html")
        || content_type.contains("xml")
        || content_type.contains("json")
}

fn looks_like_html(body: &str) -> bool {
    let head: String = body.chars().take(512).collect::<String>().to_ascii_lowercase();
    head.contains("<html") || head.contains("<!doctype html")
}

fn collapse_whitespace(text: &str) -> String {
    let mut result = String::new();
    let mut prev_blank = false;
    for line in text.lines() {
        let trimmed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if trimmed.is_empty() {
            if !prev_blank && !result.is_empty() {
                result.push('\n');
                prev_blank = true;
            }
        } else {
            result.push_str(&trimmed);
            result.push('\n');
            prev_blank = false;
        }
    }
    result.trim().to_string()
}

/// Strip tags, scripts and styles; decode common entities; collapse
/// whitespace while keeping block boundaries as newlines.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    let mut in_script = false;
    let mut in_style = false;
    let mut tag_buf = String::new();

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag_buf.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let tag = tag_buf.to_ascii_lowercase();
                let name = tag
                    .split(|c: char| c.is_whitespace() || c == '/')
                    .find(|s| !s.is_empty())
                    .unwrap_or("");
                let closing = tag.starts_with('/');

                match (name, closing) {
                    ("script", false) => in_script = true,
                    ("script", true) => in_script = false,
                    ("style", false) => in_style = true,
                    ("style", true) => in_style = false,
                    _ => {}
                }

                let is_block = matches!(
                    name,
                    "p" | "div" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "li" | "tr"
                        | "article" | "section" | "header" | "footer" | "blockquote"
                        | "title" | "pre"
                );
                if (closing && is_block) || name == "br" {
                    out.push('\n');
                }
                tag_buf.clear();
            }
            _ if in_tag => tag_buf.push(ch),
            _ if in_script || in_style => {}
            _ => out.push(ch),
        }
    }

    let out = out
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    collapse_whitespace(&out)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn tool(cfg: WebFetchConfig) -> WebFetch {
        WebFetch::new(cfg, Arc::new(RateLimiter::new(Duration::from_secs(60), 10))).unwrap()
    }

    /// Serve one canned HTTP response on a local port.
    async fn serve_once(content_type: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut req = vec![0u8; 4096];
            let _ = sock.read(&mut req).await;
            let resp = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = sock.write_all(resp.as_bytes()).await;
        });
        format!("http://{addr}/page")
    }

    #[test]
    fn sanitize_strips_leading_junk() {
        assert_eq!(
            sanitize_url(":https://example.com").as_deref(),
            Some("https://example.com")
        );
        assert_eq!(
            sanitize_url("see https://example.com/a?b=1.").as_deref(),
            Some("https://example.com/a?b=1")
        );
        assert_eq!(sanitize_url("not a url"), None);
        assert_eq!(sanitize_url("ftp://example.com"), None);
        assert_eq!(sanitize_url("https://"), None);
    }

    #[test]
    fn html_to_text_strips_tags_and_scripts() {
        let html = "<html><head><style>p{color:red}</style></head><body><h1>Hello</h1>\
                    <p>World &amp; friends</p><script type=\"text/javascript\">var x=1;</script></body></html>";
        let text = html_to_text(html);
        assert_eq!(text, "Hello\nWorld & friends");
    }

    #[tokio::test]
    async fn invalid_url_makes_no_request() {
        // A zero-budget limiter proves the rate check was never reached.
        let fetch = WebFetch::new(
            WebFetchConfig::default(),
            Arc::new(RateLimiter::new(Duration::from_secs(60), 0)),
        )
        .unwrap();
        let out = fetch
            .run(&json!({"url": "not a url"}), &ToolContext::for_user("u1"))
            .await
            .unwrap();
        assert!(out.starts_with("Invalid URL 'not a url'"));
    }

    #[tokio::test]
    async fn fetches_html_and_truncates() {
        let url = serve_once(
            "text/html; charset=utf-8",
            "<html><body><p>abcdefghijklmnopqrstuvwxyz</p></body></html>",
        )
        .await;
        let cfg = WebFetchConfig {
            max_chars: 10,
            ..Default::default()
        };
        let out = tool(cfg)
            .run(&json!({"url": format!(":{url}")}), &ToolContext::for_user("u1"))
            .await
            .unwrap();
        assert!(out.starts_with(&format!("Content from {url}:")), "{out}");
        assert!(out.contains("abcdefghij\n\n[Content truncated at 10 characters]"));
        assert!(!out.contains("klm"));
    }

    #[tokio::test]
    async fn binary_content_is_rejected() {
        let url = serve_once("image/png", "PNG").await;
        let out = tool(WebFetchConfig::default())
            .run(&json!({"url": url}), &ToolContext::for_user("u1"))
            .await
            .unwrap();
        assert!(out.contains("unsupported content type 'image/png'"), "{out}");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_server_times_out_with_message() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hold the connection without answering.
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let started = tokio::time::Instant::now();
        let out = tool(WebFetchConfig::default())
            .run(&json!({"url": format!("http://{addr}/")}), &ToolContext::for_user("u1"))
            .await
            .unwrap();
        assert!(out.starts_with("Timed out fetching"), "{out}");
        assert!(out.ends_with("within 10 seconds."), "{out}");
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(3600));
    }
}
