//! `workspace_search`: ranked full-text search over every chat in the
//! current workspace.

use std::sync::Arc;

use serde_json::Value;

use cs_domain::error::Result;
use cs_domain::store::WorkspaceIndex;
use cs_domain::turn::{WorkspaceHit, WorkspaceSearchRequest};

use crate::args::{int_arg, str_arg, truncate_chars};
use crate::dispatch::ToolContext;

const EXCERPT_CHARS: usize = 200;
const MAX_TERMS: usize = 16;

pub const NO_WORKSPACE: &str =
    "Workspace search is only available in chats that belong to a workspace.";
pub const NO_USER: &str =
    "Workspace search is unavailable: no user is associated with this conversation.";

/// Split into terms, keep alphanumerics only, drop empties and repeats.
pub fn sanitize_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for raw in query.split_whitespace() {
        let term: String = raw.chars().filter(|c| c.is_alphanumeric()).collect();
        if !term.is_empty() && !terms.contains(&term) {
            terms.push(term);
        }
        if terms.len() == MAX_TERMS {
            break;
        }
    }
    terms
}

/// `"alpha"* OR "beta"*`: quoted prefix terms joined for broad recall.
pub fn match_expression(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| format!("\"{t}\"*"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

pub struct WorkspaceSearch {
    index: Arc<dyn WorkspaceIndex>,
}

impl WorkspaceSearch {
    pub fn new(index: Arc<dyn WorkspaceIndex>) -> Self {
        Self { index }
    }

    pub async fn run(&self, args: &Value, ctx: &ToolContext) -> Result<String> {
        let Some(user_id) = ctx.user() else {
            return Ok(NO_USER.into());
        };
        let Some(workspace_id) = ctx.workspace_id.as_deref().filter(|w| !w.is_empty()) else {
            return Ok(NO_WORKSPACE.into());
        };
        let Some(query) = str_arg(args, "query") else {
            return Ok("Please provide a search query.".into());
        };

        let terms = sanitize_terms(query);
        if terms.is_empty() {
            return Ok(format!("The query \"{query}\" contains no searchable words."));
        }
        let limit = int_arg(args, "limit").unwrap_or(10).clamp(1, 20) as usize;

        let hits = self
            .index
            .search_workspace(WorkspaceSearchRequest {
                match_expression: match_expression(&terms),
                terms,
                workspace_id: workspace_id.to_string(),
                user_id: user_id.to_string(),
                limit,
            })
            .await?;

        if hits.is_empty() {
            return Ok(format!("No results found in this workspace for \"{query}\"."));
        }
        Ok(format_hits(query, &hits[..hits.len().min(limit)]))
    }
}

fn format_hits(query: &str, hits: &[WorkspaceHit]) -> String {
    let mut out = format!(
        "Found {} result{} in this workspace for \"{query}\":\n",
        hits.len(),
        if hits.len() == 1 { "" } else { "s" }
    );
    for (i, hit) in hits.iter().enumerate() {
        let flat = hit.content.split_whitespace().collect::<Vec<_>>().join(" ");
        out.push_str(&format!(
            "\n{}. {} ({}, {})\n   {}",
            i + 1,
            hit.chat_title,
            hit.created_at.format("%Y-%m-%d"),
            hit.role.as_str(),
            truncate_chars(&flat, EXCERPT_CHARS, "..."),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cs_domain::turn::TurnRole;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingIndex {
        last: Mutex<Option<WorkspaceSearchRequest>>,
        hits: Vec<WorkspaceHit>,
    }

    #[async_trait::async_trait]
    impl WorkspaceIndex for RecordingIndex {
        async fn search_workspace(&self, req: WorkspaceSearchRequest) -> Result<Vec<WorkspaceHit>> {
            *self.last.lock() = Some(req);
            Ok(self.hits.clone())
        }
    }

    fn ctx(workspace: Option<&str>) -> ToolContext {
        ToolContext {
            user_id: Some("u1".into()),
            workspace_id: workspace.map(String::from),
        }
    }

    #[test]
    fn terms_are_sanitized_and_joined() {
        let terms = sanitize_terms("rust's \"borrow\"  checker* rust -- OR");
        assert_eq!(terms, vec!["rusts", "borrow", "checker", "rust", "OR"]);
        assert_eq!(
            match_expression(&terms[..2]),
            "\"rusts\"* OR \"borrow\"*"
        );
    }

    #[tokio::test]
    async fn requires_workspace_scope() {
        let index = Arc::new(RecordingIndex::default());
        let tool = WorkspaceSearch::new(index.clone());
        let out = tool.run(&json!({"query": "x"}), &ctx(None)).await.unwrap();
        assert_eq!(out, NO_WORKSPACE);
        assert!(index.last.lock().is_none());
    }

    #[tokio::test]
    async fn limit_is_clamped_and_request_scoped() {
        let index = Arc::new(RecordingIndex::default());
        let tool = WorkspaceSearch::new(index.clone());
        let out = tool
            .run(&json!({"query": "deploy plan", "limit": 500}), &ctx(Some("ws1")))
            .await
            .unwrap();
        assert_eq!(out, "No results found in this workspace for \"deploy plan\".");
        let req = index.last.lock().clone().unwrap();
        assert_eq!(req.limit, 20);
        assert_eq!(req.workspace_id, "ws1");
        assert_eq!(req.user_id, "u1");
        assert_eq!(req.match_expression, "\"deploy\"* OR \"plan\"*");
    }

    #[tokio::test]
    async fn hits_are_formatted_with_excerpt() {
        let index = Arc::new(RecordingIndex {
            last: Mutex::new(None),
            hits: vec![WorkspaceHit {
                chat_title: "Launch notes".into(),
                role: TurnRole::Assistant,
                content: "x".repeat(300),
                created_at: Utc::now(),
            }],
        });
        let tool = WorkspaceSearch::new(index);
        let out = tool
            .run(&json!({"query": "launch"}), &ctx(Some("ws1")))
            .await
            .unwrap();
        assert!(out.starts_with("Found 1 result in this workspace"));
        assert!(out.contains("1. Launch notes ("));
        assert!(out.contains(", assistant)"));
        assert!(out.contains(&format!("{}...", "x".repeat(200))));
        assert!(!out.contains(&"x".repeat(201)));
    }
}
