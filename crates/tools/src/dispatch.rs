//! Tool registry and dispatcher.
//!
//! Built-in tools form a closed set ([`ToolKind`]); anything else is an
//! unknown tool. [`ToolDispatcher::dispatch`] never fails: every outcome,
//! including handler errors and panics, becomes a text [`ToolResult`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use serde_json::{json, Value};

use cs_domain::config::ToolsConfig;
use cs_domain::error::{Error, Result};
use cs_domain::store::{CredentialSource, MemoryStore, WorkspaceIndex};
use cs_domain::tool::{ToolCall, ToolDefinition, ToolResult};
use cs_domain::trace::TraceEvent;

use crate::args::str_arg;
use crate::calculator;
use crate::memory::MemoryTools;
use crate::rate_limit::RateLimiter;
use crate::web_fetch::WebFetch;
use crate::web_search::WebSearch;
use crate::workspace_search::WorkspaceSearch;

pub const CODE_INTERPRETER_PLACEHOLDER: &str =
    "Code execution is not available in this environment. Reason through the \
     computation step by step, or use the calculator tool for arithmetic.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    WebSearch,
    WebFetch,
    Calculator,
    CodeInterpreter,
    WorkspaceSearch,
    AddMemory,
    ReadMemories,
}

impl ToolKind {
    pub const ALL: [ToolKind; 7] = [
        ToolKind::WebSearch,
        ToolKind::WebFetch,
        ToolKind::Calculator,
        ToolKind::CodeInterpreter,
        ToolKind::WorkspaceSearch,
        ToolKind::AddMemory,
        ToolKind::ReadMemories,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::WebSearch => "web_search",
            ToolKind::WebFetch => "web_fetch",
            ToolKind::Calculator => "calculator",
            ToolKind::CodeInterpreter => "code_interpreter",
            ToolKind::WorkspaceSearch => "workspace_search",
            ToolKind::AddMemory => "add_memory",
            ToolKind::ReadMemories => "read_memories",
        }
    }

    /// Offered only when the chat has a workspace scope.
    pub fn needs_workspace(self) -> bool {
        matches!(self, ToolKind::WorkspaceSearch)
    }

    pub fn definition(self) -> ToolDefinition {
        let (description, parameters) = match self {
            ToolKind::WebSearch => (
                "Search the web for current information. Returns titles, URLs and snippets.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "Search query"},
                        "count": {"type": "integer", "description": "Number of results (1-10)"}
                    },
                    "required": ["query"]
                }),
            ),
            ToolKind::WebFetch => (
                "Fetch a web page and return its readable text.",
                json!({
                    "type": "object",
                    "properties": {
                        "url": {"type": "string", "description": "Full http(s) URL"}
                    },
                    "required": ["url"]
                }),
            ),
            ToolKind::Calculator => (
                "Evaluate an arithmetic expression using + - * / and parentheses.",
                json!({
                    "type": "object",
                    "properties": {
                        "expression": {"type": "string", "description": "e.g. (12.5 + 3) * 4"}
                    },
                    "required": ["expression"]
                }),
            ),
            ToolKind::CodeInterpreter => (
                "Run a code snippet. Currently unavailable.",
                json!({
                    "type": "object",
                    "properties": {
                        "code": {"type": "string"},
                        "language": {"type": "string"}
                    },
                    "required": ["code"]
                }),
            ),
            ToolKind::WorkspaceSearch => (
                "Search messages across the chats in the current workspace.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "Words to search for"},
                        "limit": {"type": "integer", "description": "Maximum results (1-20)"}
                    },
                    "required": ["query"]
                }),
            ),
            ToolKind::AddMemory => (
                "Save a fact about the user for future conversations.",
                json!({
                    "type": "object",
                    "properties": {
                        "content": {"type": "string", "description": "The fact to remember"},
                        "category": {"type": "string", "description": "e.g. preferences, work, personal"},
                        "importance": {"type": "integer", "description": "1 (trivial) to 5 (critical)"}
                    },
                    "required": ["content"]
                }),
            ),
            ToolKind::ReadMemories => (
                "Read saved facts about the user, most important first.",
                json!({
                    "type": "object",
                    "properties": {
                        "category": {"type": "string", "description": "Only this category"},
                        "query": {"type": "string", "description": "Text the memory must contain"},
                        "limit": {"type": "integer", "description": "Maximum results (1-50)"}
                    }
                }),
            ),
        };
        ToolDefinition {
            name: self.name().to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
/// Who is calling, and within which workspace.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub user_id: Option<String>,
    pub workspace_id: Option<String>,
}

impl ToolContext {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            workspace_id: None,
        }
    }

    /// The user id, if present and non-empty.
    pub fn user(&self) -> Option<&str> {
        self.user_id.as_deref().filter(|u| !u.is_empty())
    }

    /// Rate-limit bucket: anonymous callers share one budget.
    pub(crate) fn rate_key(&self) -> &str {
        self.user().unwrap_or("anonymous")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Collaborators the built-in tools need.
pub struct ToolDeps {
    pub config: ToolsConfig,
    pub limiter: Arc<RateLimiter>,
    pub credentials: Arc<dyn CredentialSource>,
    pub memories: Arc<dyn MemoryStore>,
    pub workspace: Arc<dyn WorkspaceIndex>,
}

pub struct ToolDispatcher {
    web_search: WebSearch,
    web_fetch: WebFetch,
    memory: MemoryTools,
    workspace: WorkspaceSearch,
}

impl ToolDispatcher {
    pub fn new(deps: ToolDeps) -> Result<Self> {
        Ok(Self {
            web_search: WebSearch::new(
                deps.config.web_search,
                deps.limiter.clone(),
                deps.credentials,
            )?,
            web_fetch: WebFetch::new(deps.config.web_fetch, deps.limiter)?,
            memory: MemoryTools::new(deps.memories),
            workspace: WorkspaceSearch::new(deps.workspace),
        })
    }

    /// Definitions offered upstream for one turn.
    pub fn definitions(&self, has_workspace: bool) -> Vec<ToolDefinition> {
        ToolKind::ALL
            .into_iter()
            .filter(|k| has_workspace || !k.needs_workspace())
            .map(ToolKind::definition)
            .collect()
    }

    /// Execute one call. Always returns a result; failures become text.
    pub async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let started = Instant::now();
        let mut is_error = false;

        let content = match ToolKind::from_name(&call.name) {
            None => {
                is_error = true;
                tracing::warn!(tool = %call.name, "unknown tool requested");
                format!("Unknown tool: {}", call.name)
            }
            Some(_) if call.is_malformed() => {
                is_error = true;
                let reason = call.malformed.as_deref().unwrap_or("invalid JSON");
                tracing::warn!(tool = %call.name, error = %reason, "malformed tool arguments");
                format!(
                    "Error executing {}: arguments are not valid JSON ({reason})",
                    call.name
                )
            }
            Some(kind) => {
                let outcome = AssertUnwindSafe(self.run(kind, &call.arguments, ctx))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(Error::Other("tool handler panicked".into())));
                match outcome {
                    Ok(text) => text,
                    Err(e) => {
                        is_error = true;
                        tracing::warn!(tool = %call.name, error = %e, "tool execution failed");
                        format!("Error executing {}: {e}", call.name)
                    }
                }
            }
        };

        TraceEvent::ToolDispatched {
            tool: call.name.clone(),
            user_id: ctx.user_id.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            is_error,
        }
        .emit();

        ToolResult {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content,
        }
    }

    async fn run(&self, kind: ToolKind, args: &Value, ctx: &ToolContext) -> Result<String> {
        match kind {
            ToolKind::WebSearch => self.web_search.run(args, ctx).await,
            ToolKind::WebFetch => self.web_fetch.run(args, ctx).await,
            ToolKind::Calculator => run_calculator(args),
            ToolKind::CodeInterpreter => Ok(CODE_INTERPRETER_PLACEHOLDER.into()),
            ToolKind::WorkspaceSearch => self.workspace.run(args, ctx).await,
            ToolKind::AddMemory => self.memory.add(args, ctx).await,
            ToolKind::ReadMemories => self.memory.read(args, ctx).await,
        }
    }
}

fn run_calculator(args: &Value) -> Result<String> {
    let expression = str_arg(args, "expression")
        .ok_or_else(|| Error::Other("missing required argument 'expression'".into()))?;
    let value = calculator::evaluate(expression)
        .map_err(|e| Error::Other(format!("invalid expression: {e}")))?;
    Ok(format!("{expression} = {}", calculator::format_number(value)))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use cs_domain::store::StaticCredentials;
    use cs_domain::turn::{MemoryEntry, MemoryQuery, NewMemory, WorkspaceHit, WorkspaceSearchRequest};
    use std::time::Duration;

    struct NoStore;

    #[async_trait::async_trait]
    impl MemoryStore for NoStore {
        async fn insert(&self, _memory: NewMemory) -> Result<MemoryEntry> {
            Err(Error::Persistence("database is read-only".into()))
        }
        async fn query(&self, _query: MemoryQuery) -> Result<Vec<MemoryEntry>> {
            Ok(Vec::new())
        }
    }

    #[async_trait::async_trait]
    impl WorkspaceIndex for NoStore {
        async fn search_workspace(&self, _req: WorkspaceSearchRequest) -> Result<Vec<WorkspaceHit>> {
            Ok(Vec::new())
        }
    }

    fn dispatcher() -> ToolDispatcher {
        ToolDispatcher::new(ToolDeps {
            config: ToolsConfig::default(),
            limiter: Arc::new(RateLimiter::new(Duration::from_secs(60), 10)),
            credentials: Arc::new(StaticCredentials::default()),
            memories: Arc::new(NoStore),
            workspace: Arc::new(NoStore),
        })
        .unwrap()
    }

    #[test]
    fn kinds_round_trip_by_name() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
            assert_eq!(kind.definition().name, kind.name());
        }
        assert_eq!(ToolKind::from_name("frobnicate"), None);
    }

    #[test]
    fn workspace_tool_offered_only_with_scope() {
        let d = dispatcher();
        let without: Vec<_> = d.definitions(false).into_iter().map(|t| t.name).collect();
        assert!(!without.contains(&"workspace_search".to_string()));
        assert_eq!(without.len(), 6);
        assert_eq!(d.definitions(true).len(), 7);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_result_not_a_failure() {
        let call = ToolCall::new("call_1", "frobnicate", json!({}));
        let result = dispatcher().dispatch(&call, &ToolContext::for_user("u1")).await;
        assert_eq!(result.tool_call_id, "call_1");
        assert_eq!(result.content, "Unknown tool: frobnicate");
    }

    #[tokio::test]
    async fn calculator_dispatch() {
        let call = ToolCall::new("c", "calculator", json!({"expression": "(2 + 3) * 4"}));
        let result = dispatcher().dispatch(&call, &ToolContext::default()).await;
        assert_eq!(result.content, "(2 + 3) * 4 = 20");

        let call = ToolCall::new("c", "calculator", json!({"expression": "1/0"}));
        let result = dispatcher().dispatch(&call, &ToolContext::default()).await;
        assert_eq!(
            result.content,
            "Error executing calculator: invalid expression: division by zero"
        );
    }

    #[tokio::test]
    async fn handler_error_is_converted_to_text() {
        let call = ToolCall::new("m", "add_memory", json!({"content": "likes tea"}));
        let result = dispatcher().dispatch(&call, &ToolContext::for_user("u1")).await;
        assert_eq!(
            result.content,
            "Error executing add_memory: persistence: database is read-only"
        );
    }

    #[tokio::test]
    async fn malformed_arguments_are_contained() {
        let call = ToolCall {
            id: "bad".into(),
            name: "calculator".into(),
            arguments: Value::String("{\"expression\": ".into()),
            malformed: Some("EOF while parsing".into()),
        };
        let result = dispatcher().dispatch(&call, &ToolContext::default()).await;
        assert!(result
            .content
            .starts_with("Error executing calculator: arguments are not valid JSON"));
    }

    #[tokio::test]
    async fn web_search_and_web_fetch_share_one_budget_per_user() {
        let mut config = ToolsConfig::default();
        // Nothing listens on the discard port: the search fails fast after
        // the budget check has already been charged.
        config.web_search.base_url = "http://127.0.0.1:9/search".into();
        config.web_search.timeout_secs = 2;
        let d = ToolDispatcher::new(ToolDeps {
            config,
            limiter: Arc::new(RateLimiter::new(Duration::from_secs(60), 1)),
            credentials: Arc::new(StaticCredentials {
                api_key: None,
                search_key: Some("stub-key".into()),
            }),
            memories: Arc::new(NoStore),
            workspace: Arc::new(NoStore),
        })
        .unwrap();
        let alice = ToolContext::for_user("alice");

        let search = ToolCall::new("s", "web_search", json!({"query": "rust"}));
        let first = d.dispatch(&search, &alice).await;
        assert!(!first.content.starts_with("Rate limit exceeded"), "{}", first.content);

        let fetch = ToolCall::new("f", "web_fetch", json!({"url": "https://example.com"}));
        let second = d.dispatch(&fetch, &alice).await;
        assert!(second.content.starts_with("Rate limit exceeded"), "{}", second.content);

        let other = d.dispatch(&search, &ToolContext::for_user("bob")).await;
        assert!(!other.content.starts_with("Rate limit exceeded"), "{}", other.content);
    }

    #[tokio::test]
    async fn code_interpreter_is_a_placeholder() {
        let call = ToolCall::new("x", "code_interpreter", json!({"code": "print(1)"}));
        let result = dispatcher().dispatch(&call, &ToolContext::default()).await;
        assert_eq!(result.content, CODE_INTERPRETER_PLACEHOLDER);
    }
}
