//! The conversation orchestrator: one user turn from context load to the
//! terminal `done` event.
//!
//! Entry point: [`ConversationOrchestrator::handle_turn`]. Everything that
//! can fail before the upstream stream is open (credentials, context load,
//! provider connect, persisting the user turn) is returned as an `Err` so
//! the caller can answer with a status code. Once the [`TurnHandle`] is
//! returned, failures arrive in-band as [`TurnEvent::Error`].

use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;

use cs_domain::config::{AuthMode, LlmConfig};
use cs_domain::error::{Error, Result};
use cs_domain::store::{ConversationStore, CredentialSource};
use cs_domain::stream::{BoxStream, StreamEvent, Usage};
use cs_domain::tool::{ToolCall, ToolResult};
use cs_domain::trace::TraceEvent;
use cs_domain::turn::ConversationTurn;
use cs_providers::{ChatRequest, LlmProvider};
use cs_tools::{ToolContext, ToolDispatcher};

use super::assembler::ToolCallAssembler;
use super::context::build_messages;

const EVENT_BUFFER: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnEvent — what the transport sees
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events emitted during a single turn, in the order the client must see
/// them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// A fragment of answer text.
    Content { text: String },

    /// A fragment of reasoning text.
    Reasoning { text: String },

    /// Token usage reported by the provider.
    Usage(Usage),

    /// The assembled calls, emitted once the assistant turn is persisted.
    ToolCalls { calls: Vec<ToolCall> },

    /// One dispatched call's result.
    ToolResult(ToolResult),

    /// Terminal success event.
    Done {
        message_id: String,
        usage: Usage,
        model: String,
    },

    /// Terminal failure event.
    Error { message: String },
}

impl TurnEvent {
    /// The wire name, used as the SSE `event:` field.
    pub fn kind(&self) -> &'static str {
        match self {
            TurnEvent::Content { .. } => "content",
            TurnEvent::Reasoning { .. } => "reasoning",
            TurnEvent::Usage(_) => "usage",
            TurnEvent::ToolCalls { .. } => "tool_calls",
            TurnEvent::ToolResult(_) => "tool_result",
            TurnEvent::Done { .. } => "done",
            TurnEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::Done { .. } | TurnEvent::Error { .. })
    }
}

/// Where a turn is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Streaming,
    Finalizing,
    Dispatching,
    Persisted,
    Done,
    Cancelled,
    Errored,
}

impl TurnPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnPhase::Idle => "idle",
            TurnPhase::Streaming => "streaming",
            TurnPhase::Finalizing => "finalizing",
            TurnPhase::Dispatching => "dispatching",
            TurnPhase::Persisted => "persisted",
            TurnPhase::Done => "done",
            TurnPhase::Cancelled => "cancelled",
            TurnPhase::Errored => "errored",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs and handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub chat_id: String,
    pub user_id: String,
    pub content: String,
}

/// The consumer side of a running turn.
///
/// Dropping the handle cancels the turn: the orchestrator stops reading
/// upstream and skips tool dispatch.
pub struct TurnHandle {
    events: mpsc::Receiver<TurnEvent>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl TurnHandle {
    pub async fn next_event(&mut self) -> Option<TurnEvent> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain every remaining event.
    pub async fn collect(mut self) -> Vec<TurnEvent> {
        let mut out = Vec::new();
        while let Some(event) = self.events.recv().await {
            out.push(event);
        }
        out
    }
}

/// Per-turn model settings.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub model: String,
    pub temperature: Option<f32>,
    pub memory_snippet_limit: usize,
    /// When false, turns run without a bearer credential.
    pub require_credential: bool,
}

impl OrchestratorSettings {
    pub fn from_config(cfg: &LlmConfig) -> Self {
        Self {
            model: cfg.default_model.clone(),
            temperature: Some(cfg.temperature),
            memory_snippet_limit: cfg.memory_snippet_limit,
            require_credential: cfg.auth.mode != AuthMode::None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ConversationOrchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ConversationOrchestrator {
    provider: Arc<dyn LlmProvider>,
    store: Arc<dyn ConversationStore>,
    credentials: Arc<dyn CredentialSource>,
    tools: Arc<ToolDispatcher>,
    settings: OrchestratorSettings,
}

impl ConversationOrchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        store: Arc<dyn ConversationStore>,
        credentials: Arc<dyn CredentialSource>,
        tools: Arc<ToolDispatcher>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            provider,
            store,
            credentials,
            tools,
            settings,
        }
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    /// Start one turn. Returns once the upstream stream is open and the
    /// user turn is persisted; the rest runs on a spawned task.
    ///
    /// `chat_lock` is the chat's exclusivity permit. The spawned task owns it
    /// and releases it only after the last turn is persisted, so a second
    /// turn cannot interleave with tool results still being written after
    /// the client has gone.
    pub async fn handle_turn(
        &self,
        req: TurnRequest,
        chat_lock: OwnedSemaphorePermit,
    ) -> Result<TurnHandle> {
        let span = tracing::info_span!(
            "turn",
            chat_id = %req.chat_id,
            user_id = %req.user_id,
            "otel.kind" = "SERVER",
        );
        self.start(req, chat_lock).instrument(span).await
    }

    async fn start(&self, req: TurnRequest, chat_lock: OwnedSemaphorePermit) -> Result<TurnHandle> {
        let api_key = self.credentials.api_credential(&req.user_id);
        if api_key.is_none() && self.settings.require_credential {
            return Err(Error::Config(
                "no API credential is configured for this user".into(),
            ));
        }

        let ctx = self.store.load_context(&req.chat_id, &req.user_id).await?;
        let messages = build_messages(&ctx, &req.content, self.settings.memory_snippet_limit);
        let tool_defs = self.tools.definitions(ctx.workspace_id.is_some());
        tracing::debug!(
            prior_turns = ctx.prior_turns.len(),
            memories = ctx.memory_snippets.len(),
            tools = tool_defs.len(),
            "context assembled"
        );

        let llm_span = tracing::info_span!(
            "llm.call",
            "otel.kind" = "CLIENT",
            model = %self.settings.model,
            input_tokens = tracing::field::Empty,
            output_tokens = tracing::field::Empty,
        );
        let stream = self
            .provider
            .chat_stream(ChatRequest {
                model: self.settings.model.clone(),
                messages,
                tools: tool_defs,
                temperature: self.settings.temperature,
                api_key,
            })
            .instrument(llm_span.clone())
            .await?;

        let user_turn_id = self
            .store
            .append_turn(&req.chat_id, ConversationTurn::user(req.content.clone()))
            .await?;
        TraceEvent::TurnPersisted {
            chat_id: req.chat_id.clone(),
            role: "user".into(),
            turn_id: user_turn_id,
        }
        .emit();

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let run = TurnRun {
            store: self.store.clone(),
            tools: self.tools.clone(),
            model: self.settings.model.clone(),
            chat_id: req.chat_id,
            tool_ctx: ToolContext {
                user_id: Some(req.user_id),
                workspace_id: ctx.workspace_id,
            },
            tx,
            cancel: cancel.clone(),
            phase: TurnPhase::Idle,
            _chat_lock: chat_lock,
        };
        tokio::spawn(run.execute(stream, llm_span).instrument(tracing::Span::current()));

        Ok(TurnHandle {
            events: rx,
            _guard: cancel.clone().drop_guard(),
            cancel,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnRun — the spawned half of a turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum StreamEnd {
    Finished,
    Cancelled,
    Failed(Error),
}

/// What the streaming phase produced. `content`/`reasoning` hold only the
/// text that was actually delivered to the client.
struct Streamed {
    content: String,
    reasoning: String,
    assembler: ToolCallAssembler,
    usage: Option<Usage>,
    end: StreamEnd,
}

struct TurnRun {
    store: Arc<dyn ConversationStore>,
    tools: Arc<ToolDispatcher>,
    model: String,
    chat_id: String,
    tool_ctx: ToolContext,
    tx: mpsc::Sender<TurnEvent>,
    cancel: CancellationToken,
    phase: TurnPhase,
    /// Held until `execute` returns.
    _chat_lock: OwnedSemaphorePermit,
}

impl TurnRun {
    async fn execute(mut self, stream: BoxStream<'static, Result<StreamEvent>>, llm_span: tracing::Span) {
        let mut usage = Usage::default();
        let mut tool_calls = 0;

        if let Err(e) = self.drive(stream, llm_span, &mut usage, &mut tool_calls).await {
            tracing::warn!(error = %e, phase = self.phase.as_str(), "turn failed");
            self.advance(TurnPhase::Errored);
            self.forward(TurnEvent::Error {
                message: e.to_string(),
            })
            .await;
        }

        TraceEvent::TurnFinished {
            chat_id: self.chat_id.clone(),
            phase: self.phase.as_str().into(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            tool_calls,
        }
        .emit();
    }

    async fn drive(
        &mut self,
        stream: BoxStream<'static, Result<StreamEvent>>,
        llm_span: tracing::Span,
        usage_out: &mut Usage,
        calls_out: &mut usize,
    ) -> Result<()> {
        self.advance(TurnPhase::Streaming);
        let streamed = self.consume(stream).instrument(llm_span.clone()).await;
        if let Some(u) = &streamed.usage {
            llm_span.record("input_tokens", u.prompt_tokens);
            llm_span.record("output_tokens", u.completion_tokens);
            *usage_out = *u;
        }

        self.advance(TurnPhase::Finalizing);
        let Streamed {
            content,
            reasoning,
            assembler,
            usage,
            end,
        } = streamed;

        match end {
            StreamEnd::Finished => {}
            StreamEnd::Cancelled => {
                tracing::info!(forwarded_chars = content.len(), "turn cancelled by client");
                self.persist_partial(&content, &reasoning).await?;
                self.advance(TurnPhase::Cancelled);
                return Ok(());
            }
            StreamEnd::Failed(e) => {
                self.persist_partial(&content, &reasoning).await?;
                return Err(e);
            }
        }

        let calls = assembler.finalize();
        *calls_out = calls.len();
        let message_id = self
            .persist(ConversationTurn::assistant(content, &reasoning, &calls)?)
            .await?;

        if !calls.is_empty() {
            self.advance(TurnPhase::Dispatching);
            self.forward(TurnEvent::ToolCalls {
                calls: calls.clone(),
            })
            .await;
            for call in &calls {
                let result = self.tools.dispatch(call, &self.tool_ctx).await;
                self.persist(ConversationTurn::tool(
                    result.tool_call_id.clone(),
                    result.name.clone(),
                    result.content.clone(),
                ))
                .await?;
                self.forward(TurnEvent::ToolResult(result)).await;
            }
        }

        self.store.touch_chat(&self.chat_id).await?;
        self.advance(TurnPhase::Persisted);

        self.forward(TurnEvent::Done {
            message_id,
            usage: usage.unwrap_or_default(),
            model: self.model.clone(),
        })
        .await;
        self.advance(TurnPhase::Done);
        Ok(())
    }

    /// Drain the upstream stream, forwarding text as it arrives. Stops on
    /// finish, error, cancellation, or a closed client.
    async fn consume(&self, mut stream: BoxStream<'static, Result<StreamEvent>>) -> Streamed {
        let mut out = Streamed {
            content: String::new(),
            reasoning: String::new(),
            assembler: ToolCallAssembler::new(),
            usage: None,
            end: StreamEnd::Finished,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    out.end = StreamEnd::Cancelled;
                    break;
                }
                item = stream.next() => item,
            };

            let event = match next {
                None => break,
                Some(Err(e)) => {
                    out.end = StreamEnd::Failed(e);
                    break;
                }
                Some(Ok(event)) => event,
            };

            let delivered = match event {
                StreamEvent::Content { text } => {
                    let ok = self.forward(TurnEvent::Content { text: text.clone() }).await;
                    if ok {
                        out.content.push_str(&text);
                    }
                    ok
                }
                StreamEvent::Reasoning { text } => {
                    let ok = self.forward(TurnEvent::Reasoning { text: text.clone() }).await;
                    if ok {
                        out.reasoning.push_str(&text);
                    }
                    ok
                }
                StreamEvent::ToolCallDelta(delta) => {
                    out.assembler.ingest(&delta);
                    true
                }
                StreamEvent::Usage(usage) => {
                    out.usage = Some(usage);
                    self.forward(TurnEvent::Usage(usage)).await
                }
                StreamEvent::Finish { reason } => {
                    tracing::debug!(reason = ?reason, pending_calls = out.assembler.len(), "upstream finished");
                    break;
                }
            };

            if !delivered {
                out.end = StreamEnd::Cancelled;
                break;
            }
        }
        out
    }

    /// Persist whatever was delivered before the turn stopped early.
    async fn persist_partial(&self, content: &str, reasoning: &str) -> Result<()> {
        if content.is_empty() && reasoning.is_empty() {
            return Ok(());
        }
        self.persist(ConversationTurn::assistant(content, reasoning, &[])?)
            .await
            .map(|_| ())
    }

    async fn persist(&self, turn: ConversationTurn) -> Result<String> {
        let role = turn.role.as_str();
        let id = self.store.append_turn(&self.chat_id, turn).await?;
        TraceEvent::TurnPersisted {
            chat_id: self.chat_id.clone(),
            role: role.into(),
            turn_id: id.clone(),
        }
        .emit();
        Ok(id)
    }

    /// Send one event; `false` means the client is gone.
    async fn forward(&self, event: TurnEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    fn advance(&mut self, next: TurnPhase) {
        tracing::debug!(from = self.phase.as_str(), to = next.as_str(), "turn phase");
        self.phase = next;
    }
}
