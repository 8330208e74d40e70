//! Chat API endpoints.
//!
//! - `POST /v1/chats`                 — create a chat (optionally workspace-scoped)
//! - `POST /v1/chats/:chat_id/turns`  — SSE: run one turn and stream its events

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::stream::Stream;
use serde::Deserialize;

use cs_domain::error::Error;

use crate::runtime::{ChatBusy, TurnHandle, TurnRequest};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateChatBody {
    #[serde(default)]
    pub chat_id: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TurnBody {
    pub content: String,
    pub user_id: String,
}

impl TurnBody {
    fn validate(&self) -> Result<(), &'static str> {
        if self.user_id.trim().is_empty() {
            return Err("user_id must not be empty");
        }
        if self.content.trim().is_empty() {
            return Err("content must not be empty");
        }
        Ok(())
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Map a pre-stream failure to the status the caller sees.
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Config(_) | Error::Auth(_) => StatusCode::PRECONDITION_FAILED,
        Error::Provider { .. } | Error::Http(_) | Error::Timeout(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_chat(
    State(state): State<AppState>,
    Json(body): Json<CreateChatBody>,
) -> Response {
    if body.user_id.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "user_id must not be empty");
    }
    let chat_id = body
        .chat_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("chat_{}", uuid::Uuid::new_v4().simple()));
    let title = body.title.as_deref().unwrap_or("New chat");

    if let Err(e) = state
        .store
        .create_chat(&chat_id, &body.user_id, title, body.workspace_id.as_deref())
    {
        tracing::warn!(chat_id = %chat_id, error = %e, "chat create rejected");
        return error_response(StatusCode::FORBIDDEN, e.to_string());
    }
    tracing::info!(chat_id = %chat_id, workspace_id = ?body.workspace_id, "chat created");

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "chat_id": chat_id,
            "title": title,
            "workspace_id": body.workspace_id,
        })),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chats/:chat_id/turns (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_turn(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(body): Json<TurnBody>,
) -> Response {
    if let Err(reason) = body.validate() {
        return error_response(StatusCode::BAD_REQUEST, reason);
    }

    let permit = match state.chat_locks.try_acquire(&chat_id) {
        Ok(p) => p,
        Err(busy @ ChatBusy) => return error_response(StatusCode::CONFLICT, busy.to_string()),
    };

    let request = TurnRequest {
        chat_id,
        user_id: body.user_id,
        content: body.content,
    };
    let handle = match state.orchestrator.handle_turn(request, permit).await {
        Ok(h) => h,
        Err(e) => {
            let status = status_for(&e);
            tracing::warn!(error = %e, status = status.as_u16(), "turn rejected before streaming");
            return error_response(status, e.to_string());
        }
    };

    Sse::new(make_sse_stream(handle))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Dropping this stream (client disconnect) drops the handle, which
/// cancels the turn. The chat lock stays with the turn until it has
/// finished writing.
fn make_sse_stream(mut handle: TurnHandle) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        while let Some(event) = handle.next_event().await {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().event(event.kind()).data(data));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_stream_errors_map_to_status_codes() {
        assert_eq!(
            status_for(&Error::Config("no key".into())),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            status_for(&Error::Provider {
                provider: "openai".into(),
                message: "HTTP 401".into()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&Error::Timeout("connect".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&Error::Persistence("disk full".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn rescoping_someone_elses_chat_is_forbidden() {
        use std::sync::Arc;
        use cs_domain::config::Config;

        let state = crate::bootstrap::build_app_state(Arc::new(Config::default())).unwrap();
        let body = |user: &str, ws: &str| CreateChatBody {
            chat_id: Some("c1".into()),
            user_id: user.into(),
            title: None,
            workspace_id: Some(ws.into()),
        };

        let created = create_chat(State(state.clone()), Json(body("u1", "ws1"))).await;
        assert_eq!(created.status(), StatusCode::CREATED);

        let hijack = create_chat(State(state.clone()), Json(body("u2", "ws2"))).await;
        assert_eq!(hijack.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            state.store.chat("c1").unwrap().workspace_id.as_deref(),
            Some("ws1")
        );
    }

    #[test]
    fn turn_body_requires_content_and_user() {
        let body: TurnBody = serde_json::from_str(r#"{"content":"  ","user_id":"u1"}"#).unwrap();
        assert_eq!(body.validate(), Err("content must not be empty"));
        let body: TurnBody = serde_json::from_str(r#"{"content":"hi","user_id":""}"#).unwrap();
        assert_eq!(body.validate(), Err("user_id must not be empty"));
        let body: TurnBody = serde_json::from_str(r#"{"content":"hi","user_id":"u1"}"#).unwrap();
        assert!(body.validate().is_ok());
    }
}
