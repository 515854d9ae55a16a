use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use toolchat_core::types::{ChatOutcome, HistoryEntry, ToolInvocation, ToolOutputRecord};
use tracing::{info, warn};

/// `{"detail": ...}` error body with a status code.
fn detail(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "detail": message.into() }))).into_response()
}

// ── Health ──────────────────────────────────────────────────────────────

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    tools_available: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.agent().snapshot();
    Json(HealthResponse {
        status: if snapshot.initialized { "healthy" } else { "initializing" },
        tools_available: snapshot.tools.len(),
    })
}

// ── Tools ───────────────────────────────────────────────────────────────

pub fn tool_routes() -> Router<AppState> {
    Router::new().route("/tools", get(list_tools))
}

async fn list_tools(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "tools": state.agent().tool_names() }))
}

// ── Chat ────────────────────────────────────────────────────────────────

pub fn chat_routes() -> Router<AppState> {
    Router::new().route("/chat", post(chat))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    success: bool,
    ai_message: String,
    tool_calls: Vec<ToolInvocation>,
    tool_outputs: Vec<ToolOutputRecord>,
    error: Option<String>,
}

impl From<ChatOutcome> for ChatResponse {
    fn from(outcome: ChatOutcome) -> Self {
        match outcome {
            ChatOutcome::Success {
                ai_text,
                tool_invocations,
                tool_outputs,
            } => Self {
                success: true,
                ai_message: ai_text,
                tool_calls: tool_invocations,
                tool_outputs,
                error: None,
            },
            ChatOutcome::Failure {
                error, user_message, ..
            } => Self {
                success: false,
                ai_message: user_message,
                tool_calls: Vec::new(),
                tool_outputs: Vec::new(),
                error: Some(error),
            },
        }
    }
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            warn!("Rejected chat request: {}", rejection.body_text());
            return detail(StatusCode::UNPROCESSABLE_ENTITY, rejection.body_text());
        }
    };

    if req.message.trim().is_empty() {
        return detail(StatusCode::BAD_REQUEST, "Empty message");
    }

    info!(
        chars = req.message.chars().count(),
        history = req.history.len(),
        "Chat request"
    );
    let outcome = state.dispatcher.process_chat(req.message, req.history).await;
    if let Some(kind) = outcome.failure_kind() {
        warn!(kind = kind.as_str(), "Chat request failed");
    }

    Json(ChatResponse::from(outcome)).into_response()
}
