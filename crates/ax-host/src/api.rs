//! OpenAI-compatible local HTTP API over a Unix socket.
//!
//! `POST /v1/chat/completions` (streaming and not), `GET /v1/models`,
//! `GET /health`. Policy blocks are emitted as normal 200 completions whose
//! content explains the block; transport problems surface as HTTP errors.
//! Streaming emits chunks only after the outbound scan has run — the scan
//! needs the complete turn, so chunking happens at delivery, not during
//! generation.

use crate::router::{RequestRouter, RouterOutcome, TurnRequest};
use ax_types::SessionId;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::warn;

/// Size of each streamed content delta.
const STREAM_CHUNK_CHARS: usize = 120;

// ── Request types ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<OaiMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OaiMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

// ── Response types ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatCompletionResponse {
    id: String,
    object: &'static str,
    created: u64,
    model: String,
    choices: Vec<Choice>,
    usage: UsageInfo,
}

#[derive(Serialize)]
struct Choice {
    index: u32,
    message: ChoiceMessage,
    finish_reason: &'static str,
}

#[derive(Serialize)]
struct ChoiceMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct UsageInfo {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

#[derive(Serialize)]
struct ChatCompletionChunk {
    id: String,
    object: &'static str,
    created: u64,
    model: String,
    choices: Vec<ChunkChoice>,
}

#[derive(Serialize)]
struct ChunkChoice {
    index: u32,
    delta: ChunkDelta,
    finish_reason: Option<&'static str>,
}

#[derive(Serialize)]
struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Serialize)]
struct ModelObject {
    id: String,
    object: &'static str,
    owned_by: &'static str,
}

#[derive(Serialize)]
struct ModelListResponse {
    object: &'static str,
    data: Vec<ModelObject>,
}

/// Shared state for the API handlers.
pub struct ApiState {
    pub router: Arc<RequestRouter>,
    /// Agent ids advertised by `/v1/models`.
    pub agents: Vec<String>,
}

/// Build the API router.
pub fn api_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve the API on an already-bound Unix listener.
pub async fn serve(
    state: Arc<ApiState>,
    listener: tokio::net::UnixListener,
) -> std::io::Result<()> {
    axum::serve(listener, api_router(state)).await
}

/// Resolve the agent from the `model` field: `ax:<agent>` or a plain agent
/// id; anything unknown falls back to the first configured agent.
fn resolve_agent(state: &ApiState, model: &str) -> String {
    let name = model.strip_prefix("ax:").unwrap_or(model);
    if state.agents.iter().any(|a| a == name) {
        return name.to_string();
    }
    state
        .agents
        .first()
        .cloned()
        .unwrap_or_else(|| "main".to_string())
}

async fn health() -> &'static str {
    "ok"
}

async fn list_models(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let data = state
        .agents
        .iter()
        .map(|a| ModelObject {
            id: format!("ax:{a}"),
            object: "model",
            owned_by: "ax",
        })
        .collect();
    Json(ModelListResponse {
        object: "list",
        data,
    })
}

async fn chat_completions(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ChatCompletionRequest>,
) -> axum::response::Response {
    // Session id validation happens before anything touches the filesystem;
    // a traversal-shaped id never becomes a path.
    let session_id = match &request.session_id {
        Some(raw) => match SessionId::parse(raw) {
            Ok(id) => Some(id),
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({
                        "error": {
                            "message": "invalid session_id",
                            "type": "invalid_request_error",
                        }
                    })),
                )
                    .into_response();
            }
        },
        None => None,
    };

    let message = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .unwrap_or_default();
    if message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": {
                    "message": "No user message found in request",
                    "type": "invalid_request_error",
                }
            })),
        )
            .into_response();
    }

    let agent_id = resolve_agent(&state, &request.model);
    let outcome = state
        .router
        .handle_turn(TurnRequest {
            agent_id,
            session_id,
            message,
            user_id: None,
            channel: None,
        })
        .await;

    // Policy refusals are 200 completions whose content explains the block;
    // only transport/provider failures become HTTP errors.
    let text = match outcome {
        Ok(RouterOutcome::Reply { text, .. }) => text,
        Ok(RouterOutcome::Denied { text, .. }) => text,
        Ok(RouterOutcome::Duplicate) | Ok(RouterOutcome::Silent) => String::new(),
        Err(e) => {
            warn!(error = %e, "Turn failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": {"message": e.to_string(), "type": "server_error"}
                })),
            )
                .into_response();
        }
    };

    let request_id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
    let created = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    if request.stream {
        return stream_response(request_id, created, request.model, text).into_response();
    }

    let completion_tokens = (text.len() as u64).div_ceil(4);
    Json(ChatCompletionResponse {
        id: request_id,
        object: "chat.completion",
        created,
        model: request.model,
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant",
                content: text,
            },
            finish_reason: "stop",
        }],
        usage: UsageInfo {
            prompt_tokens: 0,
            completion_tokens,
            total_tokens: completion_tokens,
        },
    })
    .into_response()
}

/// Emit the scanned reply as an SSE stream: role delta, content deltas,
/// finish, `[DONE]`.
fn stream_response(
    request_id: String,
    created: u64,
    model: String,
    text: String,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let make_chunk = move |id: &str, model: &str, delta: ChunkDelta, finish: Option<&'static str>| {
        let chunk = ChatCompletionChunk {
            id: id.to_string(),
            object: "chat.completion.chunk",
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish,
            }],
        };
        serde_json::to_string(&chunk).unwrap_or_default()
    };

    let mut events: Vec<Result<SseEvent, Infallible>> = Vec::new();
    events.push(Ok(SseEvent::default().data(make_chunk(
        &request_id,
        &model,
        ChunkDelta {
            role: Some("assistant"),
            content: None,
        },
        None,
    ))));

    for piece in split_chunks(&text, STREAM_CHUNK_CHARS) {
        events.push(Ok(SseEvent::default().data(make_chunk(
            &request_id,
            &model,
            ChunkDelta {
                role: None,
                content: Some(piece),
            },
            None,
        ))));
    }

    events.push(Ok(SseEvent::default().data(make_chunk(
        &request_id,
        &model,
        ChunkDelta {
            role: None,
            content: None,
        },
        Some("stop"),
    ))));
    events.push(Ok(SseEvent::default().data("[DONE]")));

    Sse::new(futures::stream::iter(events)).keep_alive(KeepAlive::default())
}

/// Split text into char-boundary chunks of roughly `size` characters,
/// always yielding at least one chunk.
fn split_chunks(text: &str, size: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|c| c.iter().collect())
        .collect()
}
