//! Host-side model client for the `llm_call` IPC action.
//!
//! The host itself never attaches credentials either: calls go through the
//! credential proxy's Unix socket, keeping exactly one code path that ever
//! touches an API key. `llm_call` is non-streaming on the wire — the reply
//! is the ordered chunk list the IPC contract promises.

use ax_types::{AxError, AxResult};
use ax_wire::llm::LlmChunk;
use ax_wire::request::LlmCallRequest;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use hyperlocal::{UnixConnector, Uri};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::debug;

/// Default requested output tokens when the caller sets none.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Model client talking to the proxy socket.
pub struct ProxyLlmClient {
    socket_path: PathBuf,
    model: String,
    client: Client<UnixConnector, Full<Bytes>>,
}

impl ProxyLlmClient {
    pub fn new(socket_path: PathBuf, model: impl Into<String>) -> Self {
        Self {
            socket_path,
            model: model.into(),
            client: Client::builder(TokioExecutor::new()).build(UnixConnector),
        }
    }

    /// Execute one model call and fold the reply into chunks.
    pub async fn call(&self, req: &LlmCallRequest) -> AxResult<Vec<LlmChunk>> {
        let body = self.build_body(req);
        let bytes = serde_json::to_vec(&body)?;

        let uri: hyper::Uri = Uri::new(&self.socket_path, "/v1/messages").into();
        let request = hyper::Request::post(uri)
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(bytes)))
            .map_err(|e| AxError::Internal(format!("build model request: {e}")))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| AxError::Provider(format!("proxy unreachable: {e}")))?;

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| AxError::Provider(format!("read model response: {e}")))?
            .to_bytes();

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body_bytes);
            return Err(AxError::Provider(format!("model returned {status}: {text}")));
        }

        let parsed: Value = serde_json::from_slice(&body_bytes)?;
        let chunks = response_to_chunks(&parsed);
        debug!(chunks = chunks.len(), "Model call complete");
        Ok(chunks)
    }

    fn build_body(&self, req: &LlmCallRequest) -> Value {
        let mut system = String::new();
        let mut messages = Vec::new();
        for message in &req.messages {
            if message.role == "system" {
                if !system.is_empty() {
                    system.push('\n');
                }
                system.push_str(&message.content);
            } else {
                messages.push(json!({
                    "role": if message.role == "assistant" { "assistant" } else { "user" },
                    "content": message.content,
                }));
            }
        }

        let mut body = json!({
            "model": self.model,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = Value::String(system);
        }
        if let Some(tools) = &req.tools {
            body["tools"] = json!(tools
                .iter()
                .map(|t| json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                }))
                .collect::<Vec<_>>());
        }
        body
    }
}

/// Fold a non-streaming messages response into the ordered chunk list.
pub fn response_to_chunks(response: &Value) -> Vec<LlmChunk> {
    let mut chunks = Vec::new();

    if let Some(content) = response.get("content").and_then(Value::as_array) {
        for block in content {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        chunks.push(LlmChunk::TextDelta {
                            text: text.to_string(),
                        });
                    }
                }
                Some("tool_use") => {
                    chunks.push(LlmChunk::ToolUse {
                        id: block
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        name: block
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        input: block.get("input").cloned().unwrap_or(Value::Null),
                    });
                }
                _ => {}
            }
        }
    }

    chunks.push(LlmChunk::Done {
        input_tokens: response
            .pointer("/usage/input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        output_tokens: response
            .pointer("/usage/output_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    });
    chunks
}
