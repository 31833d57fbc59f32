//! Streaming model client.
//!
//! Speaks the Anthropic messages wire shape over the TCP bridge: the base
//! URL is `http://127.0.0.1:<bridge port>`, so requests carry no
//! credentials; the host proxy injects them. Responses stream as SSE and
//! are folded into an [`AssistantTurn`] while text deltas are surfaced to
//! the caller as they arrive.

use ax_types::message::TokenUsage;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

/// A complete tool invocation request from the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// One fully-collected assistant response.
#[derive(Debug, Clone, Default)]
pub struct AssistantTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    /// `"end_turn"`, `"tool_use"`, `"max_tokens"`, …
    pub stop_reason: String,
    pub usage: TokenUsage,
}

impl AssistantTurn {
    /// Whether the model stopped to use tools.
    pub fn wants_tools(&self) -> bool {
        self.stop_reason == "tool_use" || !self.tool_calls.is_empty()
    }
}

// ---------------------------------------------------------------------------
// SSE parsing
// ---------------------------------------------------------------------------

/// Incremental server-sent-events parser yielding `data:` JSON payloads.
///
/// Chunk boundaries are arbitrary; the parser buffers until a full event
/// block (terminated by a blank line) is available.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every complete `data:` payload parsed so far.
    pub fn feed(&mut self, chunk: &str) -> Vec<Value> {
        self.buffer.push_str(chunk);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();
            for line in block.lines() {
                if let Some(data) = line.strip_prefix("data:") {
                    let data = data.trim();
                    if data == "[DONE]" {
                        continue;
                    }
                    if let Ok(value) = serde_json::from_str::<Value>(data) {
                        payloads.push(value);
                    }
                }
            }
        }
        payloads
    }
}

// ---------------------------------------------------------------------------
// Turn accumulation
// ---------------------------------------------------------------------------

/// Folds Anthropic stream events into an [`AssistantTurn`].
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    turn: AssistantTurn,
    /// In-flight tool block: (id, name, accumulated input JSON).
    pending_tool: Option<(String, String, String)>,
    /// Text delta emitted by the latest event, for caller streaming.
    pub last_text: Option<String>,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one SSE payload.
    pub fn apply(&mut self, event: &Value) {
        self.last_text = None;
        match event.get("type").and_then(Value::as_str) {
            Some("message_start") => {
                if let Some(tokens) = event
                    .pointer("/message/usage/input_tokens")
                    .and_then(Value::as_u64)
                {
                    self.turn.usage.input_tokens = tokens;
                }
            }
            Some("content_block_start") => {
                let block = &event["content_block"];
                if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                    let id = block["id"].as_str().unwrap_or_default().to_string();
                    let name = block["name"].as_str().unwrap_or_default().to_string();
                    self.pending_tool = Some((id, name, String::new()));
                }
            }
            Some("content_block_delta") => {
                let delta = &event["delta"];
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => {
                        if let Some(text) = delta["text"].as_str() {
                            self.turn.text.push_str(text);
                            self.last_text = Some(text.to_string());
                        }
                    }
                    Some("input_json_delta") => {
                        if let Some((_, _, input)) = self.pending_tool.as_mut() {
                            if let Some(part) = delta["partial_json"].as_str() {
                                input.push_str(part);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Some("content_block_stop") => {
                if let Some((id, name, input)) = self.pending_tool.take() {
                    let parsed = if input.trim().is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(&input).unwrap_or(json!({}))
                    };
                    self.turn.tool_calls.push(ToolCall {
                        id,
                        name,
                        input: parsed,
                    });
                }
            }
            Some("message_delta") => {
                if let Some(reason) = event.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    self.turn.stop_reason = reason.to_string();
                }
                if let Some(tokens) = event
                    .pointer("/usage/output_tokens")
                    .and_then(Value::as_u64)
                {
                    self.turn.usage.output_tokens = tokens;
                }
            }
            _ => {}
        }
    }

    /// Take the finished turn.
    pub fn finish(self) -> AssistantTurn {
        self.turn
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// The streaming model client.
pub struct ModelClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl ModelClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Run one streaming model invocation.
    ///
    /// `on_text` fires for every text delta as it arrives so the runner can
    /// forward tokens to stdout immediately.
    pub async fn stream_turn(
        &self,
        system: &str,
        messages: &[Value],
        tools: &[Value],
        max_tokens: u32,
        mut on_text: impl FnMut(&str),
    ) -> Result<AssistantTurn, String> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "system": system,
            "messages": messages,
            "stream": true,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.to_vec());
        }

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("model request failed: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(format!("model returned {status}: {text}"));
        }

        let mut parser = SseParser::new();
        let mut acc = TurnAccumulator::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| format!("stream error: {e}"))?;
            let text = String::from_utf8_lossy(&bytes);
            for event in parser.feed(&text) {
                acc.apply(&event);
                if let Some(delta) = acc.last_text.take() {
                    on_text(&delta);
                }
            }
        }

        let turn = acc.finish();
        debug!(
            stop_reason = %turn.stop_reason,
            tool_calls = turn.tool_calls.len(),
            "Model turn complete"
        );
        Ok(turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: &str) -> String {
        format!("event: x\ndata: {json}\n\n")
    }

    #[test]
    fn sse_parser_handles_split_chunks() {
        let mut parser = SseParser::new();
        let full = event(r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"hi"}}"#);
        let (a, b) = full.split_at(25);

        assert!(parser.feed(a).is_empty());
        let events = parser.feed(b);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "content_block_delta");
    }

    #[test]
    fn sse_parser_skips_done_marker() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: [DONE]\n\n");
        assert!(events.is_empty());
    }

    #[test]
    fn accumulator_collects_text_and_usage() {
        let mut acc = TurnAccumulator::new();
        acc.apply(&serde_json::from_str(r#"{"type":"message_start","message":{"usage":{"input_tokens":12}}}"#).unwrap());
        acc.apply(&serde_json::from_str(r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hello"}}"#).unwrap());
        assert_eq!(acc.last_text.as_deref(), Some("Hello"));
        acc.apply(&serde_json::from_str(r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":" world"}}"#).unwrap());
        acc.apply(&serde_json::from_str(r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":5}}"#).unwrap());

        let turn = acc.finish();
        assert_eq!(turn.text, "Hello world");
        assert_eq!(turn.stop_reason, "end_turn");
        assert_eq!(turn.usage.input_tokens, 12);
        assert_eq!(turn.usage.output_tokens, 5);
        assert!(!turn.wants_tools());
    }

    #[test]
    fn accumulator_collects_tool_use() {
        let mut acc = TurnAccumulator::new();
        acc.apply(&serde_json::from_str(r#"{"type":"content_block_start","content_block":{"type":"tool_use","id":"tu_1","name":"web_fetch"}}"#).unwrap());
        acc.apply(&serde_json::from_str(r#"{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{\"url\":"}}"#).unwrap());
        acc.apply(&serde_json::from_str(r#"{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"\"https://example.com\"}"}}"#).unwrap());
        acc.apply(&serde_json::from_str(r#"{"type":"content_block_stop"}"#).unwrap());
        acc.apply(&serde_json::from_str(r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":9}}"#).unwrap());

        let turn = acc.finish();
        assert!(turn.wants_tools());
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].name, "web_fetch");
        assert_eq!(turn.tool_calls[0].input["url"], "https://example.com");
    }

    #[test]
    fn accumulator_tolerates_empty_tool_input() {
        let mut acc = TurnAccumulator::new();
        acc.apply(&serde_json::from_str(r#"{"type":"content_block_start","content_block":{"type":"tool_use","id":"tu_2","name":"browser_snapshot"}}"#).unwrap());
        acc.apply(&serde_json::from_str(r#"{"type":"content_block_stop"}"#).unwrap());
        let turn = acc.finish();
        assert_eq!(turn.tool_calls[0].input, json!({}));
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut parser = SseParser::new();
        let chunk = format!(
            "{}{}",
            event(r#"{"type":"a"}"#),
            event(r#"{"type":"b"}"#)
        );
        let events = parser.feed(&chunk);
        assert_eq!(events.len(), 2);
    }
}
