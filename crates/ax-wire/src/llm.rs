//! Model response stream items carried over `llm_call`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One item in the ordered chunk list of an `llm_call` reply.
///
/// A reply is zero or more `text_delta`/`tool_use` chunks followed by a
/// terminal `done` carrying token counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmChunk {
    /// A piece of assistant text.
    TextDelta { text: String },
    /// A complete tool invocation request from the model.
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// Terminal chunk with usage.
    Done {
        input_tokens: u64,
        output_tokens: u64,
    },
}

impl LlmChunk {
    /// Whether this is the terminal chunk.
    pub fn is_done(&self) -> bool {
        matches!(self, LlmChunk::Done { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tagged_serde() {
        let chunk = LlmChunk::TextDelta {
            text: "hi".into(),
        };
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains("\"type\":\"text_delta\""));
    }

    #[test]
    fn tool_use_roundtrip() {
        let chunk = LlmChunk::ToolUse {
            id: "tu_1".into(),
            name: "web_fetch".into(),
            input: json!({"url": "https://example.com"}),
        };
        let back: LlmChunk = serde_json::from_str(&serde_json::to_string(&chunk).unwrap()).unwrap();
        assert_eq!(chunk, back);
    }

    #[test]
    fn done_is_terminal() {
        assert!(LlmChunk::Done {
            input_tokens: 10,
            output_tokens: 4
        }
        .is_done());
        assert!(!LlmChunk::TextDelta { text: "x".into() }.is_done());
    }
}
