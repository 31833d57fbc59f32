//! The stdin payload from the host.

use ax_types::message::ChatMessage;
use serde::{Deserialize, Serialize};

/// Taint context the host forwards so the prompt can surface it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaintState {
    pub ratio: f64,
    pub threshold: f64,
}

/// One agent turn, as fed over stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInput {
    /// The user message for this turn.
    pub message: String,
    /// Bounded prior history.
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    /// Session taint context, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taint_state: Option<TaintState>,
}

impl AgentInput {
    /// Parse stdin. JSON payloads are the normal path; anything that is not
    /// a JSON object is treated as a plain-text message for backward
    /// compatibility.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            if let Ok(input) = serde_json::from_str::<AgentInput>(trimmed) {
                return input;
            }
        }
        Self {
            message: trimmed.to_string(),
            history: Vec::new(),
            taint_state: None,
        }
    }
}
