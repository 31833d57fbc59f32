//! Key-value memory entry types.

use crate::taint::{TaintTag, TrustLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in the agent's persistent memory.
///
/// The taint tag is set by the host at write time, never taken from agent
/// payloads. Entries without a tag are trusted user content (including all
/// entries that predate taint tracking).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub scope: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taint: Option<TaintTag>,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    /// The effective trust of this entry. Absence of a tag means `User`.
    pub fn trust(&self) -> TrustLevel {
        self.taint
            .as_ref()
            .map(|t| t.trust)
            .unwrap_or(TrustLevel::User)
    }

    /// Whether reading this entry re-enters the taint budget.
    pub fn is_external(&self) -> bool {
        self.trust() == TrustLevel::External
    }
}
