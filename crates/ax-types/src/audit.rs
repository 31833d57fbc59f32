//! Audit record types.
//!
//! Every side-effectful action crossing the trust boundary is recorded as an
//! [`AuditRecord`]. The log itself is append-only and host-owned; the
//! sandboxed agent can query it (read-only, filtered) but never write it.

use crate::taint::TaintTag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Blocked,
    Error,
}

impl std::fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditStatus::Success => write!(f, "success"),
            AuditStatus::Blocked => write!(f, "blocked"),
            AuditStatus::Error => write!(f, "error"),
        }
    }
}

/// One entry in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// When the action completed.
    pub timestamp: DateTime<Utc>,
    /// The session the action ran under.
    pub session_id: String,
    /// The agent the session belongs to.
    pub agent_id: String,
    /// The action name (e.g. `"memory_write"`).
    pub action: String,
    /// Summary of the validated arguments. Never includes credentials or
    /// full free-form content.
    pub args_summary: String,
    /// Result status.
    pub status: AuditStatus,
    /// Wall-clock duration of the handler.
    pub duration_ms: u64,
    /// The session's taint tag at the time of the call, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taint: Option<TaintTag>,
    /// Detailed reason. For policy denials this is where the real reason
    /// lives; the caller only ever sees an opaque code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Filter for audit queries. All fields are conjunctive; `None` matches all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AuditStatus>,
    /// Maximum number of entries to return (newest first). Bounded by the
    /// server; defaults to 100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl AuditFilter {
    /// Whether a record passes this filter.
    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(sid) = &self.session_id {
            if &record.session_id != sid {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if &record.action != action {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        true
    }
}
