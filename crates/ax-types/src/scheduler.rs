//! Scheduled job types for the AX cron scheduler.

use crate::address::Delivery;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of scheduled jobs per agent.
pub const MAX_JOBS_PER_AGENT: usize = 50;

/// Maximum prompt length in characters.
const MAX_PROMPT_LEN: usize = 10_000;

/// Maximum agent id length.
const MAX_AGENT_ID_LEN: usize = 64;

/// Unique identifier for a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CronJobId(pub Uuid);

impl CronJobId {
    /// Generate a new random job id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CronJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CronJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CronJobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A scheduled job belonging to a specific agent.
///
/// When the job fires, the host spawns the agent with `prompt` as the turn
/// input, scans the output, and delivers it per `delivery`. The delivery
/// target is resolved at fire time and never derived from agent output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    /// Unique job identifier.
    pub id: CronJobId,
    /// Standard 5-field cron expression (`min hour dom month dow`).
    pub schedule: String,
    /// Owning agent.
    pub agent_id: String,
    /// The message fed to the agent when the job fires.
    pub prompt: String,
    /// Optional cap on tokens the fired turn may consume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    /// Where the output goes. Defaults to no delivery.
    #[serde(default = "default_delivery")]
    pub delivery: Delivery,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job last fired (if ever).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
}

fn default_delivery() -> Delivery {
    Delivery::None
}

impl CronJob {
    /// Validate this job's fields.
    ///
    /// `existing_count` is the number of jobs the owning agent already has.
    /// Returns `Ok(())` or a message describing the first failure.
    pub fn validate(&self, existing_count: usize) -> Result<(), String> {
        if existing_count >= MAX_JOBS_PER_AGENT {
            return Err(format!(
                "agent already has {existing_count} jobs (max {MAX_JOBS_PER_AGENT})"
            ));
        }

        if self.agent_id.is_empty() || self.agent_id.len() > MAX_AGENT_ID_LEN {
            return Err("agent_id must be 1..=64 characters".into());
        }
        if !self
            .agent_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err("agent_id may only contain [A-Za-z0-9_-]".into());
        }

        if self.prompt.is_empty() {
            return Err("prompt must not be empty".into());
        }
        if self.prompt.len() > MAX_PROMPT_LEN {
            return Err(format!(
                "prompt too long ({} chars, max {MAX_PROMPT_LEN})",
                self.prompt.len()
            ));
        }

        validate_cron_expr(&self.schedule)
    }
}

/// Basic cron expression format validation: exactly 5 whitespace-separated
/// fields of digits and `* / - , ?`. Actual matching is done by the
/// scheduler engine.
pub fn validate_cron_expr(expr: &str) -> Result<(), String> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err("cron expression must not be empty".into());
    }
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(format!(
            "cron expression must have exactly 5 fields (got {}): \"{}\"",
            fields.len(),
            trimmed
        ));
    }
    for (i, field) in fields.iter().enumerate() {
        if !field
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '*' | '/' | '-' | ',' | '?'))
        {
            return Err(format!(
                "cron field {i} contains invalid characters: \"{field}\""
            ));
        }
    }
    Ok(())
}
