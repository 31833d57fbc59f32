//! Configuration types for the AX host.
//!
//! Loaded from `<root>/ax.yaml`. Unknown keys are rejected so a typo in the
//! config fails loudly at startup instead of silently falling back to a
//! default.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Security profile selecting the taint-budget threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityProfile {
    Paranoid,
    Standard,
    PowerUser,
}

impl SecurityProfile {
    /// The taint ratio above which sensitive actions are blocked.
    pub fn taint_threshold(&self) -> f64 {
        match self {
            SecurityProfile::Paranoid => 0.10,
            SecurityProfile::Standard => 0.30,
            SecurityProfile::PowerUser => 0.60,
        }
    }
}

impl Default for SecurityProfile {
    fn default() -> Self {
        SecurityProfile::Standard
    }
}

impl std::fmt::Display for SecurityProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityProfile::Paranoid => write!(f, "paranoid"),
            SecurityProfile::Standard => write!(f, "standard"),
            SecurityProfile::PowerUser => write!(f, "power-user"),
        }
    }
}

/// Which provider implementation backs each pluggable concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProviderSelectors {
    pub llm: String,
    pub memory: String,
    pub scanner: String,
    pub channels: Vec<String>,
    pub web: String,
    pub browser: String,
    pub credentials: String,
    pub skills: String,
    pub audit: String,
    pub sandbox: SandboxKind,
    pub scheduler: String,
}

impl Default for ProviderSelectors {
    fn default() -> Self {
        Self {
            llm: "anthropic".into(),
            memory: "sqlite".into(),
            scanner: "builtin".into(),
            channels: Vec::new(),
            web: "builtin".into(),
            browser: "builtin".into(),
            credentials: "env".into(),
            skills: "dir".into(),
            audit: "ndjson".into(),
            sandbox: SandboxKind::Subprocess,
            scheduler: "builtin".into(),
        }
    }
}

/// The isolation backend used to run the agent process.
///
/// A closed set: selecting a backend is a configuration decision, not a
/// plugin point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxKind {
    /// Plain subprocess with a scrubbed environment.
    Subprocess,
    /// macOS sandbox-exec profile.
    Seatbelt,
    /// Linux nsjail.
    Nsjail,
    /// Docker container.
    Docker,
}

impl std::fmt::Display for SandboxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxKind::Subprocess => write!(f, "subprocess"),
            SandboxKind::Seatbelt => write!(f, "seatbelt"),
            SandboxKind::Nsjail => write!(f, "nsjail"),
            SandboxKind::Docker => write!(f, "docker"),
        }
    }
}

/// Resource limits applied to each sandbox spawn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SandboxLimits {
    /// Wall-clock timeout for one agent turn, in seconds.
    pub timeout_secs: u64,
    /// Memory cap in megabytes (enforced by container backends).
    pub memory_mb: u64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            memory_mb: 1024,
        }
    }
}

/// History bounds for context preparation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HistoryConfig {
    /// Maximum prior turns loaded for a persistent session.
    pub max_turns: usize,
    /// Prior messages backfilled on first participation in a thread.
    pub thread_context_turns: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_turns: 40,
            thread_context_turns: 10,
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerConfig {
    /// Local hours (0-23, inclusive start, exclusive end) during which
    /// scheduled jobs may fire. `None` means always active.
    pub active_hours: Option<(u8, u8)>,
    /// Global per-fire token cap applied when a job has no cap of its own.
    pub max_token_budget: Option<u64>,
    /// Heartbeat interval in minutes (surfaced to the agent's prompt).
    pub heartbeat_minutes: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            active_hours: None,
            max_token_budget: None,
            heartbeat_minutes: 30,
        }
    }
}

/// Root configuration, deserialized from `ax.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AxConfig {
    /// Security profile mapping to a taint threshold.
    pub profile: SecurityProfile,
    /// Provider selectors.
    pub providers: ProviderSelectors,
    /// Sandbox resource limits.
    pub sandbox_limits: SandboxLimits,
    /// History bounds.
    pub history: HistoryConfig,
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// State root. Defaults to `~/.ax` (resolved by the loader).
    pub state_root: Option<PathBuf>,
}
