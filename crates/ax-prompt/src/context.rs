//! The per-turn prompt context.

use ax_types::config::{SandboxKind, SecurityProfile};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Contents of the agent's identity files, loaded by the host before the
/// turn. Missing files are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityFiles {
    /// Immutable operating rules (`AGENTS.md`).
    pub agents: Option<String>,
    /// Operator-provided first-run instructions (`BOOTSTRAP.md`).
    pub bootstrap: Option<String>,
    /// The agent's own evolving self-description (`SOUL.md`).
    pub soul: Option<String>,
    /// Mutable identity notes (`IDENTITY.md`).
    pub identity: Option<String>,
    /// Per-user notes for the current user (`users/<id>/USER.md`).
    pub user: Option<String>,
}

/// A skill available to the agent this turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillEntry {
    pub name: String,
    /// The skill's markdown body.
    pub content: String,
}

/// Everything the prompt builder may look at for one turn.
///
/// Built once per agent turn and never mutated mid-build; `now` is supplied
/// by the caller so two builds over the same context are byte-identical.
#[derive(Debug, Clone)]
pub struct PromptContext {
    /// The agent type (e.g. `"main"`).
    pub agent_type: String,
    /// The workspace path. Never rendered verbatim; modules sanitize it.
    pub workspace: PathBuf,
    /// Skills copied into the workspace for this turn.
    pub skills: Vec<SkillEntry>,
    /// The active security profile.
    pub profile: SecurityProfile,
    /// The sandbox backend in use.
    pub sandbox: SandboxKind,
    /// Current tainted ratio of the session's context.
    pub taint_ratio: f64,
    /// The profile's taint threshold.
    pub taint_threshold: f64,
    /// Identity file contents.
    pub identity: IdentityFiles,
    /// Model context window in tokens.
    pub context_window: u64,
    /// Tokens already consumed by conversation history.
    pub history_tokens: u64,
    /// First-run bootstrap mode: operator rules exist but the agent has not
    /// yet written its own identity.
    pub bootstrap_mode: bool,
    /// Free-form context notes prepared by the router (thread backfill
    /// summaries and the like).
    pub context_notes: Vec<String>,
    /// Heartbeat interval surfaced to the agent, if heartbeats are on.
    pub heartbeat_minutes: Option<u64>,
    /// Whether this turn happens in a shared channel (vs a DM).
    pub in_channel: bool,
    /// The current time, supplied by the caller.
    pub now: DateTime<Utc>,
}

impl PromptContext {
    /// A minimal context useful as a starting point in tests and tools.
    pub fn bare(agent_type: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            workspace: PathBuf::from("."),
            skills: Vec::new(),
            profile: SecurityProfile::Standard,
            sandbox: SandboxKind::Subprocess,
            taint_ratio: 0.0,
            taint_threshold: SecurityProfile::Standard.taint_threshold(),
            identity: IdentityFiles::default(),
            context_window: 200_000,
            history_tokens: 0,
            bootstrap_mode: false,
            context_notes: Vec::new(),
            heartbeat_minutes: None,
            in_channel: false,
            now: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}
