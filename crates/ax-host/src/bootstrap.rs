//! The first-run bootstrap gate.
//!
//! An agent is in bootstrap mode while the operator-provided `BOOTSTRAP.md`
//! exists but the agent has not yet written its own `SOUL.md`. In that
//! state only operator-listed admin user ids may interact; everyone else
//! gets a canned reply. The admins file is re-read on every check so the
//! operator can grant access without restarting the host.

use std::path::PathBuf;

/// The canned reply for non-admins during bootstrap.
pub const BOOTSTRAP_REPLY: &str =
    "This agent is still being set up. Please check back soon.";

/// Decision for one inbound sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Not in bootstrap mode, or the sender is an admin.
    Allow,
    /// Bootstrap mode and the sender is not an admin.
    Deny,
}

/// Per-agent bootstrap gate over the agents directory.
pub struct BootstrapGate {
    agents_dir: PathBuf,
}

impl BootstrapGate {
    pub fn new(agents_dir: PathBuf) -> Self {
        Self { agents_dir }
    }

    /// Whether the agent is currently in bootstrap mode.
    pub fn is_bootstrap(&self, agent_id: &str) -> bool {
        let dir = self.agents_dir.join(agent_id);
        dir.join("BOOTSTRAP.md").exists() && !dir.join("SOUL.md").exists()
    }

    /// Admin user ids, freshly read from the `admins` file (one per line,
    /// `#` comments allowed).
    pub fn admins(&self, agent_id: &str) -> Vec<String> {
        let path = self.agents_dir.join(agent_id).join("admins");
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect()
    }

    /// Gate one sender. `user_id` is `None` for the local CLI, which is
    /// always the operator.
    pub fn check(&self, agent_id: &str, user_id: Option<&str>) -> GateDecision {
        if !self.is_bootstrap(agent_id) {
            return GateDecision::Allow;
        }
        match user_id {
            None => GateDecision::Allow,
            Some(user) => {
                if self.admins(agent_id).iter().any(|a| a == user) {
                    GateDecision::Allow
                } else {
                    GateDecision::Deny
                }
            }
        }
    }
}
