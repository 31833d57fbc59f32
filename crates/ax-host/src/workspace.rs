//! Per-session workspace management.
//!
//! Workspaces live under the host-chosen root, keyed by session UUID; the
//! agent never supplies a workspace path. Skills are re-copied into the
//! workspace before every turn so an auto-approved skill becomes visible on
//! the next turn. Persistent workspaces carry the taint sidecar.

use ax_taint::TaintBudget;
use ax_types::taint::TaintTag;
use ax_types::{AxError, AxResult, SessionId};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Manages workspace directories under one root.
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The workspace directory for a session, created on demand.
    ///
    /// The path is derived only from the validated session id, so it cannot
    /// point outside the root.
    pub fn ensure(&self, session: &SessionId) -> AxResult<PathBuf> {
        let path = self.root.join(session.as_str());
        std::fs::create_dir_all(&path)
            .map_err(|e| AxError::Internal(format!("create workspace: {e}")))?;
        Ok(path)
    }

    /// Copy identity files into the workspace so the agent can read them.
    pub fn copy_identity(&self, agent_dir: &Path, workspace: &Path) -> AxResult<()> {
        for name in ["AGENTS.md", "BOOTSTRAP.md", "SOUL.md", "IDENTITY.md", "USER.md"] {
            let src = agent_dir.join(name);
            if src.exists() {
                std::fs::copy(&src, workspace.join(name))
                    .map_err(|e| AxError::Internal(format!("copy {name}: {e}")))?;
            }
        }
        Ok(())
    }

    /// (Re-)copy the agent's skills directory into the workspace.
    pub fn copy_skills(&self, skills_src: &Path, workspace: &Path) -> AxResult<usize> {
        let dest = workspace.join("skills");
        std::fs::create_dir_all(&dest)
            .map_err(|e| AxError::Internal(format!("create skills dir: {e}")))?;

        let entries = match std::fs::read_dir(skills_src) {
            Ok(e) => e,
            Err(_) => return Ok(0), // no skills yet
        };

        let mut copied = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("md") {
                let name = entry.file_name();
                if std::fs::copy(&path, dest.join(&name)).is_ok() {
                    copied += 1;
                }
            }
        }
        debug!(copied, "Skills copied into workspace");
        Ok(copied)
    }

    /// Pre-seed the session budget from the workspace sidecar.
    pub fn preseed_taint(&self, workspace: &Path, budget: &TaintBudget, session: &SessionId) {
        let seeded = ax_taint::preseed_budget(workspace, budget, session);
        if seeded > 0 {
            debug!(seeded, session = %session, "Pre-seeded taint budget from sidecar");
        }
    }

    /// After a tainted session exits, mark files modified since agent start
    /// in the sidecar.
    pub fn post_scan(
        &self,
        workspace: &Path,
        since: SystemTime,
        tag: &TaintTag,
        session: &SessionId,
    ) -> usize {
        let modified = ax_taint::scan_modified(workspace, since);
        if modified.is_empty() {
            return 0;
        }
        match ax_taint::sidecar::mark_tainted(workspace, &modified, tag, session) {
            Ok(count) => {
                debug!(count, session = %session, "Marked tainted workspace files");
                count
            }
            Err(e) => {
                warn!(error = %e, "Failed to update taint sidecar");
                0
            }
        }
    }
}
