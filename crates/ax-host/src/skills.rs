//! Skill self-authoring: screening, installation, and the review queue.
//!
//! `skill_propose` is decided host-side by pattern matching. A hard-reject
//! list (shell execution, eval, base64 decoding, dangerous process
//! controls, direct network calls) rejects outright; a capability list
//! (filesystem writes, env access, crypto, subprocess) routes to human
//! review; everything else is auto-approved, written into the skills
//! directory, and recorded in the commit log so it becomes visible the
//! next time the host re-copies skills into a workspace.

use ax_types::skill::SkillVerdict;
use ax_types::{AxError, AxResult};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// A pattern with the reason shown in audit detail.
struct ScreenPattern {
    pattern: Regex,
    reason: &'static str,
}

/// The skill screener.
pub struct SkillScreener {
    hard_reject: Vec<ScreenPattern>,
    needs_review: Vec<ScreenPattern>,
}

/// Screening outcome with the matched reason for the audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenResult {
    pub verdict: SkillVerdict,
    pub reason: Option<&'static str>,
}

impl SkillScreener {
    pub fn new() -> Self {
        let p = |pattern: &str, reason| ScreenPattern {
            pattern: Regex::new(pattern).expect("builtin pattern compiles"),
            reason,
        };
        let hard_reject = vec![
            p(r"(?i)\b(?:ba)?sh\s+-c\b", "shell execution"),
            p(r"(?i)\bexec\s*\(", "dynamic exec"),
            p(r"(?i)\beval\b", "dynamic eval"),
            p(r"(?i)base64\s+(-d|--decode)", "base64 decoding"),
            p(r"(?i)\bb64decode\b", "base64 decoding"),
            p(r"(?i)\b(kill(all)?|pkill)\b", "process control"),
            p(r"(?i)\b(curl|wget|nc|ncat|socat)\b", "direct network call"),
            p(r"(?i)\brequests\.(get|post)\b", "direct network call"),
            p(r"(?i)\bfetch\s*\(", "direct network call"),
            p(r"/dev/tcp", "raw socket"),
        ];
        let needs_review = vec![
            p(r#"(?i)\b(open|write|create)\s*\(.*['"]w"#, "filesystem write"),
            p(r"(?i)\bfs\.(write|append|unlink|rm)", "filesystem write"),
            p(r"(?i)\bos\.environ\b", "environment access"),
            p(r"(?i)\bprocess\.env\b", "environment access"),
            p(r"(?i)\bgetenv\b", "environment access"),
            p(r"(?i)\b(crypto|cipher|aes|rsa)\b", "cryptography"),
            p(r"(?i)\bsubprocess\b", "subprocess use"),
        ];
        Self {
            hard_reject,
            needs_review,
        }
    }

    /// Screen a proposed skill body.
    pub fn screen(&self, content: &str) -> ScreenResult {
        for pattern in &self.hard_reject {
            if pattern.pattern.is_match(content) {
                return ScreenResult {
                    verdict: SkillVerdict::Reject,
                    reason: Some(pattern.reason),
                };
            }
        }
        for pattern in &self.needs_review {
            if pattern.pattern.is_match(content) {
                return ScreenResult {
                    verdict: SkillVerdict::NeedsReview,
                    reason: Some(pattern.reason),
                };
            }
        }
        ScreenResult {
            verdict: SkillVerdict::AutoApprove,
            reason: None,
        }
    }
}

impl Default for SkillScreener {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Skill store
// ---------------------------------------------------------------------------

/// A proposal waiting for human review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSkill {
    pub name: String,
    pub description: String,
    pub content: String,
    pub reason: String,
    pub proposed_at: chrono::DateTime<Utc>,
    pub session_id: String,
}

/// Directory-backed skill store with a commit log and review queue.
pub struct SkillStore {
    dir: PathBuf,
}

impl SkillStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Install an approved skill and append to the commit log. The skill
    /// becomes visible in the NEXT turn, when skills are re-copied into
    /// the workspace.
    pub fn install(&self, name: &str, content: &str) -> AxResult<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| AxError::Internal(format!("create skills dir: {e}")))?;
        let path = self.dir.join(format!("{name}.md"));
        std::fs::write(&path, content)
            .map_err(|e| AxError::Internal(format!("write skill: {e}")))?;

        let log_line = format!("{} install {name}\n", Utc::now().to_rfc3339());
        let log_path = self.dir.join(".commits");
        let mut log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| AxError::Internal(format!("open commit log: {e}")))?;
        use std::io::Write;
        log.write_all(log_line.as_bytes())
            .map_err(|e| AxError::Internal(format!("append commit log: {e}")))?;

        info!(name, "Skill installed");
        Ok(())
    }

    /// List installed skill names.
    pub fn list(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("md") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        names.push(stem.to_string());
                    }
                }
            }
        }
        names.sort();
        names
    }

    /// Read one installed skill.
    pub fn read(&self, name: &str) -> AxResult<String> {
        std::fs::read_to_string(self.dir.join(format!("{name}.md")))
            .map_err(|_| AxError::NotFound(format!("skill {name}")))
    }

    /// Queue a proposal for human review.
    pub fn queue_for_review(&self, pending: &PendingSkill) -> AxResult<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| AxError::Internal(format!("create skills dir: {e}")))?;
        let path = self.dir.join(".review-queue.json");
        let mut queue = self.review_queue();
        queue.retain(|p| p.name != pending.name);
        queue.push(pending.clone());
        let data = serde_json::to_string_pretty(&queue)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data).map_err(|e| AxError::Internal(format!("write queue: {e}")))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| AxError::Internal(format!("rename queue: {e}")))?;
        Ok(())
    }

    /// The current review queue.
    pub fn review_queue(&self) -> Vec<PendingSkill> {
        let path = self.dir.join(".review-queue.json");
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default()
    }
}
