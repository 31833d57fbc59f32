//! Workspace taint sidecar.
//!
//! Persistent workspaces carry a `.ax-taint.json` file listing which files
//! were modified by a tainted session. A JSON sidecar (rather than extended
//! attributes) is portable, inspectable, safe to expose inside the sandbox,
//! and survives container image exports.
//!
//! Before an agent runs, the host pre-seeds the session's taint budget with
//! the estimated token weight of every tainted file. After a tainted
//! session exits, files modified since agent start are merged into the
//! sidecar.

use crate::budget::TaintBudget;
use ax_types::taint::TaintTag;
use ax_types::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Sidecar file name inside a persistent workspace.
pub const SIDECAR_FILE: &str = ".ax-taint.json";

/// One tainted file in a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceTaintEntry {
    /// Path relative to the workspace root.
    pub path: String,
    /// Provenance of the taint.
    pub taint: TaintTag,
    /// The session that modified the file.
    pub session_id: String,
    /// When the entry was recorded.
    pub written_at: DateTime<Utc>,
}

/// Read the sidecar for a workspace.
///
/// A missing sidecar means a clean workspace. A corrupted sidecar also
/// means clean: a sensible local default exists (treat as clean) and the
/// condition is logged rather than propagated.
pub fn read_sidecar(workspace: &Path) -> Vec<WorkspaceTaintEntry> {
    let path = workspace.join(SIDECAR_FILE);
    let data = match std::fs::read_to_string(&path) {
        Ok(d) => d,
        Err(_) => return Vec::new(),
    };
    match serde_json::from_str(&data) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Corrupted taint sidecar, treating workspace as clean"
            );
            Vec::new()
        }
    }
}

/// Write the sidecar atomically (write to `.tmp`, then rename).
pub fn write_sidecar(workspace: &Path, entries: &[WorkspaceTaintEntry]) -> std::io::Result<()> {
    let path = workspace.join(SIDECAR_FILE);
    let tmp = workspace.join(format!("{SIDECAR_FILE}.tmp"));
    let data = serde_json::to_string_pretty(entries).map_err(std::io::Error::other)?;
    std::fs::write(&tmp, data.as_bytes())?;
    std::fs::rename(&tmp, &path)?;
    debug!(count = entries.len(), path = %path.display(), "Persisted taint sidecar");
    Ok(())
}

/// Pre-seed the session's budget with the estimated token weight of every
/// tainted file recorded in the sidecar. Returns the number of files seeded.
pub fn preseed_budget(workspace: &Path, budget: &TaintBudget, session: &SessionId) -> usize {
    let entries = read_sidecar(workspace);
    let mut seeded = 0;
    for entry in &entries {
        let file_path = match ax_types::path::safe_join(workspace, &entry.path) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %entry.path, error = %e, "Skipping sidecar entry with unsafe path");
                continue;
            }
        };
        let len = match std::fs::metadata(&file_path) {
            Ok(m) => m.len(),
            Err(_) => continue, // file was deleted since the entry was written
        };
        budget.record_tokens(session, len.div_ceil(4), true);
        seeded += 1;
    }
    seeded
}

/// Find workspace files modified at or after `since`, as relative paths.
///
/// The sidecar itself is excluded. Walks the tree depth-first; unreadable
/// entries are skipped.
pub fn scan_modified(workspace: &Path, since: std::time::SystemTime) -> Vec<String> {
    let mut modified = Vec::new();
    let mut stack = vec![workspace.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(_) => continue,
        };
        for entry in read_dir.flatten() {
            let path = entry.path();
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            if meta.is_dir() {
                stack.push(path);
                continue;
            }
            let rel = match path.strip_prefix(workspace) {
                Ok(r) => r.to_string_lossy().to_string(),
                Err(_) => continue,
            };
            if rel == SIDECAR_FILE || rel == format!("{SIDECAR_FILE}.tmp") {
                continue;
            }
            if let Ok(mtime) = meta.modified() {
                if mtime >= since {
                    modified.push(rel);
                }
            }
        }
    }

    modified.sort();
    modified
}

/// Merge newly tainted files into the sidecar, replacing any existing entry
/// for the same relative path.
pub fn mark_tainted(
    workspace: &Path,
    paths: &[String],
    tag: &TaintTag,
    session: &SessionId,
) -> std::io::Result<usize> {
    if paths.is_empty() {
        return Ok(0);
    }
    let mut entries = read_sidecar(workspace);
    let now = Utc::now();
    for path in paths {
        entries.retain(|e| &e.path != path);
        entries.push(WorkspaceTaintEntry {
            path: path.clone(),
            taint: tag.clone(),
            session_id: session.to_string(),
            written_at: now,
        });
    }
    write_sidecar(workspace, &entries)?;
    Ok(paths.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag() -> TaintTag {
        TaintTag::external("web_fetch")
    }

    #[test]
    fn missing_sidecar_is_clean() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(read_sidecar(tmp.path()).is_empty());
    }

    #[test]
    fn corrupted_sidecar_is_clean() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(SIDECAR_FILE), "{not json").unwrap();
        assert!(read_sidecar(tmp.path()).is_empty());
    }

    #[test]
    fn write_read_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let session = SessionId::generate();
        let entries = vec![WorkspaceTaintEntry {
            path: "notes/fetched.md".into(),
            taint: tag(),
            session_id: session.to_string(),
            written_at: Utc::now(),
        }];
        write_sidecar(tmp.path(), &entries).unwrap();
        let back = read_sidecar(tmp.path());
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].path, "notes/fetched.md");
        assert_eq!(back[0].taint.source, "web_fetch");
    }

    #[test]
    fn preseed_counts_tainted_file_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let session = SessionId::generate();
        std::fs::write(tmp.path().join("big.txt"), "z".repeat(4000)).unwrap();

        mark_tainted(tmp.path(), &["big.txt".into()], &tag(), &session).unwrap();

        let budget = TaintBudget::new();
        let fresh = SessionId::generate();
        let seeded = preseed_budget(tmp.path(), &budget, &fresh);
        assert_eq!(seeded, 1);
        assert_eq!(budget.totals(&fresh).tainted_tokens, 1000);
        assert!((budget.ratio(&fresh) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn preseed_skips_deleted_files() {
        let tmp = tempfile::tempdir().unwrap();
        let session = SessionId::generate();
        mark_tainted(tmp.path(), &["gone.txt".into()], &tag(), &session).unwrap();

        let budget = TaintBudget::new();
        let seeded = preseed_budget(tmp.path(), &budget, &session);
        assert_eq!(seeded, 0);
        assert_eq!(budget.totals(&session).total_tokens, 0);
    }

    #[test]
    fn preseed_skips_traversal_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let session = SessionId::generate();
        // A forged sidecar entry pointing outside the workspace must not be
        // followed.
        let entries = vec![WorkspaceTaintEntry {
            path: "../../etc/passwd".into(),
            taint: tag(),
            session_id: session.to_string(),
            written_at: Utc::now(),
        }];
        write_sidecar(tmp.path(), &entries).unwrap();

        let budget = TaintBudget::new();
        assert_eq!(preseed_budget(tmp.path(), &budget, &session), 0);
    }

    #[test]
    fn scan_finds_modified_files_excluding_sidecar() {
        let tmp = tempfile::tempdir().unwrap();
        let since = std::time::SystemTime::now() - std::time::Duration::from_secs(60);

        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("a.txt"), "one").unwrap();
        std::fs::write(tmp.path().join("sub/b.txt"), "two").unwrap();
        write_sidecar(tmp.path(), &[]).unwrap();

        let modified = scan_modified(tmp.path(), since);
        assert_eq!(modified, vec!["a.txt".to_string(), "sub/b.txt".to_string()]);
    }

    #[test]
    fn mark_tainted_replaces_existing_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let session = SessionId::generate();
        mark_tainted(tmp.path(), &["a.txt".into()], &tag(), &session).unwrap();
        mark_tainted(
            tmp.path(),
            &["a.txt".into()],
            &TaintTag::external("browser_snapshot"),
            &session,
        )
        .unwrap();

        let entries = read_sidecar(tmp.path());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].taint.source, "browser_snapshot");
    }
}
