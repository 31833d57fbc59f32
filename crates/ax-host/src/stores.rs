//! Host persistence: conversations, memory, and live session state.
//!
//! The conversation and memory stores are SQLite (one file each under
//! `data/`); the session store is in-memory because sessions do not survive
//! a host restart unless their workspace is persistent.

use ax_types::address::SessionAddress;
use ax_types::memory::MemoryEntry;
use ax_types::message::{Role, TokenUsage};
use ax_types::taint::TaintTag;
use ax_types::{AxError, AxResult, SessionId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ConversationStore
// ---------------------------------------------------------------------------

/// One stored conversation turn.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTurn {
    pub role: Role,
    pub content: String,
    pub tainted: bool,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed conversation store for persistent sessions.
pub struct ConversationStore {
    conn: Mutex<Connection>,
}

impl ConversationStore {
    /// Open (and migrate) the conversations database.
    pub fn open(path: &Path) -> AxResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| AxError::Internal(format!("open conversations db: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                tainted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_turns_session ON turns(session_id, id);",
        )
        .map_err(|e| AxError::Internal(format!("migrate conversations db: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> AxResult<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Append one turn. Assistant turns from tainted sessions are stored
    /// with the taint flag so later memorization inherits it.
    pub fn append(
        &self,
        session: &SessionId,
        role: Role,
        content: &str,
        tainted: bool,
    ) -> AxResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO turns (session_id, role, content, tainted, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.as_str(),
                role.to_string(),
                content,
                tainted as i64,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| AxError::Internal(format!("append turn: {e}")))?;
        Ok(())
    }

    /// The most recent `max_turns` turns, oldest first.
    pub fn recent(&self, session: &SessionId, max_turns: usize) -> AxResult<Vec<StoredTurn>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn
            .prepare(
                "SELECT role, content, tainted, created_at FROM turns
                 WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(|e| AxError::Internal(format!("prepare recent: {e}")))?;

        let mut turns: Vec<StoredTurn> = stmt
            .query_map(params![session.as_str(), max_turns as i64], |row| {
                let role: String = row.get(0)?;
                let content: String = row.get(1)?;
                let tainted: i64 = row.get(2)?;
                let created_at: String = row.get(3)?;
                Ok(StoredTurn {
                    role: parse_role(&role),
                    content,
                    tainted: tainted != 0,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|t| t.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .map_err(|e| AxError::Internal(format!("query recent: {e}")))?
            .filter_map(Result::ok)
            .collect();

        turns.reverse();
        Ok(turns)
    }
}

fn parse_role(s: &str) -> Role {
    match s {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// SQLite-backed key-value memory with host-stamped taint.
pub struct MemoryStore {
    conn: Mutex<Connection>,
}

impl MemoryStore {
    pub fn open(path: &Path) -> AxResult<Self> {
        let conn =
            Connection::open(path).map_err(|e| AxError::Internal(format!("open memory db: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entries (
                id TEXT PRIMARY KEY,
                scope TEXT NOT NULL,
                content TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                taint TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_entries_scope ON entries(scope);",
        )
        .map_err(|e| AxError::Internal(format!("migrate memory db: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> AxResult<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Insert an entry. The taint tag comes from the host's tracker, never
    /// from the agent payload.
    pub fn write(
        &self,
        scope: &str,
        content: &str,
        tags: &[String],
        taint: Option<TaintTag>,
    ) -> AxResult<String> {
        let id = Uuid::new_v4().to_string();
        let taint_json = match &taint {
            Some(tag) => Some(serde_json::to_string(tag)?),
            None => None,
        };
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO entries (id, scope, content, tags, taint, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                scope,
                content,
                serde_json::to_string(tags)?,
                taint_json,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| AxError::Internal(format!("memory write: {e}")))?;
        Ok(id)
    }

    pub fn read(&self, id: &str) -> AxResult<MemoryEntry> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn
            .prepare("SELECT id, scope, content, tags, taint, created_at FROM entries WHERE id = ?1")
            .map_err(|e| AxError::Internal(format!("prepare read: {e}")))?;
        let entry = stmt
            .query_row(params![id], row_to_entry)
            .map_err(|_| AxError::NotFound(format!("memory entry {id}")))?;
        Ok(entry)
    }

    /// Substring search over content, optionally scoped.
    pub fn query(
        &self,
        scope: Option<&str>,
        needle: &str,
        limit: usize,
    ) -> AxResult<Vec<MemoryEntry>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let pattern = format!("%{}%", needle.replace('%', "\\%").replace('_', "\\_"));
        let mut entries = Vec::new();
        match scope {
            Some(scope) => {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, scope, content, tags, taint, created_at FROM entries
                         WHERE scope = ?1 AND content LIKE ?2 ESCAPE '\\'
                         ORDER BY created_at DESC LIMIT ?3",
                    )
                    .map_err(|e| AxError::Internal(format!("prepare query: {e}")))?;
                let rows = stmt
                    .query_map(params![scope, pattern, limit as i64], row_to_entry)
                    .map_err(|e| AxError::Internal(format!("memory query: {e}")))?;
                entries.extend(rows.filter_map(Result::ok));
            }
            None => {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, scope, content, tags, taint, created_at FROM entries
                         WHERE content LIKE ?1 ESCAPE '\\'
                         ORDER BY created_at DESC LIMIT ?2",
                    )
                    .map_err(|e| AxError::Internal(format!("prepare query: {e}")))?;
                let rows = stmt
                    .query_map(params![pattern, limit as i64], row_to_entry)
                    .map_err(|e| AxError::Internal(format!("memory query: {e}")))?;
                entries.extend(rows.filter_map(Result::ok));
            }
        }
        Ok(entries)
    }

    pub fn delete(&self, id: &str) -> AxResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let changed = conn
            .execute("DELETE FROM entries WHERE id = ?1", params![id])
            .map_err(|e| AxError::Internal(format!("memory delete: {e}")))?;
        if changed == 0 {
            return Err(AxError::NotFound(format!("memory entry {id}")));
        }
        Ok(())
    }

    pub fn list(&self, scope: Option<&str>, limit: usize) -> AxResult<Vec<MemoryEntry>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = Vec::new();
        match scope {
            Some(scope) => {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, scope, content, tags, taint, created_at FROM entries
                         WHERE scope = ?1 ORDER BY created_at DESC LIMIT ?2",
                    )
                    .map_err(|e| AxError::Internal(format!("prepare list: {e}")))?;
                let rows = stmt
                    .query_map(params![scope, limit as i64], row_to_entry)
                    .map_err(|e| AxError::Internal(format!("memory list: {e}")))?;
                entries.extend(rows.filter_map(Result::ok));
            }
            None => {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, scope, content, tags, taint, created_at FROM entries
                         ORDER BY created_at DESC LIMIT ?1",
                    )
                    .map_err(|e| AxError::Internal(format!("prepare list: {e}")))?;
                let rows = stmt
                    .query_map(params![limit as i64], row_to_entry)
                    .map_err(|e| AxError::Internal(format!("memory list: {e}")))?;
                entries.extend(rows.filter_map(Result::ok));
            }
        }
        Ok(entries)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEntry> {
    let tags_json: String = row.get(3)?;
    let taint_json: Option<String> = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok(MemoryEntry {
        id: row.get(0)?,
        scope: row.get(1)?,
        content: row.get(2)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        taint: taint_json.and_then(|t| serde_json::from_str(&t).ok()),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Live state for one session.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub agent_id: String,
    /// The inbound canary token. Router-only; never sent to the model.
    pub canary: String,
    pub created_at: DateTime<Utc>,
    /// Set when the outbound scanner caught a canary leak.
    pub compromised: bool,
    pub usage: TokenUsage,
}

/// In-memory session registry plus per-agent last-channel tracking.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Session>,
    last_channel: DashMap<String, SessionAddress>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or create the session, minting its canary on first use.
    pub fn get_or_create(
        &self,
        session_id: &SessionId,
        agent_id: &str,
        mint_canary: impl FnOnce() -> String,
    ) -> Session {
        self.sessions
            .entry(session_id.clone())
            .or_insert_with(|| Session {
                session_id: session_id.clone(),
                agent_id: agent_id.to_string(),
                canary: mint_canary(),
                created_at: Utc::now(),
                compromised: false,
                usage: TokenUsage::default(),
            })
            .clone()
    }

    pub fn get(&self, session_id: &SessionId) -> Option<Session> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    pub fn mark_compromised(&self, session_id: &SessionId) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.compromised = true;
        }
    }

    pub fn record_usage(&self, session_id: &SessionId, usage: TokenUsage) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.usage.add(usage);
        }
    }

    /// Remember the agent's most recent channel interaction for `"last"`
    /// delivery resolution.
    pub fn record_channel_interaction(&self, agent_id: &str, address: SessionAddress) {
        self.last_channel.insert(agent_id.to_string(), address);
    }

    pub fn last_channel(&self, agent_id: &str) -> Option<SessionAddress> {
        self.last_channel.get(agent_id).map(|a| a.clone())
    }

    pub fn end_session(&self, session_id: &SessionId) {
        self.sessions.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_append_and_bounded_recent() {
        let store = ConversationStore::in_memory().unwrap();
        let session = SessionId::generate();
        for i in 0..10 {
            store
                .append(&session, Role::User, &format!("msg {i}"), false)
                .unwrap();
        }
        let recent = store.recent(&session, 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "msg 7");
        assert_eq!(recent[2].content, "msg 9");
    }

    #[test]
    fn conversation_taint_flag_round_trips() {
        let store = ConversationStore::in_memory().unwrap();
        let session = SessionId::generate();
        store
            .append(&session, Role::Assistant, "from tainted turn", true)
            .unwrap();
        let recent = store.recent(&session, 10).unwrap();
        assert!(recent[0].tainted);
        assert_eq!(recent[0].role, Role::Assistant);
    }

    #[test]
    fn conversations_are_per_session() {
        let store = ConversationStore::in_memory().unwrap();
        let a = SessionId::generate();
        let b = SessionId::generate();
        store.append(&a, Role::User, "for a", false).unwrap();
        assert!(store.recent(&b, 10).unwrap().is_empty());
    }

    #[test]
    fn memory_write_read_roundtrip_with_taint() {
        let store = MemoryStore::in_memory().unwrap();
        let id = store
            .write(
                "notes",
                "fetched text",
                &["web".into()],
                Some(TaintTag::external("web_fetch")),
            )
            .unwrap();
        let entry = store.read(&id).unwrap();
        assert_eq!(entry.scope, "notes");
        assert!(entry.is_external());
        assert_eq!(entry.taint.unwrap().source, "web_fetch");
        assert_eq!(entry.tags, vec!["web".to_string()]);
    }

    #[test]
    fn memory_untagged_write_reads_clean() {
        let store = MemoryStore::in_memory().unwrap();
        let id = store.write("notes", "clean", &[], None).unwrap();
        assert!(!store.read(&id).unwrap().is_external());
    }

    #[test]
    fn memory_query_matches_substring_and_scope() {
        let store = MemoryStore::in_memory().unwrap();
        store.write("notes", "rust is fast", &[], None).unwrap();
        store.write("notes", "python is slow", &[], None).unwrap();
        store.write("other", "rust again", &[], None).unwrap();

        let hits = store.query(Some("notes"), "rust", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "rust is fast");

        let all = store.query(None, "rust", 10).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn memory_delete_missing_is_not_found() {
        let store = MemoryStore::in_memory().unwrap();
        assert!(matches!(
            store.delete("nope"),
            Err(AxError::NotFound(_))
        ));
    }

    #[test]
    fn session_canary_minted_once() {
        let store = SessionStore::new();
        let id = SessionId::generate();
        let first = store.get_or_create(&id, "main", || "canary-1".into());
        let second = store.get_or_create(&id, "main", || "canary-2".into());
        assert_eq!(first.canary, "canary-1");
        assert_eq!(second.canary, "canary-1");
    }

    #[test]
    fn compromised_flag_sticks() {
        let store = SessionStore::new();
        let id = SessionId::generate();
        store.get_or_create(&id, "main", || "c".into());
        store.mark_compromised(&id);
        assert!(store.get(&id).unwrap().compromised);
    }

    #[test]
    fn last_channel_tracks_most_recent() {
        let store = SessionStore::new();
        assert!(store.last_channel("main").is_none());
        store.record_channel_interaction("main", SessionAddress::dm("slack", "U1"));
        store.record_channel_interaction("main", SessionAddress::dm("slack", "U2"));
        let last = store.last_channel("main").unwrap();
        assert_eq!(last.ids.peer.as_deref(), Some("U2"));
    }

    #[test]
    fn usage_accumulates() {
        let store = SessionStore::new();
        let id = SessionId::generate();
        store.get_or_create(&id, "main", || "c".into());
        store.record_usage(
            &id,
            TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        );
        store.record_usage(
            &id,
            TokenUsage {
                input_tokens: 1,
                output_tokens: 2,
            },
        );
        assert_eq!(store.get(&id).unwrap().usage.total(), 18);
    }
}
