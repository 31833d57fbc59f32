//! Per-session taint source tracking.

use ax_types::taint::{TaintSource, TaintTag, TrustLevel};
use ax_types::SessionId;
use ax_wire::Action;
use chrono::Utc;
use dashmap::DashMap;

/// Whether a successful call to the named action introduces external
/// content into a session.
pub fn is_taint_producing(action: &str) -> bool {
    Action::from_name(action).is_some_and(|a| a.is_taint_producing())
}

/// Records which actions produced taint in each session.
///
/// The records are ordered by arrival; the tag stamped onto outgoing
/// persistence writes is built from the most recent source. Only the IPC
/// server appends here, and only after a taint-producing action succeeds.
#[derive(Debug, Default)]
pub struct SessionTaintTracker {
    sessions: DashMap<SessionId, Vec<TaintSource>>,
}

impl SessionTaintTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a taint-producing action for the session.
    pub fn record_source(
        &self,
        session: &SessionId,
        action: impl Into<String>,
        detail: Option<String>,
    ) {
        let source = TaintSource {
            action: action.into(),
            timestamp: Utc::now(),
            detail,
        };
        self.sessions
            .entry(session.clone())
            .or_default()
            .push(source);
    }

    /// Whether any taint-producing action has fired in this session.
    pub fn is_tainted(&self, session: &SessionId) -> bool {
        self.sessions
            .get(session)
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }

    /// Build a tag from the most recent source, if any.
    pub fn taint_tag(&self, session: &SessionId) -> Option<TaintTag> {
        self.sessions.get(session).and_then(|sources| {
            sources.last().map(|src| TaintTag {
                source: src.action.clone(),
                trust: TrustLevel::External,
                timestamp: src.timestamp,
            })
        })
    }

    /// The ordered source records for a session.
    pub fn sources(&self, session: &SessionId) -> Vec<TaintSource> {
        self.sessions
            .get(session)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Drop all state for a session.
    pub fn end_session(&self, session: &SessionId) {
        self.sessions.remove(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> SessionId {
        SessionId::generate()
    }

    #[test]
    fn taint_producing_set_matches_wire() {
        assert!(is_taint_producing("web_fetch"));
        assert!(is_taint_producing("web_search"));
        assert!(is_taint_producing("browser_navigate"));
        assert!(is_taint_producing("browser_snapshot"));
        assert!(!is_taint_producing("memory_write"));
        assert!(!is_taint_producing("browser_click"));
        assert!(!is_taint_producing("no_such_action"));
    }

    #[test]
    fn fresh_session_is_clean() {
        let tracker = SessionTaintTracker::new();
        let s = sid();
        assert!(!tracker.is_tainted(&s));
        assert!(tracker.taint_tag(&s).is_none());
        assert!(tracker.sources(&s).is_empty());
    }

    #[test]
    fn tag_comes_from_most_recent_source() {
        let tracker = SessionTaintTracker::new();
        let s = sid();
        tracker.record_source(&s, "web_search", None);
        tracker.record_source(&s, "web_fetch", Some("example.com".into()));

        assert!(tracker.is_tainted(&s));
        let tag = tracker.taint_tag(&s).unwrap();
        assert_eq!(tag.source, "web_fetch");
        assert_eq!(tag.trust, TrustLevel::External);

        let sources = tracker.sources(&s);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].action, "web_search");
        assert_eq!(sources[1].detail.as_deref(), Some("example.com"));
    }

    #[test]
    fn end_session_clears() {
        let tracker = SessionTaintTracker::new();
        let s = sid();
        tracker.record_source(&s, "web_fetch", None);
        tracker.end_session(&s);
        assert!(!tracker.is_tainted(&s));
    }

    #[test]
    fn sessions_are_independent() {
        let tracker = SessionTaintTracker::new();
        let a = sid();
        let b = sid();
        tracker.record_source(&a, "browser_navigate", None);
        assert!(tracker.is_tainted(&a));
        assert!(!tracker.is_tainted(&b));
    }
}
