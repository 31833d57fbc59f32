//! Per-session taint budget.

use ax_types::SessionId;
use dashmap::DashMap;

/// Counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BudgetTotals {
    /// Total tokens recorded into the session's context.
    pub total_tokens: u64,
    /// Tokens recorded as tainted.
    pub tainted_tokens: u64,
}

/// Tracks, per session, how much of the conversational context is tainted.
///
/// The ratio is always derived from the counters, never stored. Recording is
/// not idempotent; callers avoid double-counting by policy (each piece of
/// content is recorded exactly once, at the moment it enters the session).
#[derive(Debug, Default)]
pub struct TaintBudget {
    sessions: DashMap<SessionId, BudgetTotals>,
}

impl TaintBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Estimate tokens for a piece of text: ⌈bytes/4⌉.
    ///
    /// Exported so other components (workspace pre-seeding) use the same
    /// estimator as the budget itself.
    pub fn estimate_tokens(text: &str) -> u64 {
        (text.len() as u64).div_ceil(4)
    }

    /// Record content entering the session's context.
    pub fn record_content(&self, session: &SessionId, text: &str, tainted: bool) {
        self.record_tokens(session, Self::estimate_tokens(text), tainted);
    }

    /// Record a pre-estimated token count (used by sidecar pre-seeding).
    pub fn record_tokens(&self, session: &SessionId, tokens: u64, tainted: bool) {
        let mut entry = self.sessions.entry(session.clone()).or_default();
        entry.total_tokens += tokens;
        if tainted {
            entry.tainted_tokens += tokens;
        }
    }

    /// The tainted ratio in `[0, 1]`. A session with no recorded content
    /// has ratio 0.
    pub fn ratio(&self, session: &SessionId) -> f64 {
        match self.sessions.get(session) {
            Some(t) if t.total_tokens > 0 => t.tainted_tokens as f64 / t.total_tokens as f64,
            _ => 0.0,
        }
    }

    /// Whether sensitive actions are blocked at the given threshold.
    ///
    /// Strictly greater: a session sitting exactly at the threshold is
    /// still allowed.
    pub fn blocks_sensitive(&self, session: &SessionId, threshold: f64) -> bool {
        self.ratio(session) > threshold
    }

    /// Current counters for a session.
    pub fn totals(&self, session: &SessionId) -> BudgetTotals {
        self.sessions.get(session).map(|t| *t).unwrap_or_default()
    }

    /// Drop all state for a session.
    pub fn end_session(&self, session: &SessionId) {
        self.sessions.remove(session);
    }
}
