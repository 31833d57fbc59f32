//! The closed set of IPC actions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Every action the IPC server recognizes.
///
/// The enum is closed on purpose: adding an action means adding a schema,
/// a handler, and an audit classification in the same change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    // -- model --
    LlmCall,
    // -- memory --
    MemoryWrite,
    MemoryRead,
    MemoryQuery,
    MemoryDelete,
    MemoryList,
    // -- web / browser --
    WebFetch,
    WebSearch,
    BrowserNavigate,
    BrowserSnapshot,
    BrowserClick,
    BrowserType,
    BrowserScreenshot,
    // -- skills --
    SkillList,
    SkillRead,
    SkillPropose,
    // -- scheduler --
    SchedulerAddCron,
    SchedulerRemoveCron,
    SchedulerListJobs,
    SchedulerRunAt,
    // -- audit --
    AuditQuery,
    // -- delegation --
    Delegate,
}

impl Action {
    /// All actions, in declaration order.
    pub const ALL: &'static [Action] = &[
        Action::LlmCall,
        Action::MemoryWrite,
        Action::MemoryRead,
        Action::MemoryQuery,
        Action::MemoryDelete,
        Action::MemoryList,
        Action::WebFetch,
        Action::WebSearch,
        Action::BrowserNavigate,
        Action::BrowserSnapshot,
        Action::BrowserClick,
        Action::BrowserType,
        Action::BrowserScreenshot,
        Action::SkillList,
        Action::SkillRead,
        Action::SkillPropose,
        Action::SchedulerAddCron,
        Action::SchedulerRemoveCron,
        Action::SchedulerListJobs,
        Action::SchedulerRunAt,
        Action::AuditQuery,
        Action::Delegate,
    ];

    /// The wire name of this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::LlmCall => "llm_call",
            Action::MemoryWrite => "memory_write",
            Action::MemoryRead => "memory_read",
            Action::MemoryQuery => "memory_query",
            Action::MemoryDelete => "memory_delete",
            Action::MemoryList => "memory_list",
            Action::WebFetch => "web_fetch",
            Action::WebSearch => "web_search",
            Action::BrowserNavigate => "browser_navigate",
            Action::BrowserSnapshot => "browser_snapshot",
            Action::BrowserClick => "browser_click",
            Action::BrowserType => "browser_type",
            Action::BrowserScreenshot => "browser_screenshot",
            Action::SkillList => "skill_list",
            Action::SkillRead => "skill_read",
            Action::SkillPropose => "skill_propose",
            Action::SchedulerAddCron => "scheduler_add_cron",
            Action::SchedulerRemoveCron => "scheduler_remove_cron",
            Action::SchedulerListJobs => "scheduler_list_jobs",
            Action::SchedulerRunAt => "scheduler_run_at",
            Action::AuditQuery => "audit_query",
            Action::Delegate => "delegate",
        }
    }

    /// Look up an action by its wire name.
    pub fn from_name(name: &str) -> Option<Action> {
        Action::ALL.iter().copied().find(|a| a.as_str() == name)
    }

    /// Whether this action is gated by the taint budget.
    ///
    /// The default sensitive set; the IPC server may be configured with a
    /// wider one. Browser automation is sensitive because a tainted session
    /// driving a logged-in browser is the canonical confused-deputy attack.
    pub fn is_sensitive(&self) -> bool {
        matches!(
            self,
            Action::SkillPropose
                | Action::BrowserNavigate
                | Action::BrowserSnapshot
                | Action::BrowserClick
                | Action::BrowserType
                | Action::BrowserScreenshot
        )
    }

    /// Whether a successful call to this action introduces external content
    /// into the session.
    pub fn is_taint_producing(&self) -> bool {
        matches!(
            self,
            Action::WebFetch
                | Action::WebSearch
                | Action::BrowserNavigate
                | Action::BrowserSnapshot
        )
    }

    /// Whether this action is a pure read. Query actions are not audited.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Action::MemoryRead
                | Action::MemoryQuery
                | Action::MemoryList
                | Action::SkillList
                | Action::SkillRead
                | Action::SchedulerListJobs
                | Action::AuditQuery
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
