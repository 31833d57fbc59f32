//! Taint tracking for the AX host.
//!
//! Two parallel structures per session, both host-owned and authoritative:
//!
//! - the [`TaintBudget`] counts how many tokens of the session's context
//!   came from outside the user's direct instructions, and gates sensitive
//!   actions when the tainted ratio crosses the profile threshold;
//! - the [`SessionTaintTracker`] remembers *which* actions produced taint,
//!   so outgoing persistence writes can be stamped with a provenance tag.
//!
//! Workspace files modified by a tainted session are recorded in a
//! `.ax-taint.json` sidecar so taint survives across host restarts.

pub mod budget;
pub mod sidecar;
pub mod tracker;

pub use budget::TaintBudget;
pub use sidecar::{preseed_budget, read_sidecar, scan_modified, write_sidecar, WorkspaceTaintEntry, SIDECAR_FILE};
pub use tracker::{is_taint_producing, SessionTaintTracker};
