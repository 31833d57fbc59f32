//! Taint provenance types.
//!
//! A taint tag marks content that entered the system from outside the
//! user's direct instructions (web pages, search snippets, browser
//! snapshots, externally-tagged memory entries). Tags are attached by the
//! host at the moment external content first enters and copied on every
//! persistence hop; the sandboxed agent can never forge one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a piece of content ultimately came from.
///
/// Trust is a total function over content: the absence of a tag means
/// `User` by policy, never `External`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// Direct user input.
    User,
    /// Fetched from outside the trust boundary (web, search, browser).
    External,
    /// Produced by the host itself.
    System,
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustLevel::User => write!(f, "user"),
            TrustLevel::External => write!(f, "external"),
            TrustLevel::System => write!(f, "system"),
        }
    }
}

/// A label attached to content recording its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaintTag {
    /// The action that produced the taint (e.g. `"web_fetch"`).
    pub source: String,
    /// Trust classification of the content.
    pub trust: TrustLevel,
    /// When the content entered the system.
    pub timestamp: DateTime<Utc>,
}

impl TaintTag {
    /// Build an `external` tag for the given producing action, stamped now.
    pub fn external(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            trust: TrustLevel::External,
            timestamp: Utc::now(),
        }
    }
}

/// A record of one taint-producing action within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaintSource {
    /// The action name (e.g. `"web_fetch"`).
    pub action: String,
    /// When the action completed.
    pub timestamp: DateTime<Utc>,
    /// Optional free-form detail (e.g. the fetched URL's host).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_tag_has_external_trust() {
        let tag = TaintTag::external("web_fetch");
        assert_eq!(tag.source, "web_fetch");
        assert_eq!(tag.trust, TrustLevel::External);
    }

    #[test]
    fn trust_serde_snake_case() {
        let json = serde_json::to_string(&TrustLevel::External).unwrap();
        assert_eq!(json, "\"external\"");
        let back: TrustLevel = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(back, TrustLevel::User);
    }

    #[test]
    fn source_detail_omitted_when_none() {
        let src = TaintSource {
            action: "web_search".into(),
            timestamp: Utc::now(),
            detail: None,
        };
        let json = serde_json::to_string(&src).unwrap();
        assert!(!json.contains("detail"));
    }
}
