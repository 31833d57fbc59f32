//! Session identifiers.
//!
//! A session is identified solely by its UUIDv4 string. Because session ids
//! are used as path segments under the workspace root, the constructor is
//! strict: lowercase UUIDv4 only, nothing else ever becomes a `SessionId`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A validated session identifier (lowercase UUIDv4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Parse and validate a session id. Accepts only the canonical
    /// lowercase hyphenated UUIDv4 form.
    pub fn parse(s: &str) -> Result<Self, String> {
        if !is_uuid_v4(s) {
            return Err(format!("invalid session_id: {s:?}"));
        }
        Ok(Self(s.to_string()))
    }

    /// Generate a fresh random session id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The underlying string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        SessionId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Check that `s` is a canonical lowercase hyphenated UUIDv4.
///
/// Character-level check rather than `Uuid::parse_str`: the uuid crate
/// accepts uppercase, braces, and URN forms, all of which must be rejected
/// here because the id doubles as a filesystem path segment.
fn is_uuid_v4(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    for (i, &b) in bytes.iter().enumerate() {
        match i {
            8 | 13 | 18 | 23 => {
                if b != b'-' {
                    return false;
                }
            }
            14 => {
                // Version nibble must be 4.
                if b != b'4' {
                    return false;
                }
            }
            19 => {
                // Variant nibble: 8, 9, a, or b.
                if !matches!(b, b'8' | b'9' | b'a' | b'b') {
                    return false;
                }
            }
            _ => {
                if !matches!(b, b'0'..=b'9' | b'a'..=b'f') {
                    return false;
                }
            }
        }
    }
    true
}
