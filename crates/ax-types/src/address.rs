//! Session addresses and delivery targets.
//!
//! A session address is a typed, hierarchical key identifying where a
//! conversation takes place: the channel provider, the scope within it, and
//! the platform identifiers. A thread session carries the enclosing channel
//! session as its `parent`, forming a tree of owned pointers; the canonical
//! colon-joined key is the stable identity used for lookups and hashing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The scope a conversation takes place in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressScope {
    /// Direct message with a single peer.
    Dm,
    /// A named channel.
    Channel,
    /// A thread inside a channel.
    Thread,
    /// A multi-party group that is not a named channel.
    Group,
}

impl fmt::Display for AddressScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressScope::Dm => write!(f, "dm"),
            AddressScope::Channel => write!(f, "channel"),
            AddressScope::Thread => write!(f, "thread"),
            AddressScope::Group => write!(f, "group"),
        }
    }
}

/// Platform-specific identifiers for an address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddressIds {
    /// Workspace / team identifier (e.g. a Slack workspace id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Channel identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Thread identifier (timestamp or id, platform-defined).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    /// Peer user identifier (for DMs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
}

/// A typed, hierarchical key for where a conversation takes place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionAddress {
    /// String id of the channel adapter (e.g. `"slack"`).
    pub provider: String,
    /// The scope within the provider.
    pub scope: AddressScope,
    /// Platform identifiers.
    #[serde(default)]
    pub ids: AddressIds,
    /// The enclosing address (a thread's parent is its channel).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<SessionAddress>>,
}

impl SessionAddress {
    /// Build a DM address.
    pub fn dm(provider: impl Into<String>, peer: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            scope: AddressScope::Dm,
            ids: AddressIds {
                peer: Some(peer.into()),
                ..Default::default()
            },
            parent: None,
        }
    }

    /// Build a channel address.
    pub fn channel(
        provider: impl Into<String>,
        workspace: Option<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            scope: AddressScope::Channel,
            ids: AddressIds {
                workspace,
                channel: Some(channel.into()),
                ..Default::default()
            },
            parent: None,
        }
    }

    /// Build a thread address whose parent is the enclosing channel.
    pub fn thread(channel_addr: SessionAddress, thread: impl Into<String>) -> Self {
        let mut ids = channel_addr.ids.clone();
        ids.thread = Some(thread.into());
        Self {
            provider: channel_addr.provider.clone(),
            scope: AddressScope::Thread,
            ids,
            parent: Some(Box::new(channel_addr)),
        }
    }

    /// Deterministic colon-joined key.
    ///
    /// Absent identifier fields render as `-` so keys remain positionally
    /// unambiguous. The parent does not participate: a thread's key already
    /// embeds its channel identifiers.
    pub fn canonical_key(&self) -> String {
        let part = |o: &Option<String>| o.clone().unwrap_or_else(|| "-".to_string());
        format!(
            "{}:{}:{}:{}:{}:{}",
            self.provider,
            self.scope,
            part(&self.ids.workspace),
            part(&self.ids.channel),
            part(&self.ids.thread),
            part(&self.ids.peer),
        )
    }
}

/// Where an unsolicited agent-produced message (cron, heartbeat) goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Delivery {
    /// Fire and forget.
    None,
    /// Deliver to a channel.
    Channel {
        /// The resolution target.
        target: DeliveryTarget,
    },
}

/// The target of a channel delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeliveryTarget {
    /// The literal string `"last"`: the agent's most recent channel
    /// interaction, resolved at fire time.
    Last(LastMarker),
    /// A concrete address.
    Address(SessionAddress),
}

/// Serde marker for the literal `"last"` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastMarker;

impl Serialize for LastMarker {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str("last")
    }
}

impl<'de> Deserialize<'de> for LastMarker {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        if s == "last" {
            Ok(LastMarker)
        } else {
            Err(serde::de::Error::custom("expected the literal \"last\""))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_dm() {
        let addr = SessionAddress::dm("slack", "U123");
        assert_eq!(addr.canonical_key(), "slack:dm:-:-:-:U123");
    }

    #[test]
    fn canonical_key_thread_embeds_channel() {
        let chan = SessionAddress::channel("slack", Some("T1".into()), "C42");
        let thread = SessionAddress::thread(chan.clone(), "171234.5678");
        assert_eq!(thread.canonical_key(), "slack:thread:T1:C42:171234.5678:-");
        assert_eq!(thread.parent.as_deref(), Some(&chan));
    }

    #[test]
    fn canonical_key_is_deterministic() {
        let a = SessionAddress::channel("slack", None, "C1");
        let b = SessionAddress::channel("slack", None, "C1");
        assert_eq!(a.canonical_key(), b.canonical_key());
    }

    #[test]
    fn delivery_last_roundtrip() {
        let json = r#"{"mode":"channel","target":"last"}"#;
        let d: Delivery = serde_json::from_str(json).unwrap();
        assert!(matches!(
            d,
            Delivery::Channel {
                target: DeliveryTarget::Last(_)
            }
        ));
        let back = serde_json::to_string(&d).unwrap();
        assert!(back.contains("\"last\""));
    }

    #[test]
    fn delivery_address_roundtrip() {
        let d = Delivery::Channel {
            target: DeliveryTarget::Address(SessionAddress::dm("slack", "U9")),
        };
        let json = serde_json::to_string(&d).unwrap();
        let back: Delivery = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }

    #[test]
    fn delivery_none_tag() {
        let json = serde_json::to_string(&Delivery::None).unwrap();
        assert_eq!(json, r#"{"mode":"none"}"#);
    }

    #[test]
    fn rejects_bogus_last_literal() {
        let json = r#"{"mode":"channel","target":"latest"}"#;
        let d: Result<Delivery, _> = serde_json::from_str(json);
        assert!(d.is_err());
    }
}
