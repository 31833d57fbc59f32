//! Channel event deduplication.
//!
//! Channel adapters can deliver the same platform event more than once
//! (retries, reconnects). The router keeps a short-TTL set of
//! `(provider, message_id)` pairs; repeat deliveries inside the window are
//! no-ops.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Default dedup window.
pub const DEFAULT_TTL: Duration = Duration::from_secs(120);

/// TTL set over `(provider, message_id)`.
pub struct EventDedup {
    ttl: Duration,
    seen: DashMap<(String, String), Instant>,
}

impl EventDedup {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: DashMap::new(),
        }
    }

    /// Returns true exactly once per key per TTL window. Also prunes
    /// expired entries opportunistically so the set stays bounded.
    pub fn first_delivery(&self, provider: &str, message_id: &str) -> bool {
        let now = Instant::now();
        self.seen.retain(|_, inserted| now.duration_since(*inserted) < self.ttl);

        let key = (provider.to_string(), message_id.to_string());
        match self.seen.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        }
    }

    /// Current live entry count (after pruning on the next check).
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for EventDedup {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
