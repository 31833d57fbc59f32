//! Channel adapter interface and registry.
//!
//! Channel adapters (Slack and friends) live outside the trusted core; the
//! host sees them only through this trait. The registry maps provider ids
//! from config to adapter instances; delivery resolution refuses providers
//! that are not registered.

use ax_types::address::SessionAddress;
use ax_types::AxResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// One messaging platform connection.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Stable provider id (e.g. `"slack"`), matched against addresses.
    fn provider_id(&self) -> &str;

    /// Send a message to an address on this platform.
    async fn send(&self, address: &SessionAddress, text: &str) -> AxResult<()>;

    /// Whether the agent should respond to a message at this address at
    /// all (mention rules, mute lists). Default: respond.
    fn should_respond(&self, _address: &SessionAddress, _text: &str) -> bool {
        true
    }

    /// Prior messages of a thread, oldest first, for backfill on the
    /// agent's first participation. Platforms without thread history
    /// return nothing.
    async fn thread_history(
        &self,
        _address: &SessionAddress,
        _limit: usize,
    ) -> AxResult<Vec<ax_types::message::ChatMessage>> {
        Ok(Vec::new())
    }
}

/// Provider id → adapter.
#[derive(Default)]
pub struct ChannelRegistry {
    adapters: HashMap<String, Arc<dyn ChannelAdapter>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters
            .insert(adapter.provider_id().to_string(), adapter);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(provider_id).cloned()
    }

    pub fn is_registered(&self, provider_id: &str) -> bool {
        self.adapters.contains_key(provider_id)
    }
}

/// In-process adapter that records sends; used in tests and for the local
/// CLI loopback.
#[derive(Default)]
pub struct LoopbackAdapter {
    pub sent: std::sync::Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ChannelAdapter for LoopbackAdapter {
    fn provider_id(&self) -> &str {
        "loopback"
    }

    async fn send(&self, address: &SessionAddress, text: &str) -> AxResult<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((address.canonical_key(), text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_lookup_and_send() {
        let adapter = Arc::new(LoopbackAdapter::default());
        let mut registry = ChannelRegistry::new();
        registry.register(adapter.clone());

        assert!(registry.is_registered("loopback"));
        assert!(!registry.is_registered("slack"));

        let addr = SessionAddress::dm("loopback", "user-1");
        registry
            .get("loopback")
            .unwrap()
            .send(&addr, "hello")
            .await
            .unwrap();

        let sent = adapter.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "hello");
        assert!(sent[0].0.starts_with("loopback:dm"));
    }

    #[test]
    fn default_should_respond_is_true() {
        let adapter = LoopbackAdapter::default();
        let addr = SessionAddress::dm("loopback", "u");
        assert!(adapter.should_respond(&addr, "anything"));
    }
}
