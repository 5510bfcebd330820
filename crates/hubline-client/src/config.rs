//! Client configuration.

use crate::backoff::{BACKOFF_BASE, Backoff, MAX_RECONNECT_ATTEMPTS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// What `connect` does when a session is already bound to another address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Fail with [`HubError::AddressConflict`](crate::HubError::AddressConflict).
    Reject,
    /// Close the stale session and open one to the new address.
    #[default]
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub max_reconnect_attempts: u32,
    pub backoff_base_ms: u64,
    pub on_address_conflict: ConflictPolicy,
    /// Prefix used by [`ClientConfig::hub_address`] for bare hub names,
    /// e.g. `wss://games.example.com/hubs`.
    pub hub_base: Option<String>,
    /// Hub names served by another hub (`roulette = "spin"`).
    pub hub_aliases: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            backoff_base_ms: BACKOFF_BASE.as_millis() as u64,
            on_address_conflict: ConflictPolicy::default(),
            hub_base: None,
            hub_aliases: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(Duration::from_millis(self.backoff_base_ms))
    }

    /// Resolve a hub name to a full address.
    ///
    /// Anything containing `://` is already an address and is returned as is.
    pub fn hub_address(&self, hub: &str) -> String {
        if hub.contains("://") {
            return hub.to_string();
        }
        let name = self.hub_aliases.get(hub).map(String::as_str).unwrap_or(hub);
        match &self.hub_base {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), name),
            None => name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let config = ClientConfig::default();
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.backoff().delay(0), Duration::from_secs(1));
        assert_eq!(config.on_address_conflict, ConflictPolicy::Replace);
    }

    #[test]
    fn alias_and_base() {
        let config = ClientConfig {
            hub_base: Some("wss://host/".into()),
            hub_aliases: [("duel".to_string(), "spin".to_string())].into(),
            ..Default::default()
        };
        assert_eq!(config.hub_address("duel"), "wss://host/spin");
        assert_eq!(config.hub_address("quiz"), "wss://host/quiz");
        assert_eq!(config.hub_address("ws://other/x"), "ws://other/x");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"on_address_conflict": "reject"}"#).unwrap();
        assert_eq!(config.on_address_conflict, ConflictPolicy::Reject);
        assert_eq!(config.max_reconnect_attempts, 5);
    }
}
