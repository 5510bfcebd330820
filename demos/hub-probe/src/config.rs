//! Probe configuration file.
//!
//! ```toml
//! [client]
//! hub_base = "ws://localhost:8001"
//! max_reconnect_attempts = 5
//! backoff_base_ms = 1000
//!
//! [client.hub_aliases]
//! roulette = "spin"
//!
//! [websocket]
//! keepalive_interval_ms = 15000
//! ```

use anyhow::Context;
use hubline_client::{ClientConfig, WsConfig};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub client: ClientConfig,
    pub websocket: WsConfig,
}

impl ProbeConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubline_client::ConflictPolicy;

    #[test]
    fn sections_are_optional() {
        let config: ProbeConfig = toml::from_str(
            r#"
            [client]
            hub_base = "ws://localhost:8001"
            on_address_conflict = "reject"

            [client.hub_aliases]
            roulette = "spin"
            "#,
        )
        .unwrap();
        assert_eq!(config.client.hub_address("roulette"), "ws://localhost:8001/spin");
        assert_eq!(config.client.on_address_conflict, ConflictPolicy::Reject);
        assert_eq!(config.websocket, WsConfig::default());
    }

    #[test]
    fn missing_file_means_defaults() {
        let config = ProbeConfig::load(None).unwrap();
        assert_eq!(config.client, ClientConfig::default());
    }
}
