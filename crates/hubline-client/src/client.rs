//! The public hub client.

use crate::config::ClientConfig;
use crate::error::{HubError, TransportError};
use crate::handle::{ConnectionHandle, SessionInfo};
use crate::reconnect::{ConnectionLost, ReconnectIndicator, ReconnectPhase};
use crate::transport::{Handler, Transport};
use hubline_core::{JoinReply, JoinRequest, rpc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

/// A single logical connection to a hub that survives transport drops.
///
/// Clones share the same connection.
///
/// ```no_run
/// # async fn demo() -> Result<(), hubline_client::HubError> {
/// use hubline_client::{HubClient, WsTransport};
///
/// let client = HubClient::new(WsTransport::default());
/// client.connect("ws://localhost:8001/spin").await?;
/// client.join_group("ABCD", "u1").await?;
/// client.subscribe("iterations", |count: u32| println!("{count} rounds"))?;
/// client.on_connection_lost(|lost| eprintln!("gave up: {}", lost.reason));
/// # Ok(())
/// # }
/// ```
pub struct HubClient<T: Transport> {
    handle: Arc<ConnectionHandle<T>>,
}

impl<T: Transport> Clone for HubClient<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
        }
    }
}

impl<T: Transport> HubClient<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    pub fn with_config(transport: T, config: ClientConfig) -> Self {
        Self {
            handle: Arc::new(ConnectionHandle::new(transport, config)),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        self.handle.config()
    }

    /// Connect to `address`, or return the session already bound to it.
    pub async fn connect(&self, address: &str) -> Result<SessionInfo, HubError> {
        self.handle.connect(address).await
    }

    /// Connect by hub name, resolved through [`ClientConfig::hub_address`].
    pub async fn connect_hub(&self, hub: &str) -> Result<SessionInfo, HubError> {
        let address = self.config().hub_address(hub);
        self.handle.connect(&address).await
    }

    /// Close the connection on purpose. No reconnection follows, and all
    /// subscriptions are dropped.
    pub async fn disconnect(&self) -> Result<(), HubError> {
        self.handle.disconnect().await
    }

    /// Close the transport without marking it intentional, which triggers the
    /// normal reconnection path.
    pub async fn debug_force_disconnect(&self) {
        self.handle.force_close().await
    }

    /// Register a handler for `channel`, replacing any previous one.
    ///
    /// Payloads that do not decode as `P` are logged and dropped. The handler
    /// stays registered across reconnections.
    pub fn subscribe<P, F>(&self, channel: &str, handler: F) -> Result<(), HubError>
    where
        P: DeserializeOwned + 'static,
        F: Fn(P) + Send + Sync + 'static,
    {
        let name = channel.to_string();
        let raw: Handler = Arc::new(move |payload: Value| {
            match serde_json::from_value::<P>(payload) {
                Ok(item) => handler(item),
                Err(e) => tracing::warn!("Dropping undecodable payload on '{}': {}", name, e),
            }
        });
        self.handle.subscribe(channel, raw)
    }

    pub fn subscribe_raw(&self, channel: &str, handler: Handler) -> Result<(), HubError> {
        self.handle.subscribe(channel, handler)
    }

    pub async fn invoke(&self, target: &str, args: Vec<Value>) -> Result<Value, HubError> {
        self.handle.invoke(target, args).await
    }

    /// Invoke and decode the reply.
    pub async fn invoke_as<R: DeserializeOwned>(
        &self,
        target: &str,
        args: Vec<Value>,
    ) -> Result<R, HubError> {
        let reply = self.handle.invoke(target, args).await?;
        serde_json::from_value(reply).map_err(|e| HubError::Invocation {
            target: target.to_string(),
            source: TransportError::Protocol(e.to_string()),
        })
    }

    /// Join a group and remember it for rejoining after a reconnect.
    pub async fn join_group(&self, group_key: &str, caller_id: &str) -> Result<Value, HubError> {
        let request = JoinRequest::new(group_key, caller_id);
        let reply = self.handle.invoke(rpc::CONNECT_TO_GROUP, request.to_args()).await?;
        self.handle.record_join(&request, &reply);
        Ok(reply)
    }

    /// Use when the group was joined through [`HubClient::invoke`] directly.
    pub fn set_rejoin_ticket(&self, group_key: &str, caller_id: &str) {
        self.handle.set_rejoin_ticket(JoinRequest::new(group_key, caller_id));
    }

    pub async fn start_game(&self, group_key: &str) -> Result<Value, HubError> {
        self.handle
            .invoke(rpc::START_GAME, vec![Value::String(group_key.to_string())])
            .await
    }

    /// Called once per loss episode that could not be recovered. Use it to
    /// reset UI state to a safe baseline.
    pub fn on_connection_lost<F>(&self, hook: F)
    where
        F: Fn(ConnectionLost) + Send + Sync + 'static,
    {
        self.handle.set_lost_hook(Arc::new(hook));
    }

    pub fn set_indicator(&self, indicator: impl ReconnectIndicator) {
        self.handle.set_indicator(Arc::new(indicator));
    }

    pub fn phase(&self) -> ReconnectPhase {
        self.handle.phase()
    }

    pub fn watch_phase(&self) -> watch::Receiver<ReconnectPhase> {
        self.handle.watch_phase()
    }

    /// Failed attempts in the running episode.
    pub fn attempts(&self) -> u32 {
        self.handle.attempts()
    }

    /// Membership from the last join or rejoin reply, if it carried one.
    pub fn membership(&self) -> Option<JoinReply> {
        self.handle.membership()
    }

    pub fn session(&self) -> Option<SessionInfo> {
        self.handle.session()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.session().is_some()
    }

    pub fn subscription_count(&self) -> usize {
        self.handle.subscriptions()
    }
}
