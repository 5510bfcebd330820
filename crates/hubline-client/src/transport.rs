//! The transport seam.
//!
//! A [`Transport`] opens duplex [`Session`]s to an address. The hub client
//! only relies on the operations below, so tests and alternative socket
//! stacks can plug in their own implementation.

use crate::error::TransportError;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Callback invoked for each push on a channel.
pub type Handler = Arc<dyn Fn(Value) + Send + Sync>;

/// Callback invoked once when a session ends.
pub type CloseCallback = Box<dyn FnOnce(CloseReason) + Send>;

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed locally or by the hub with no error.
    Normal,
    /// The connection failed or the hub closed it with an error.
    Error(String),
}

pub trait Transport: Send + Sync + 'static {
    type Session: Session;

    fn open(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<Self::Session, TransportError>> + Send;
}

/// One open connection.
///
/// Clones refer to the same underlying connection. A new session holds
/// inbound pushes until [`Session::start_dispatch`] is called, so handlers can
/// be attached before anything is delivered.
pub trait Session: Clone + Send + Sync + 'static {
    /// Bind `handler` to `channel`, adding to any existing binding.
    fn on(&self, channel: &str, handler: Handler);

    /// Remove every binding for `channel`.
    fn off(&self, channel: &str);

    /// Release held pushes and deliver new ones as they arrive.
    fn start_dispatch(&self);

    fn invoke(
        &self,
        target: &str,
        args: Vec<Value>,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send;

    /// Register the close callback. Fires immediately if already closed.
    fn on_close(&self, callback: CloseCallback);

    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
