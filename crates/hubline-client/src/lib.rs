//! Client side of hubline.
//!
//! [`HubClient`] keeps one logical connection to a hub. When the transport
//! drops on its own, the client retries with exponential backoff, rejoins the
//! caller's group, and re-attaches every channel handler. Callers only see
//! `Result`s, plus a single [`ConnectionLost`] when recovery gives up.
//!
//! The socket stack is pluggable through [`Transport`]; [`WsTransport`] is
//! the bundled WebSocket implementation.

mod backoff;
mod client;
mod config;
mod error;
mod handle;
mod reconnect;
mod registry;
mod transport;
mod ws;

pub use backoff::{BACKOFF_BASE, Backoff, MAX_RECONNECT_ATTEMPTS};
pub use client::HubClient;
pub use config::{ClientConfig, ConflictPolicy};
pub use error::{ExhaustReason, HubError, TransportError};
pub use handle::{SessionId, SessionInfo};
pub use reconnect::{ConnectionLost, LeaveHandle, LostHook, ReconnectIndicator, ReconnectPhase};
pub use registry::SubscriptionRegistry;
pub use transport::{CloseCallback, CloseReason, Handler, Session, Transport};
pub use ws::{WsConfig, WsSession, WsTransport};
