//! Errors surfaced to callers of the hub client.

use std::fmt;

/// Failure reported by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open connection: {0}")]
    Open(String),
    #[error("connection closed")]
    Closed,
    #[error("hub returned an error: {0}")]
    Remote(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Why a reconnection episode ended without recovering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExhaustReason {
    /// Every attempt to reopen the transport failed.
    AttemptsExhausted { attempts: u32 },
    /// The transport came back but the hub refused the rejoin.
    RejoinFailed(String),
    /// The caller left through the reconnect indicator.
    Abandoned,
}

impl fmt::Display for ExhaustReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttemptsExhausted { attempts } => {
                write!(f, "no connection after {attempts} attempts")
            }
            Self::RejoinFailed(e) => write!(f, "rejoin failed: {e}"),
            Self::Abandoned => f.write_str("abandoned by caller"),
        }
    }
}

/// Errors returned by [`HubClient`](crate::HubClient) operations.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("session already bound to {bound}, refusing to connect to {requested}")]
    AddressConflict { bound: String, requested: String },
    #[error("no active hub connection")]
    NoActiveSession,
    #[error("could not connect to {address}: {source}")]
    TransportOpen {
        address: String,
        #[source]
        source: TransportError,
    },
    #[error("call to {target} failed: {source}")]
    Invocation {
        target: String,
        #[source]
        source: TransportError,
    },
    /// Returned by calls made after an episode gave up, until the next
    /// `connect`.
    #[error("reconnection gave up: {0}")]
    ReconnectExhausted(ExhaustReason),
    #[error("a reconnection is already in progress")]
    ReconnectInProgress,
}

impl HubError {
    /// Short message fit for showing to an end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AddressConflict { .. } => {
                "Already connected to another game. Leave it and try again."
            }
            Self::NoActiveSession => "Not connected to a game.",
            Self::TransportOpen { .. } => "Could not connect. Check your connection and try again.",
            Self::Invocation { .. } => "The connection was interrupted.",
            Self::ReconnectExhausted(_) => "Lost the connection to the game.",
            Self::ReconnectInProgress => "Reconnecting, please wait.",
        }
    }
}
