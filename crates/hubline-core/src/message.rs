//! Socket frames.
//!
//! Every frame is one JSON text message tagged by `type`. Replies are matched
//! to their call through `invocation_id`; pushes carry a channel name and an
//! arbitrary payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames sent from client to hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Call a hub method and wait for its completion.
    Invoke {
        invocation_id: u64,
        target: String,
        #[serde(default)]
        arguments: Vec<Value>,
    },
}

/// Frames sent from hub to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Reply to an `Invoke`. `error` set means the call failed remotely.
    Completion {
        invocation_id: u64,
        #[serde(default)]
        result: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Unsolicited message on a named channel.
    Push {
        channel: String,
        #[serde(default)]
        payload: Value,
    },
    /// The hub is closing the connection.
    Close {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ServerFrame {
    pub fn completed(invocation_id: u64, result: Value) -> Self {
        Self::Completion {
            invocation_id,
            result,
            error: None,
        }
    }

    pub fn failed(invocation_id: u64, error: impl Into<String>) -> Self {
        Self::Completion {
            invocation_id,
            result: Value::Null,
            error: Some(error.into()),
        }
    }

    pub fn push(channel: impl Into<String>, payload: Value) -> Self {
        Self::Push {
            channel: channel.into(),
            payload,
        }
    }
}
