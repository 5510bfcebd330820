//! Group membership RPC arguments.
//!
//! `ConnectToGroup` takes positional arguments `(groupKey, callerId,
//! isReconnect)`. The third one is optional on the wire and defaults to a
//! fresh join.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request to join (or rejoin) a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub group_key: String,
    pub caller_id: String,
    /// Set when the caller is restoring membership after a reconnect.
    pub is_reconnect: bool,
}

impl JoinRequest {
    pub fn new(group_key: impl Into<String>, caller_id: impl Into<String>) -> Self {
        Self {
            group_key: group_key.into(),
            caller_id: caller_id.into(),
            is_reconnect: false,
        }
    }

    pub fn rejoin(group_key: impl Into<String>, caller_id: impl Into<String>) -> Self {
        Self {
            is_reconnect: true,
            ..Self::new(group_key, caller_id)
        }
    }

    /// Positional arguments for the `ConnectToGroup` invocation.
    pub fn to_args(&self) -> Vec<Value> {
        vec![
            Value::String(self.group_key.clone()),
            Value::String(self.caller_id.clone()),
            Value::Bool(self.is_reconnect),
        ]
    }

    pub fn from_args(args: &[Value]) -> Result<Self, ArgsError> {
        let group_key = string_arg(args, 0, "groupKey")?;
        let caller_id = string_arg(args, 1, "callerId")?;
        let is_reconnect = match args.get(2) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err(ArgsError::WrongType { index: 2, name: "isReconnect" }),
        };
        Ok(Self {
            group_key,
            caller_id,
            is_reconnect,
        })
    }
}

fn string_arg(args: &[Value], index: usize, name: &'static str) -> Result<String, ArgsError> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ArgsError::WrongType { index, name }),
        None => Err(ArgsError::Missing { index, name }),
    }
}

/// Reply to `ConnectToGroup`.
///
/// `is_host` is authoritative: a client that rejoins learns its host role
/// from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinReply {
    #[serde(alias = "groupKey")]
    pub group_key: String,
    #[serde(default, alias = "isHost")]
    pub is_host: bool,
    #[serde(default)]
    pub members: u32,
}

/// Error decoding positional RPC arguments.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgsError {
    #[error("missing argument {index} ({name})")]
    Missing { index: usize, name: &'static str },
    #[error("argument {index} ({name}) has the wrong type")]
    WrongType { index: usize, name: &'static str },
}
