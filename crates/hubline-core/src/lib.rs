//! Shared protocol pieces for hubline.
//!
//! This crate holds what both ends of a hub connection must agree on: the
//! JSON frames carried over the socket, the reserved push channel names, and
//! the positional argument layout of the group RPCs. Transport and
//! reconnection logic live in `hubline-client`.

mod group;
mod message;

pub use group::{ArgsError, JoinReply, JoinRequest};
pub use message::{ClientFrame, ServerFrame};

/// Push channels with a fixed meaning.
pub mod channels {
    /// Hub-side errors addressed to this caller.
    pub const ERROR: &str = "error";
    /// Group/session state changes ("started", "closed", ...).
    pub const STATE: &str = "state";
    /// Number of rounds or questions added to the group so far.
    pub const ITERATIONS: &str = "iterations";
}

/// Hub method names invoked by the client layer itself.
pub mod rpc {
    pub const CONNECT_TO_GROUP: &str = "ConnectToGroup";
    pub const START_GAME: &str = "StartGame";
    pub const ADD_ROUND: &str = "AddRound";
}
