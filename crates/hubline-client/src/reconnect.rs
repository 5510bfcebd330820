//! Reconnection after an unexpected transport close.
//!
//! A loss episode runs as its own task:
//!
//! ```text
//! Connected -> LossDetected -> Reconnecting { attempt: 0..max } -> Recovered
//!                                                               \-> Exhausted
//! ```
//!
//! Each attempt waits `backoff.delay(attempt)`, reopens the transport to the
//! last known address and then rejoins the group with `isReconnect = true`. A
//! reopened socket whose rejoin fails counts as a failed episode. `Exhausted`
//! is terminal: the caller gets one [`ConnectionLost`] and must `connect`
//! again.

use crate::error::ExhaustReason;
use crate::handle::{Bind, ConnectionHandle};
use crate::transport::Transport;
use hubline_core::{JoinRequest, rpc};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Where the client stands with respect to its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPhase {
    /// Never connected, or disconnected on purpose.
    Idle,
    /// Connected by a caller `connect`.
    Connected,
    /// The transport closed unexpectedly; an episode is starting.
    LossDetected,
    /// Waiting for or running attempt `attempt` (zero based).
    Reconnecting { attempt: u32 },
    /// The last episode restored the session, subscriptions and membership.
    Recovered,
    /// The last episode gave up.
    Exhausted,
}

/// Delivered once when an episode gives up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionLost {
    pub address: String,
    pub reason: ExhaustReason,
    /// Failed transport attempts made during the episode.
    pub attempts: u32,
}

pub type LostHook = Arc<dyn Fn(ConnectionLost) + Send + Sync>;

/// Blocking "reconnecting" feedback shown to the user during an episode.
pub trait ReconnectIndicator: Send + Sync + 'static {
    /// Show the indicator. `leave` aborts the episode.
    fn show(&self, leave: LeaveHandle);

    fn dismiss(&self);
}

/// Escape action handed to the indicator.
#[derive(Debug, Clone)]
pub struct LeaveHandle {
    token: CancellationToken,
}

impl LeaveHandle {
    /// Stop reconnecting. The episode ends as `Abandoned` and the
    /// lost-connection hook fires.
    pub fn leave(&self) {
        self.token.cancel();
    }

    pub fn has_left(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub(crate) struct Episode {
    pub(crate) id: u64,
    pub(crate) cancel: CancellationToken,
}

impl Episode {
    pub(crate) fn leave_handle(&self) -> LeaveHandle {
        LeaveHandle {
            token: self.cancel.clone(),
        }
    }
}

#[derive(Default)]
pub(crate) struct ReconnectState {
    pub(crate) attempt: u32,
    pub(crate) episode: Option<Episode>,
    /// Latched by `disconnect`, cleared by the next caller `connect`.
    pub(crate) user_initiated: bool,
    /// Group to rejoin after the transport comes back.
    pub(crate) ticket: Option<JoinRequest>,
    episodes: u64,
}

impl ReconnectState {
    /// Claim the episode slot. Callers check that it is free first.
    pub(crate) fn begin(&mut self) -> Episode {
        self.episodes += 1;
        self.attempt = 0;
        let cancel = CancellationToken::new();
        self.episode = Some(Episode {
            id: self.episodes,
            cancel: cancel.clone(),
        });
        Episode {
            id: self.episodes,
            cancel,
        }
    }

    pub(crate) fn is_current(&self, episode: u64) -> bool {
        self.episode.as_ref().is_some_and(|e| e.id == episode)
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
        self.episode = None;
        self.ticket = None;
    }

    pub(crate) fn reset_for_connect(&mut self) {
        self.reset();
        self.user_initiated = false;
    }
}

pub(crate) async fn run<T: Transport>(
    handle: Arc<ConnectionHandle<T>>,
    episode: Episode,
    address: String,
) {
    handle.show_indicator(&episode);

    let outcome = tokio::select! {
        biased;
        _ = episode.cancel.cancelled() => Err(ExhaustReason::Abandoned),
        outcome = recover(&handle, episode.id, &address) => outcome,
    };

    match outcome {
        Ok(reply) => {
            if !handle.recovered(episode.id, reply) {
                handle
                    .exhausted(
                        episode.id,
                        &address,
                        ExhaustReason::RejoinFailed("connection closed during rejoin".to_string()),
                    )
                    .await;
            }
        }
        Err(reason) => handle.exhausted(episode.id, &address, reason).await,
    }

    handle.dismiss_indicator();
}

/// Backoff loop plus rejoin. Dropped as a whole when the episode is
/// cancelled, which abandons any in-flight connect.
async fn recover<T: Transport>(
    handle: &Arc<ConnectionHandle<T>>,
    episode: u64,
    address: &str,
) -> Result<Option<Value>, ExhaustReason> {
    let backoff = handle.config().backoff();
    let max_attempts = handle.config().max_reconnect_attempts;
    let mut attempt = 0;

    // Transport first; the group is only rejoined once a socket is bound.
    loop {
        if attempt >= max_attempts {
            tracing::error!("Failed to reconnect after {} attempts", attempt);
            return Err(ExhaustReason::AttemptsExhausted { attempts: attempt });
        }

        let delay = backoff.delay(attempt);
        handle.set_phase(ReconnectPhase::Reconnecting { attempt });
        tracing::warn!(
            "Reconnect attempt {}/{} after {:?}",
            attempt + 1,
            max_attempts,
            delay
        );
        tokio::time::sleep(delay).await;

        match handle.open(address, Bind::Recovery(episode)).await {
            Ok(info) => {
                tracing::info!("Transport reopened to {} ({})", info.address, info.id);
                break;
            }
            Err(e) => {
                attempt += 1;
                handle.set_attempt(episode, attempt);
                tracing::debug!("Reconnect error: {}", e);
            }
        }
    }

    // Rejoin
    let Some(ticket) = handle.rejoin_ticket() else {
        tracing::info!("No group to rejoin");
        return Ok(None);
    };

    let rejoin = JoinRequest::rejoin(ticket.group_key, ticket.caller_id);
    match handle.invoke(rpc::CONNECT_TO_GROUP, rejoin.to_args()).await {
        Ok(reply) => Ok(Some(reply)),
        Err(e) => {
            tracing::error!("Failed to invoke reconnect function: {}", e);
            Err(ExhaustReason::RejoinFailed(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn episodes_are_numbered() {
        let mut state = ReconnectState::default();
        let first = state.begin();
        assert!(state.is_current(first.id));
        state.reset();
        assert!(!state.is_current(first.id));

        let second = state.begin();
        assert_ne!(first.id, second.id);
        assert!(!state.is_current(first.id));
    }

    #[test]
    fn connect_clears_user_flag_but_reset_does_not() {
        let mut state = ReconnectState {
            user_initiated: true,
            attempt: 3,
            ..Default::default()
        };
        state.reset();
        assert!(state.user_initiated);
        assert_eq!(state.attempt, 0);
        state.reset_for_connect();
        assert!(!state.user_initiated);
    }

    #[test]
    fn leave_cancels_episode() {
        let mut state = ReconnectState::default();
        let episode = state.begin();
        let leave = episode.leave_handle();
        assert!(!leave.has_left());
        leave.leave();
        assert!(episode.cancel.is_cancelled());
    }
}
