//! Ownership of the single live session.
//!
//! Every mutation of the bound session, the subscription registry and the
//! reconnection record goes through [`ConnectionHandle`]. Locks are only taken
//! between suspension points and are never held while transport or caller
//! callbacks run.

use crate::config::{ClientConfig, ConflictPolicy};
use crate::error::{ExhaustReason, HubError, TransportError};
use crate::reconnect::{
    self, ConnectionLost, Episode, LostHook, ReconnectIndicator, ReconnectPhase, ReconnectState,
};
use crate::registry::SubscriptionRegistry;
use crate::transport::{CloseReason, Handler, Session, Transport};
use hubline_core::{JoinReply, JoinRequest};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// Identifies one opened session for the lifetime of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The session a client is currently bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub address: String,
}

struct Bound<S> {
    id: SessionId,
    address: String,
    session: S,
}

impl<S> Bound<S> {
    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            address: self.address.clone(),
        }
    }
}

struct Link<S> {
    bound: Option<Bound<S>>,
    connected: bool,
    last_address: Option<String>,
    reconnect: ReconnectState,
    membership: Option<JoinReply>,
    /// Why the last episode gave up. Cleared by the next caller `connect`.
    lost: Option<ExhaustReason>,
}

impl<S> Link<S> {
    fn new() -> Self {
        Self {
            bound: None,
            connected: false,
            last_address: None,
            reconnect: ReconnectState::default(),
            membership: None,
            lost: None,
        }
    }
}

#[derive(Default)]
struct Hooks {
    lost: Option<LostHook>,
    indicator: Option<Arc<dyn ReconnectIndicator>>,
}

/// Who is asking for a session.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Bind {
    /// A caller `connect`.
    Fresh,
    /// The reconnection episode with this id.
    Recovery(u64),
}

enum BindOutcome {
    Bound(SessionInfo),
    AlreadyBound(SessionInfo),
    Conflict(String),
    Superseded,
}

pub(crate) struct ConnectionHandle<T: Transport> {
    transport: T,
    config: ClientConfig,
    link: Mutex<Link<T::Session>>,
    registry: Mutex<SubscriptionRegistry>,
    hooks: Mutex<Hooks>,
    phase: watch::Sender<ReconnectPhase>,
    next_session: AtomicU64,
}

impl<T: Transport> ConnectionHandle<T> {
    pub(crate) fn new(transport: T, config: ClientConfig) -> Self {
        let (phase, _) = watch::channel(ReconnectPhase::Idle);
        Self {
            transport,
            config,
            link: Mutex::new(Link::new()),
            registry: Mutex::new(SubscriptionRegistry::new()),
            hooks: Mutex::new(Hooks::default()),
            phase,
            next_session: AtomicU64::new(0),
        }
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) async fn connect(
        self: &Arc<Self>,
        address: &str,
    ) -> Result<SessionInfo, HubError> {
        let stale = {
            let mut link = self.link.lock();
            if link.reconnect.episode.is_some() {
                return Err(HubError::ReconnectInProgress);
            }
            match link.bound.as_ref().map(Bound::info) {
                Some(existing) if existing.address == address => return Ok(existing),
                Some(existing) => match self.config.on_address_conflict {
                    ConflictPolicy::Reject => {
                        return Err(HubError::AddressConflict {
                            bound: existing.address,
                            requested: address.to_string(),
                        });
                    }
                    ConflictPolicy::Replace => {
                        tracing::warn!(
                            "Switching hub from {} to {}, closing old connection",
                            existing.address,
                            address
                        );
                        link.connected = false;
                        self.registry.lock().clear();
                        link.bound.take()
                    }
                },
                None => None,
            }
        };

        if let Some(stale) = stale
            && let Err(e) = stale.session.close().await
        {
            tracing::debug!("Error closing previous session: {}", e);
        }

        self.open(address, Bind::Fresh).await
    }

    /// Open a new session and bind it.
    pub(crate) async fn open(
        self: &Arc<Self>,
        address: &str,
        bind: Bind,
    ) -> Result<SessionInfo, HubError> {
        let session = match self.transport.open(address).await {
            Ok(session) => session,
            Err(source) => {
                if matches!(bind, Bind::Fresh) {
                    self.fresh_open_failed();
                }
                return Err(HubError::TransportOpen {
                    address: address.to_string(),
                    source,
                });
            }
        };

        // Another connect may have bound a session while we were opening.
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed) + 1);
        let outcome = {
            let mut link = self.link.lock();
            let superseded = match bind {
                Bind::Recovery(episode) => !link.reconnect.is_current(episode),
                Bind::Fresh => false,
            };
            match link.bound.as_ref().map(Bound::info) {
                _ if superseded => BindOutcome::Superseded,
                Some(existing) if existing.address == address => {
                    BindOutcome::AlreadyBound(existing)
                }
                Some(existing) => BindOutcome::Conflict(existing.address),
                None => {
                    link.bound = Some(Bound {
                        id,
                        address: address.to_string(),
                        session: session.clone(),
                    });
                    link.connected = true;
                    link.last_address = Some(address.to_string());
                    if matches!(bind, Bind::Fresh) {
                        link.reconnect.reset_for_connect();
                        link.membership = None;
                        link.lost = None;
                    }
                    BindOutcome::Bound(SessionInfo {
                        id,
                        address: address.to_string(),
                    })
                }
            }
        };

        match outcome {
            BindOutcome::Bound(info) => {
                // Observe the close outside the lock; it may fire right away.
                let weak = Arc::downgrade(self);
                session.on_close(Box::new(move |reason| {
                    if let Some(handle) = weak.upgrade() {
                        handle.session_closed(id, reason);
                    }
                }));
                if matches!(bind, Bind::Fresh) {
                    session.start_dispatch();
                    self.phase.send_replace(ReconnectPhase::Connected);
                    tracing::info!("Established connection: {} ({})", address, id);
                }
                Ok(info)
            }
            BindOutcome::AlreadyBound(info) => {
                discard(session).await;
                Ok(info)
            }
            BindOutcome::Conflict(bound) => {
                discard(session).await;
                Err(HubError::AddressConflict {
                    bound,
                    requested: address.to_string(),
                })
            }
            BindOutcome::Superseded => {
                discard(session).await;
                Err(HubError::TransportOpen {
                    address: address.to_string(),
                    source: TransportError::Closed,
                })
            }
        }
    }

    /// A caller `connect` could not open. Only touches state when nothing got
    /// bound in the meantime.
    fn fresh_open_failed(&self) {
        let idle = {
            let mut link = self.link.lock();
            if link.bound.is_some() {
                return;
            }
            link.connected = false;
            link.last_address = None;
            link.reconnect.episode.is_none()
        };
        if idle {
            self.phase.send_replace(ReconnectPhase::Idle);
        }
    }

    /// Close observer for the session with `id`.
    fn session_closed(self: &Arc<Self>, id: SessionId, reason: CloseReason) {
        let episode = {
            let mut link = self.link.lock();
            if link.bound.as_ref().map(|b| b.id) != Some(id) {
                tracing::debug!("Ignoring close of stale session {}", id);
                return;
            }
            let was_connected = link.connected;
            link.bound = None;
            link.connected = false;

            // Only an unexpected loss of a live session starts an episode.
            let reconnecting = link.reconnect.episode.is_some();
            let expected = link.reconnect.user_initiated;
            match link.last_address.clone() {
                Some(address) if was_connected && !reconnecting && !expected => {
                    Some((link.reconnect.begin(), address))
                }
                _ => {
                    if !reconnecting {
                        link.reconnect.reset();
                        link.last_address = None;
                    }
                    None
                }
            }
        };

        let Some((episode, address)) = episode else {
            tracing::debug!("Session {} closed, no reconnection needed", id);
            if self.link.lock().reconnect.episode.is_none() {
                self.phase.send_replace(ReconnectPhase::Idle);
            }
            return;
        };

        tracing::warn!("Connection to {} lost ({:?}), reconnecting", address, reason);
        self.phase.send_replace(ReconnectPhase::LossDetected);

        // The close callback is sync, so the episode needs its own task.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(reconnect::run(self.clone(), episode, address));
            }
            Err(e) => {
                tracing::error!("No runtime to reconnect on: {}", e);
                self.abandon_episode(episode.id);
            }
        }
    }

    pub(crate) async fn disconnect(&self) -> Result<(), HubError> {
        let (session, episode) = {
            let mut link = self.link.lock();
            link.reconnect.user_initiated = true;
            link.connected = false;
            link.last_address = None;
            link.membership = None;
            link.lost = None;
            let episode = link.reconnect.episode.take();
            link.reconnect.reset();
            self.registry.lock().clear();
            (link.bound.take(), episode)
        };

        if let Some(episode) = episode {
            tracing::debug!("Cancelling reconnection, user triggered disconnect");
            episode.cancel.cancel();
        }
        self.phase.send_replace(ReconnectPhase::Idle);

        match session {
            Some(bound) => {
                if let Err(e) = bound.session.close().await {
                    tracing::debug!("Failed to close down session cleanly: {}", e);
                }
                tracing::info!("Manually disconnected from {}", bound.address);
            }
            None => tracing::debug!("Disconnect with no open session"),
        }
        Ok(())
    }

    /// Close the transport as if it had dropped on its own.
    pub(crate) async fn force_close(&self) {
        let session = self.link.lock().bound.as_ref().map(|b| b.session.clone());
        match session {
            Some(session) => {
                tracing::info!("DEBUG: Forcing disconnect to test reconnection");
                if let Err(e) = session.close().await {
                    tracing::debug!("DEBUG: Failed to force disconnect: {}", e);
                }
            }
            None => tracing::warn!("No connection to disconnect"),
        }
    }

    pub(crate) async fn invoke(&self, target: &str, args: Vec<Value>) -> Result<Value, HubError> {
        let session = {
            let link = self.link.lock();
            match link.bound.as_ref() {
                Some(bound) => bound.session.clone(),
                None => return Err(no_session(&link)),
            }
        };

        session.invoke(target, args).await.map_err(|source| {
            tracing::error!("Invocation of {} failed: {}", target, source);
            HubError::Invocation {
                target: target.to_string(),
                source,
            }
        })
    }

    pub(crate) fn subscribe(&self, channel: &str, handler: Handler) -> Result<(), HubError> {
        let link = self.link.lock();
        let Some(bound) = link.bound.as_ref() else {
            return Err(no_session(&link));
        };
        self.registry.lock().register(channel, handler.clone());
        bound.session.off(channel);
        bound.session.on(channel, handler);
        Ok(())
    }

    pub(crate) fn record_join(&self, request: &JoinRequest, reply: &Value) {
        let membership = match serde_json::from_value::<JoinReply>(reply.clone()) {
            Ok(membership) => Some(membership),
            Err(e) => {
                tracing::debug!("Join reply carries no membership: {}", e);
                None
            }
        };
        let mut link = self.link.lock();
        link.reconnect.ticket = Some(JoinRequest::new(&request.group_key, &request.caller_id));
        link.membership = membership;
    }

    pub(crate) fn set_rejoin_ticket(&self, ticket: JoinRequest) {
        self.link.lock().reconnect.ticket = Some(ticket);
    }

    pub(crate) fn rejoin_ticket(&self) -> Option<JoinRequest> {
        self.link.lock().reconnect.ticket.clone()
    }

    pub(crate) fn set_attempt(&self, episode: u64, attempt: u32) {
        let mut link = self.link.lock();
        if link.reconnect.is_current(episode) {
            link.reconnect.attempt = attempt;
        }
    }

    pub(crate) fn set_phase(&self, phase: ReconnectPhase) {
        self.phase.send_replace(phase);
    }

    /// Finish a successful episode: re-attach subscriptions onto the new
    /// session, then let it deliver.
    ///
    /// Returns false when the episode was superseded or the session is gone.
    pub(crate) fn recovered(&self, episode: u64, reply: Option<Value>) -> bool {
        let (session, listeners) = {
            let mut link = self.link.lock();
            if !link.reconnect.is_current(episode) {
                return false;
            }
            let Some(session) = link.bound.as_ref().map(|b| b.session.clone()) else {
                return false;
            };
            link.reconnect.attempt = 0;
            link.reconnect.episode = None;
            if let Some(reply) = reply {
                link.membership = serde_json::from_value(reply).ok();
            }
            let registry = self.registry.lock();
            registry.attach_all(&session);
            (session, registry.len())
        };

        session.start_dispatch();
        self.phase.send_replace(ReconnectPhase::Recovered);
        tracing::info!("Reconnected successfully, reattached {} listeners", listeners);
        true
    }

    /// Terminal failure: tear everything down and tell the caller once.
    pub(crate) async fn exhausted(&self, episode: u64, address: &str, reason: ExhaustReason) {
        let (session, attempts) = {
            let mut link = self.link.lock();
            if !link.reconnect.is_current(episode) {
                tracing::debug!("Reconnection superseded, skipping cleanup");
                return;
            }
            let attempts = link.reconnect.attempt;
            link.reconnect.reset();
            link.connected = false;
            link.last_address = None;
            link.membership = None;
            link.lost = Some(reason.clone());
            self.registry.lock().clear();
            (link.bound.take(), attempts)
        };

        if let Some(bound) = session
            && let Err(e) = bound.session.close().await
        {
            tracing::debug!("Error closing half-recovered session: {}", e);
        }

        self.phase.send_replace(ReconnectPhase::Exhausted);
        tracing::error!("Connection to {} lost: {}", address, reason);

        let hook = self.hooks.lock().lost.clone();
        if let Some(hook) = hook {
            hook(ConnectionLost {
                address: address.to_string(),
                reason,
                attempts,
            });
        }
    }

    fn abandon_episode(&self, episode: u64) {
        let mut link = self.link.lock();
        if link.reconnect.is_current(episode) {
            link.reconnect.reset();
        }
    }

    pub(crate) fn show_indicator(&self, episode: &Episode) {
        let indicator = self.hooks.lock().indicator.clone();
        if let Some(indicator) = indicator {
            indicator.show(episode.leave_handle());
        }
    }

    pub(crate) fn dismiss_indicator(&self) {
        let indicator = self.hooks.lock().indicator.clone();
        if let Some(indicator) = indicator {
            indicator.dismiss();
        }
    }

    pub(crate) fn set_lost_hook(&self, hook: LostHook) {
        self.hooks.lock().lost = Some(hook);
    }

    pub(crate) fn set_indicator(&self, indicator: Arc<dyn ReconnectIndicator>) {
        self.hooks.lock().indicator = Some(indicator);
    }

    pub(crate) fn phase(&self) -> ReconnectPhase {
        *self.phase.borrow()
    }

    pub(crate) fn watch_phase(&self) -> watch::Receiver<ReconnectPhase> {
        self.phase.subscribe()
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.link.lock().reconnect.attempt
    }

    pub(crate) fn membership(&self) -> Option<JoinReply> {
        self.link.lock().membership.clone()
    }

    pub(crate) fn session(&self) -> Option<SessionInfo> {
        self.link.lock().bound.as_ref().map(Bound::info)
    }

    pub(crate) fn subscriptions(&self) -> usize {
        self.registry.lock().len()
    }
}

/// Error for a call made while nothing is bound. After a failed episode the
/// caller learns why until it connects again.
fn no_session<S>(link: &Link<S>) -> HubError {
    match &link.lost {
        Some(reason) => HubError::ReconnectExhausted(reason.clone()),
        None => HubError::NoActiveSession,
    }
}

async fn discard<S: Session>(session: S) {
    if let Err(e) = session.close().await {
        tracing::debug!("Error closing unused session: {}", e);
    }
}
