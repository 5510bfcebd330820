//! WebSocket transport speaking the JSON frames from `hubline-core`.
//!
//! Each session runs one task that owns the socket. Outbound frames reach it
//! through a channel; replies are routed back to the waiting `invoke` by
//! invocation id. The task also sends keepalive pings and gives up on the
//! socket when the hub has been silent for longer than the server timeout.

use crate::error::TransportError;
use crate::transport::{CloseCallback, CloseReason, Handler, Session, Transport};
use futures_util::{SinkExt, StreamExt};
use hubline_core::{ClientFrame, ServerFrame};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    /// How often a ping is sent.
    pub keepalive_interval_ms: u64,
    /// Silence after which the hub is considered gone.
    pub server_timeout_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_ms: 15_000,
            server_timeout_ms: 30_000,
        }
    }
}

impl WsConfig {
    fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms.max(1))
    }

    fn server_timeout(&self) -> Duration {
        Duration::from_millis(self.server_timeout_ms)
    }
}

#[derive(Debug, Clone, Default)]
pub struct WsTransport {
    config: WsConfig,
}

impl WsTransport {
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }
}

impl Transport for WsTransport {
    type Session = WsSession;

    async fn open(&self, address: &str) -> Result<WsSession, TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(address)
            .await
            .map_err(|e| TransportError::Open(e.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(outbound_tx));
        tokio::spawn(run_socket(ws, outbound_rx, shared.clone(), self.config.clone()));

        tracing::debug!("WebSocket open to {}", address);
        Ok(WsSession { shared })
    }
}

type PendingReply = oneshot::Sender<Result<Value, TransportError>>;

enum CloseSlot {
    Open(Option<CloseCallback>),
    Closed(CloseReason),
}

/// State shared between session clones and the socket task.
struct Shared {
    outbound: mpsc::UnboundedSender<Message>,
    pending: Mutex<HashMap<u64, PendingReply>>,
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
    close: Mutex<CloseSlot>,
    next_invocation: AtomicU64,
    dispatch_gate: CancellationToken,
    shutdown: CancellationToken,
    finished: CancellationToken,
}

impl Shared {
    fn new(outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            outbound,
            pending: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            close: Mutex::new(CloseSlot::Open(None)),
            next_invocation: AtomicU64::new(1),
            dispatch_gate: CancellationToken::new(),
            shutdown: CancellationToken::new(),
            finished: CancellationToken::new(),
        }
    }

    fn dispatch(&self, channel: &str, payload: Value) {
        let handlers = self.handlers.lock().get(channel).cloned();
        match handlers {
            Some(handlers) => {
                for handler in handlers {
                    handler(payload.clone());
                }
            }
            None => tracing::debug!("No handler for channel '{}'", channel),
        }
    }

    fn complete(&self, invocation_id: u64, reply: Result<Value, TransportError>) {
        match self.pending.lock().remove(&invocation_id) {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => tracing::debug!("Completion for unknown invocation {}", invocation_id),
        }
    }

    fn finish(&self, reason: CloseReason) {
        for (_, tx) in self.pending.lock().drain() {
            let _ = tx.send(Err(TransportError::Closed));
        }
        let callback = {
            let mut slot = self.close.lock();
            match std::mem::replace(&mut *slot, CloseSlot::Closed(reason.clone())) {
                CloseSlot::Open(callback) => callback,
                CloseSlot::Closed(_) => None,
            }
        };
        if let Some(callback) = callback {
            callback(reason);
        }
        self.finished.cancel();
    }
}

async fn run_socket(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    shared: Arc<Shared>,
    config: WsConfig,
) {
    let (mut sink, mut stream) = ws.split();
    let mut held: Option<VecDeque<(String, Value)>> = Some(VecDeque::new());
    let mut keepalive = tokio::time::interval(config.keepalive_interval());
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    keepalive.tick().await;
    let mut last_heard = Instant::now();

    let reason = loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break CloseReason::Normal;
            }

            _ = shared.dispatch_gate.cancelled(), if held.is_some() => {
                for (channel, payload) in held.take().unwrap_or_default() {
                    shared.dispatch(&channel, payload);
                }
            }

            Some(msg) = outbound.recv() => {
                if let Err(e) = sink.send(msg).await {
                    break CloseReason::Error(e.to_string());
                }
            }

            _ = keepalive.tick() => {
                if last_heard.elapsed() >= config.server_timeout() {
                    break CloseReason::Error("server timeout".to_string());
                }
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    break CloseReason::Error(e.to_string());
                }
            }

            frame = stream.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => break CloseReason::Error(e.to_string()),
                    None => break CloseReason::Error("connection dropped".to_string()),
                };
                last_heard = Instant::now();

                match msg {
                    Message::Text(text) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(ServerFrame::Completion { invocation_id, result, error }) => {
                            let reply = match error {
                                Some(e) => Err(TransportError::Remote(e)),
                                None => Ok(result),
                            };
                            shared.complete(invocation_id, reply);
                        }
                        Ok(ServerFrame::Push { channel, payload }) => match held.as_mut() {
                            Some(queue) => queue.push_back((channel, payload)),
                            None => shared.dispatch(&channel, payload),
                        },
                        Ok(ServerFrame::Close { error }) => {
                            break error.map_or(CloseReason::Normal, CloseReason::Error);
                        }
                        Err(e) => tracing::warn!("Invalid frame from hub: {}", e),
                    },
                    Message::Close(_) => break CloseReason::Normal,
                    _ => {}
                }
            }
        }
    };

    tracing::debug!("WebSocket session ended: {:?}", reason);
    shared.finish(reason);
}

/// Handle to one WebSocket connection.
#[derive(Clone)]
pub struct WsSession {
    shared: Arc<Shared>,
}

impl Session for WsSession {
    fn on(&self, channel: &str, handler: Handler) {
        self.shared
            .handlers
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(handler);
    }

    fn off(&self, channel: &str) {
        self.shared.handlers.lock().remove(channel);
    }

    fn start_dispatch(&self) {
        self.shared.dispatch_gate.cancel();
    }

    async fn invoke(&self, target: &str, args: Vec<Value>) -> Result<Value, TransportError> {
        if self.shared.finished.is_cancelled() {
            return Err(TransportError::Closed);
        }

        let invocation_id = self.shared.next_invocation.fetch_add(1, Ordering::Relaxed);
        let frame = ClientFrame::Invoke {
            invocation_id,
            target: target.to_string(),
            arguments: args,
        };
        let text =
            serde_json::to_string(&frame).map_err(|e| TransportError::Protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(invocation_id, tx);
        if self.shared.outbound.send(Message::Text(text.into())).is_err() {
            self.shared.pending.lock().remove(&invocation_id);
            return Err(TransportError::Closed);
        }

        tokio::select! {
            reply = rx => reply.unwrap_or(Err(TransportError::Closed)),
            _ = self.shared.finished.cancelled() => {
                self.shared.pending.lock().remove(&invocation_id);
                Err(TransportError::Closed)
            }
        }
    }

    fn on_close(&self, callback: CloseCallback) {
        let fire_now = {
            let mut slot = self.shared.close.lock();
            match &mut *slot {
                CloseSlot::Open(stored) => {
                    *stored = Some(callback);
                    None
                }
                CloseSlot::Closed(reason) => Some((callback, reason.clone())),
            }
        };
        if let Some((callback, reason)) = fire_now {
            callback(reason);
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shared.shutdown.cancel();
        tokio::time::timeout(CLOSE_TIMEOUT, self.shared.finished.cancelled())
            .await
            .map_err(|_| TransportError::Protocol("timed out waiting for close".to_string()))
    }
}
