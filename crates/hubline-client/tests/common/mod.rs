//! Scripted in-memory transport for driving `HubClient` in tests.

#![allow(dead_code)]

use hubline_client::{CloseCallback, CloseReason, Handler, Session, Transport, TransportError};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::Instant;

pub const SPIN: &str = "wss://host/spin";
pub const QUIZ: &str = "wss://host/quiz";

pub type Responder = Arc<dyn Fn(&str, &[Value]) -> Result<Value, String> + Send + Sync>;
pub type OpenHook = Arc<dyn Fn(&MockSession) + Send + Sync>;

/// Answers `ConnectToGroup` with a membership reply and everything else
/// with `null`.
pub fn default_responder() -> Responder {
    Arc::new(|target: &str, args: &[Value]| match target {
        "ConnectToGroup" => Ok(json!({
            "group_key": args.first().cloned().unwrap_or(Value::Null),
            "is_host": false,
            "members": 1,
        })),
        _ => Ok(Value::Null),
    })
}

struct TransportState {
    opens: Vec<(String, Instant)>,
    script: VecDeque<bool>,
    fail_all: bool,
    sessions: Vec<MockSession>,
    responder: Responder,
    on_open: Option<OpenHook>,
}

#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState {
                opens: Vec::new(),
                script: VecDeque::new(),
                fail_all: false,
                sessions: Vec::new(),
                responder: default_responder(),
                on_open: None,
            })),
        }
    }

    /// Make the next `n` opens fail.
    pub fn fail_next(&self, n: usize) {
        self.state.lock().script.extend(std::iter::repeat_n(true, n));
    }

    pub fn fail_all(&self, fail: bool) {
        self.state.lock().fail_all = fail;
    }

    /// Applies to sessions opened from now on.
    pub fn set_responder(&self, responder: Responder) {
        self.state.lock().responder = responder;
    }

    /// Runs right after a session is created, before the client sees it.
    pub fn on_open(&self, hook: OpenHook) {
        self.state.lock().on_open = Some(hook);
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens.len()
    }

    pub fn opened_addresses(&self) -> Vec<String> {
        self.state.lock().opens.iter().map(|(a, _)| a.clone()).collect()
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.state.lock().opens.iter().map(|(_, t)| *t).collect()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn session(&self, index: usize) -> MockSession {
        self.state.lock().sessions[index].clone()
    }

    pub fn last_session(&self) -> MockSession {
        self.state.lock().sessions.last().cloned().expect("no session opened")
    }
}

impl Transport for MockTransport {
    type Session = MockSession;

    async fn open(&self, address: &str) -> Result<MockSession, TransportError> {
        let (session, hook) = {
            let mut state = self.state.lock();
            state.opens.push((address.to_string(), Instant::now()));
            let fail = state.script.pop_front().unwrap_or(state.fail_all);
            if fail {
                return Err(TransportError::Open("scripted failure".to_string()));
            }
            let session = MockSession::new(address, state.responder.clone());
            state.sessions.push(session.clone());
            (session, state.on_open.clone())
        };
        if let Some(hook) = hook {
            hook(&session);
        }
        Ok(session)
    }
}

struct SessionInner {
    address: String,
    responder: Responder,
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
    held: Mutex<Option<VecDeque<(String, Value)>>>,
    close_callback: Mutex<Option<CloseCallback>>,
    closed: AtomicBool,
    invocations: Mutex<Vec<(String, Vec<Value>)>>,
}

#[derive(Clone)]
pub struct MockSession {
    inner: Arc<SessionInner>,
}

impl MockSession {
    fn new(address: &str, responder: Responder) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                address: address.to_string(),
                responder,
                handlers: Mutex::new(HashMap::new()),
                held: Mutex::new(Some(VecDeque::new())),
                close_callback: Mutex::new(None),
                closed: AtomicBool::new(false),
                invocations: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Simulate the hub sending a push.
    pub fn push(&self, channel: &str, payload: Value) {
        let delivered_later = match self.inner.held.lock().as_mut() {
            Some(queue) => {
                queue.push_back((channel.to_string(), payload.clone()));
                true
            }
            None => false,
        };
        if !delivered_later {
            self.deliver(channel, payload);
        }
    }

    fn deliver(&self, channel: &str, payload: Value) {
        let handlers = self.inner.handlers.lock().get(channel).cloned().unwrap_or_default();
        for handler in handlers {
            handler(payload.clone());
        }
    }

    /// Simulate the transport dropping on its own.
    pub fn drop_connection(&self) {
        self.fire_close(CloseReason::Error("connection dropped".to_string()));
    }

    fn fire_close(&self, reason: CloseReason) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let callback = self.inner.close_callback.lock().take();
        if let Some(callback) = callback {
            callback(reason);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<(String, Vec<Value>)> {
        self.inner.invocations.lock().clone()
    }

    pub fn handler_count(&self, channel: &str) -> usize {
        self.inner.handlers.lock().get(channel).map_or(0, Vec::len)
    }
}

impl Session for MockSession {
    fn on(&self, channel: &str, handler: Handler) {
        self.inner
            .handlers
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(handler);
    }

    fn off(&self, channel: &str) {
        self.inner.handlers.lock().remove(channel);
    }

    fn start_dispatch(&self) {
        let held = self.inner.held.lock().take();
        for (channel, payload) in held.unwrap_or_default() {
            self.deliver(&channel, payload);
        }
    }

    async fn invoke(&self, target: &str, args: Vec<Value>) -> Result<Value, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.inner.invocations.lock().push((target.to_string(), args.clone()));
        (self.inner.responder)(target, &args).map_err(TransportError::Remote)
    }

    fn on_close(&self, callback: CloseCallback) {
        if self.is_closed() {
            callback(CloseReason::Normal);
        } else {
            *self.inner.close_callback.lock() = Some(callback);
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.fire_close(CloseReason::Normal);
        Ok(())
    }
}
