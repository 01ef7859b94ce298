//! In-memory transports for tests and offline embedding.
//!
//! [`MockTransport`] answers REST calls from canned responses and records every
//! request. [`MockConnector`] hands out [`MockSocket`]s whose inbound frames
//! are pushed by the test through a [`MockSocketHandle`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::http::{ApiResponse, Method, Transport};
use crate::ws::{KernelSocket, SocketConnector};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Debug, Default)]
struct TransportState {
    routes: HashMap<(Method, String), VecDeque<ApiResponse>>,
    defaults: HashMap<Method, ApiResponse>,
    unreachable: HashSet<(Method, String)>,
    requests: Vec<RecordedRequest>,
}

/// Canned REST responses. The last response queued for a route repeats;
/// unknown routes use the per-method default, or answer `200 {}`.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, method: Method, path: &str, status: u16, body: Value) -> &Self {
        lock(&self.state)
            .routes
            .entry((method, path.to_string()))
            .or_default()
            .push_back(ApiResponse::new(status, body));
        self
    }

    /// Response for any path of `method` without its own route.
    pub fn respond_default(&self, method: Method, status: u16, body: Value) -> &Self {
        lock(&self.state)
            .defaults
            .insert(method, ApiResponse::new(status, body));
        self
    }

    /// Fail requests to this route at the transport level, as if the server
    /// could not be reached.
    pub fn fail(&self, method: Method, path: &str) -> &Self {
        lock(&self.state)
            .unreachable
            .insert((method, path.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state).requests.clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        lock(&self.state)
            .requests
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<ApiResponse, TransportError> {
        let mut state = lock(&self.state);
        state.requests.push(RecordedRequest {
            method,
            path: path.to_string(),
            body,
        });
        if state.unreachable.contains(&(method, path.to_string())) {
            return Err(TransportError(format!("connection refused: {path}")));
        }
        let response = match state.routes.get_mut(&(method, path.to_string())) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => state.defaults.get(&method).cloned(),
        };
        Ok(response.unwrap_or_else(|| ApiResponse::new(200, json!({}))))
    }
}

#[derive(Debug, Default)]
struct SocketState {
    open: bool,
    sent: Vec<String>,
    closed_with: Option<(u16, String)>,
}

pub struct MockSocket {
    kernel_id: String,
    state: Arc<Mutex<SocketState>>,
    inbound: mpsc::UnboundedReceiver<String>,
}

/// Test-side end of a [`MockSocket`].
#[derive(Debug, Clone)]
pub struct MockSocketHandle {
    pub kernel_id: String,
    state: Arc<Mutex<SocketState>>,
    inbound: mpsc::UnboundedSender<String>,
}

impl MockSocketHandle {
    /// Queue an inbound frame.
    pub fn push(&self, frame: Value) {
        let _ = self.inbound.send(frame.to_string());
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self.inbound.send(text.to_string());
    }

    pub fn sent(&self) -> Vec<Value> {
        lock(&self.state)
            .sent
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Simulate the server dropping the connection.
    pub fn drop_connection(&self) {
        lock(&self.state).open = false;
    }

    pub fn closed_with(&self) -> Option<(u16, String)> {
        lock(&self.state).closed_with.clone()
    }
}

#[async_trait]
impl KernelSocket for MockSocket {
    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(TransportError(format!(
                "socket for {} is closed",
                self.kernel_id
            )));
        }
        state.sent.push(text);
        Ok(())
    }

    async fn recv_text(&mut self) -> Option<String> {
        if !self.is_open() {
            return None;
        }
        self.inbound.recv().await
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.open = false;
        state.closed_with = Some((code, reason.to_string()));
        Ok(())
    }
}

/// Hands out connected [`MockSocket`]s and keeps their handles.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    handles: Arc<Mutex<Vec<MockSocketHandle>>>,
    refusing: Arc<Mutex<bool>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handles(&self) -> Vec<MockSocketHandle> {
        lock(&self.handles).clone()
    }

    /// Make every later `connect` fail until called with `false`.
    pub fn refuse(&self, refusing: bool) {
        *lock(&self.refusing) = refusing;
    }

    /// Handle of the most recently opened socket.
    pub fn last(&self) -> Option<MockSocketHandle> {
        lock(&self.handles).last().cloned()
    }
}

#[async_trait]
impl SocketConnector for MockConnector {
    async fn connect(&self, kernel_id: &str) -> Result<Box<dyn KernelSocket>, TransportError> {
        if *lock(&self.refusing) {
            return Err(TransportError(format!(
                "websocket handshake for {kernel_id} refused"
            )));
        }
        let state = Arc::new(Mutex::new(SocketState {
            open: true,
            ..Default::default()
        }));
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.handles).push(MockSocketHandle {
            kernel_id: kernel_id.to_string(),
            state: state.clone(),
            inbound: tx,
        });
        Ok(Box::new(MockSocket {
            kernel_id: kernel_id.to_string(),
            state,
            inbound: rx,
        }))
    }
}
