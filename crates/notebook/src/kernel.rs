//! Kernel client: one remote kernel session, one WebSocket, one ordered
//! execution queue.
//!
//! At most one execution is in flight per session, in submission order. The
//! queue head is the node currently awaiting or receiving results; inbound
//! frames are attributed to the node named in the frame, falling back to the
//! head. Everything the UI needs to know is published as [`KernelEvent`]s.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use plas_wire::{ConversionError, ExecuteFrame, FrameFormat, KernelFrame, KernelMessage};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::KernelError;
use crate::execution_queue::{Enqueued, ExecutionQueue, ExecutionQueueState};
use crate::http::{ApiResponse, Method, Transport};
use crate::node::{Document, NodeId};
use crate::session::SessionStore;
use crate::ws::{KernelSocket, SocketConnector};

/// Close code and reason used when replacing the socket on (re)start.
pub const RESTART_CLOSE_CODE: u16 = 1000;
pub const RESTART_CLOSE_REASON: &str = "Disconnect to restart the kernel.";

/// Close code used on shutdown; the server treats it as a page close.
pub const SHUTDOWN_CLOSE_CODE: u16 = 1001;
pub const SHUTDOWN_CLOSE_REASON: &str = "Client is going away.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Absent,
    Starting,
    Connected,
    Busy,
    Idle,
    Restarting,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KernelEvent {
    QueueChanged(ExecutionQueueState),
    /// An execute frame was sent; the node's output area should be cleared.
    Dispatched { node_id: NodeId },
    /// A message to render into `target`'s output area.
    MessageReceived {
        target: Option<NodeId>,
        message: KernelMessage,
    },
    /// Queued work dropped without running (after an error, a restart, or a dead socket).
    TasksDiscarded { node_ids: Vec<NodeId> },
    LifecycleChanged(SessionState),
}

/// Resolves a node's current source at dispatch time.
pub trait CodeSource {
    fn code_of(&self, node_id: &NodeId) -> Option<String>;
}

impl CodeSource for Document {
    fn code_of(&self, node_id: &NodeId) -> Option<String> {
        self.code(node_id).ok().map(|code| code.value().to_string())
    }
}

impl CodeSource for HashMap<NodeId, String> {
    fn code_of(&self, node_id: &NodeId) -> Option<String> {
        self.get(node_id).cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelOptions {
    pub frame_format: FrameFormat,
    /// Failed idle checks tolerated by `execute_all` before it gives up
    pub execute_all_retries: u32,
    pub execute_all_interval: Duration,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            frame_format: FrameFormat::Identity,
            execute_all_retries: 5,
            execute_all_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AliveReply {
    #[serde(default)]
    is_alive: bool,
}

#[derive(Debug, Deserialize)]
struct InventoryReply {
    #[serde(default)]
    kernel_ids: Vec<String>,
}

pub struct KernelClient {
    transport: Arc<dyn Transport>,
    connector: Arc<dyn SocketConnector>,
    store: Arc<dyn SessionStore>,
    options: KernelOptions,
    kernel_id: Option<String>,
    socket: Option<Box<dyn KernelSocket>>,
    queue: ExecutionQueue,
    exec_count: u64,
    state: SessionState,
    events: mpsc::UnboundedSender<KernelEvent>,
}

impl KernelClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        connector: Arc<dyn SocketConnector>,
        store: Arc<dyn SessionStore>,
        options: KernelOptions,
    ) -> (Self, mpsc::UnboundedReceiver<KernelEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let client = Self {
            transport,
            connector,
            store,
            options,
            kernel_id: None,
            socket: None,
            queue: ExecutionQueue::new(),
            exec_count: 0,
            state: SessionState::Absent,
            events,
        };
        (client, rx)
    }

    pub fn kernel_id(&self) -> Option<&str> {
        self.kernel_id.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn options(&self) -> &KernelOptions {
        &self.options
    }

    pub fn queue_state(&self) -> ExecutionQueueState {
        self.queue.get_state()
    }

    pub fn is_running(&self) -> bool {
        self.queue.running()
    }

    /// Queue empty and not running.
    pub fn is_idle(&self) -> bool {
        self.queue.is_idle()
    }

    /// Execute frames sent since the last (re)start.
    pub fn exec_count(&self) -> u64 {
        self.exec_count
    }

    pub fn is_connected(&self) -> bool {
        self.socket.as_ref().is_some_and(|s| s.is_open())
    }

    fn emit(&self, event: KernelEvent) {
        if self.events.send(event).is_err() {
            debug!("[kernel] Event receiver dropped");
        }
    }

    fn emit_queue_state(&self) {
        self.emit(KernelEvent::QueueChanged(self.queue.get_state()));
    }

    fn emit_discarded(&self, node_ids: Vec<NodeId>) {
        if node_ids.is_empty() {
            return;
        }
        info!("[queue] Discarded {} queued node(s)", node_ids.len());
        self.emit(KernelEvent::TasksDiscarded { node_ids });
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("[kernel] {:?} -> {:?}", self.state, state);
            self.state = state;
            self.emit(KernelEvent::LifecycleChanged(state));
        }
    }

    fn session_id(&self, kernel_id: Option<&str>) -> Result<String, KernelError> {
        kernel_id
            .map(str::to_string)
            .or_else(|| self.kernel_id.clone())
            .or_else(|| self.store.load_kernel_id())
            .ok_or(KernelError::NoSession)
    }

    async fn call(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
    ) -> Result<ApiResponse, KernelError> {
        let response = self.transport.request(method, path, None).await?;
        if !response.is_success() {
            return Err(KernelError::RequestFailed {
                operation,
                source: response.fetch_error(),
            });
        }
        Ok(response)
    }

    async fn close_socket(&mut self, code: u16, reason: &str) {
        if let Some(mut socket) = self.socket.take() {
            if socket.is_open() {
                if let Err(e) = socket.close(code, reason).await {
                    warn!("[kernel] Failed to close socket: {}", e);
                }
            }
        }
    }

    /// Start a fresh kernel, or restart the stored one when `reuse_existing`.
    ///
    /// Closes the current socket first and resets the queue, the running flag
    /// and the execution counter. Frames in flight on the old socket are lost.
    pub async fn set_up_kernel(&mut self, reuse_existing: bool) -> Result<String, KernelError> {
        let existing = self.kernel_id.clone().or_else(|| self.store.load_kernel_id());
        let restart = reuse_existing && existing.is_some();
        self.set_state(if restart {
            SessionState::Restarting
        } else {
            SessionState::Starting
        });

        self.close_socket(RESTART_CLOSE_CODE, RESTART_CLOSE_REASON).await;
        let discarded = self.queue.reset();
        self.exec_count = 0;
        self.emit_discarded(discarded);
        self.emit_queue_state();

        match self.open_session(existing.filter(|_| restart)).await {
            Ok(kernel_id) => {
                self.set_state(SessionState::Connected);
                info!("[kernel] Session ready: {}", kernel_id);
                Ok(kernel_id)
            }
            Err(e) => {
                error!("[kernel] Session setup failed: {}", e);
                self.set_state(SessionState::Absent);
                Err(e)
            }
        }
    }

    /// Restart `existing` or start a new kernel, then attach a socket. The id
    /// is stored only once the socket is open.
    async fn open_session(&mut self, existing: Option<String>) -> Result<String, KernelError> {
        let kernel_id = match existing {
            Some(kernel_id) => {
                let response = self
                    .transport
                    .request(Method::Post, &format!("/kernels/{kernel_id}/restart"), None)
                    .await?;
                if !response.is_success() {
                    return Err(KernelError::RestartFailed {
                        kernel_id,
                        status: response.status,
                        descr: response.descr().to_string(),
                    });
                }
                info!("[kernel] {}", response.descr());
                kernel_id
            }
            None => {
                let kernel_id = Uuid::new_v4().to_string();
                let response = self
                    .transport
                    .request(Method::Post, &format!("/kernels/{kernel_id}"), None)
                    .await?;
                if !response.is_success() {
                    return Err(KernelError::StartFailed {
                        status: response.status,
                        descr: response.descr().to_string(),
                    });
                }
                info!("[kernel] {}", response.descr());
                kernel_id
            }
        };

        self.socket = Some(self.connector.connect(&kernel_id).await?);
        self.store.save_kernel_id(&kernel_id);
        self.kernel_id = Some(kernel_id.clone());
        Ok(kernel_id)
    }

    /// Reuse the stored kernel if the server still has it alive, else start fresh.
    pub async fn reattach(&mut self) -> Result<String, KernelError> {
        let Some(stored) = self.store.load_kernel_id() else {
            return self.set_up_kernel(false).await;
        };
        match self.is_alive_kernel(Some(&stored)).await {
            Ok(true) => {
                info!("[kernel] Reattaching to {}", stored);
                self.kernel_id = Some(stored);
                self.set_up_kernel(true).await
            }
            Ok(false) => {
                info!("[kernel] Stored kernel {} is gone", stored);
                self.store.clear();
                self.set_up_kernel(false).await
            }
            Err(e) => {
                warn!("[kernel] Could not check stored kernel {}: {}", stored, e);
                self.store.clear();
                self.set_up_kernel(false).await
            }
        }
    }

    /// Queue a node for execution. A node that is already queued is an
    /// interrupt request instead.
    ///
    /// Without an open socket nothing can run: the queue drains and the call
    /// fails with `SocketNotOpen`.
    pub async fn execute<C: CodeSource + ?Sized>(
        &mut self,
        node_id: NodeId,
        code: &C,
    ) -> Result<(), KernelError> {
        if !self.is_connected() {
            self.queue.enqueue(node_id);
            return self.dispatch(code).await;
        }
        if self.queue.contains(&node_id) {
            info!("[queue] {} already queued, interrupting", node_id);
            return self.kernel_interrupt().await;
        }

        match self.queue.enqueue(node_id) {
            Enqueued::Head => {
                self.emit_queue_state();
                self.dispatch(code).await
            }
            Enqueued::Behind => {
                self.queue.set_running(true);
                self.emit_queue_state();
                Ok(())
            }
            Enqueued::AlreadyQueued => Ok(()),
        }
    }

    /// Interrupt, wait for the queue to go idle, then queue `node_ids` in order.
    ///
    /// Fails with `InterruptTimeout`, leaving the queue untouched, if the
    /// queue is still busy after the retry budget.
    pub async fn execute_all<C: CodeSource + ?Sized>(
        &mut self,
        node_ids: Vec<NodeId>,
        code: &C,
    ) -> Result<(), KernelError> {
        self.kernel_interrupt().await?;

        let mut failed: u32 = 0;
        while !self.queue.is_idle() {
            failed += 1;
            if failed > self.options.execute_all_retries {
                warn!("[queue] Still busy after {} checks, giving up", failed);
                return Err(KernelError::InterruptTimeout { attempts: failed });
            }
            debug!("[queue] Busy, waiting (check {})", failed);
            self.wait_for_frames(self.options.execute_all_interval, code)
                .await;
        }

        for node_id in node_ids {
            self.queue.enqueue(node_id);
        }
        self.emit_queue_state();
        self.dispatch(code).await
    }

    /// Handle inbound frames for up to `period`.
    async fn wait_for_frames<C: CodeSource + ?Sized>(&mut self, period: Duration, code: &C) {
        let deadline = Instant::now() + period;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            if !self.is_connected() {
                tokio::time::sleep_until(deadline).await;
                return;
            }
            match tokio::time::timeout(deadline - now, self.next_message(code)).await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    tokio::time::sleep_until(deadline).await;
                    return;
                }
                Ok(Err(e)) => warn!("[kernel] Ignoring bad frame while waiting: {}", e),
                Err(_) => return,
            }
        }
    }

    /// `POST /kernels/{id}/interrupt`. The local queue is left alone.
    pub async fn kernel_interrupt(&self) -> Result<(), KernelError> {
        let kernel_id = self.session_id(None)?;
        self.call(
            "interrupt",
            Method::Post,
            &format!("/kernels/{kernel_id}/interrupt"),
        )
        .await?;
        info!("[kernel] Interrupt requested for {}", kernel_id);
        Ok(())
    }

    pub async fn is_alive_kernel(&self, kernel_id: Option<&str>) -> Result<bool, KernelError> {
        let kernel_id = self.session_id(kernel_id)?;
        let response = self
            .call("is_alive", Method::Get, &format!("/kernels/{kernel_id}"))
            .await?;
        Ok(response.json::<AliveReply>()?.is_alive)
    }

    pub async fn get_kernel_ids(&self) -> Result<Vec<String>, KernelError> {
        let response = self.call("list", Method::Get, "/kernels").await?;
        Ok(response.json::<InventoryReply>()?.kernel_ids)
    }

    /// Close the socket, shut the kernel down and forget the session. Without
    /// a live session the stored kernel id is shut down.
    pub async fn shutdown(&mut self) -> Result<(), KernelError> {
        self.close_socket(SHUTDOWN_CLOSE_CODE, SHUTDOWN_CLOSE_REASON)
            .await;
        let discarded = self.queue.reset();
        self.emit_discarded(discarded);
        self.emit_queue_state();

        let result = match self.kernel_id.take().or_else(|| self.store.load_kernel_id()) {
            Some(kernel_id) => {
                let result = self
                    .call("shutdown", Method::Delete, &format!("/kernels/{kernel_id}"))
                    .await
                    .map(|_| ());
                info!("[kernel] Shut down {}", kernel_id);
                result
            }
            None => Ok(()),
        };
        self.store.clear();
        self.set_state(SessionState::Closed);
        result
    }

    /// Send the queue head. Heads whose node is gone are skipped.
    async fn dispatch<C: CodeSource + ?Sized>(&mut self, code: &C) -> Result<(), KernelError> {
        loop {
            let Some(head) = self.queue.head().cloned() else {
                return Ok(());
            };

            if !self.is_connected() {
                let dropped = self.queue.reset();
                let count = dropped.len();
                error!("[queue] Socket not open, dropping {} node(s)", count);
                self.emit_discarded(dropped);
                self.emit_queue_state();
                return Err(KernelError::SocketNotOpen { dropped: count });
            }

            let Some(source) = code.code_of(&head) else {
                info!("[queue] Node {} not found, skipping", head);
                self.queue.pop_head();
                self.emit_discarded(vec![head]);
                self.emit_queue_state();
                continue;
            };

            let frame = ExecuteFrame::new(self.options.frame_format, source, head.as_str())
                .to_json()
                .map_err(ConversionError::from)?;

            let sent = match self.socket.as_mut() {
                Some(socket) => socket.send_text(frame).await,
                None => Ok(()),
            };
            if let Err(e) = sent {
                let dropped = self.queue.reset();
                self.emit_discarded(dropped);
                self.emit_queue_state();
                return Err(e.into());
            }

            self.exec_count += 1;
            info!("[queue] Dispatched {} (#{})", head, self.exec_count);
            self.emit(KernelEvent::Dispatched { node_id: head });
            return Ok(());
        }
    }

    /// Await one inbound frame and run it through the state machine.
    ///
    /// Returns `false` once the socket has closed. Work still queued at that
    /// point is discarded.
    pub async fn next_message<C: CodeSource + ?Sized>(
        &mut self,
        code: &C,
    ) -> Result<bool, KernelError> {
        let socket = self.socket.as_mut().ok_or(KernelError::NoSession)?;
        match socket.recv_text().await {
            Some(text) => {
                self.handle_frame(&text, code).await?;
                Ok(true)
            }
            None => {
                if self.state != SessionState::Closed {
                    warn!("[kernel] Socket closed by server");
                }
                self.socket = None;
                let discarded = self.queue.reset();
                self.emit_discarded(discarded);
                self.emit_queue_state();
                self.set_state(SessionState::Closed);
                Ok(false)
            }
        }
    }

    pub async fn handle_frame<C: CodeSource + ?Sized>(
        &mut self,
        text: &str,
        code: &C,
    ) -> Result<(), KernelError> {
        let frame = match KernelFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                let error_frame = matches!(
                    &e,
                    ConversionError::ContentParseError { msg_type, .. } if msg_type == "error"
                );
                if error_frame {
                    let discarded = self.queue.truncate_to_head();
                    self.emit_discarded(discarded);
                    self.emit_queue_state();
                }
                return Err(e.into());
            }
        };
        let target = frame
            .node_id
            .map(NodeId::from)
            .or_else(|| self.queue.head().cloned());
        debug!(
            "[kernel] {} for {:?}",
            frame.message.msg_type(),
            target.as_ref().map(NodeId::as_str)
        );

        match frame.message {
            message if message.is_busy_status() => {
                self.queue.set_running(true);
                self.set_state(SessionState::Busy);
                self.emit_queue_state();
            }
            KernelMessage::ExecEnd => {
                self.queue.pop_head();
                self.queue.set_running(false);
                self.set_state(SessionState::Idle);
                self.emit_queue_state();
                if !self.queue.is_empty() {
                    self.dispatch(code).await?;
                }
            }
            message @ KernelMessage::Error(_) => {
                let discarded = self.queue.truncate_to_head();
                self.emit_discarded(discarded);
                self.emit_queue_state();
                self.emit(KernelEvent::MessageReceived { target, message });
            }
            message => {
                self.emit(KernelEvent::MessageReceived { target, message });
            }
        }
        Ok(())
    }
}
