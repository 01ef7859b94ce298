//! Notebook client for the plas exercise platform.
//!
//! A page is a [`Document`] of Code, Explain and Question nodes built from the
//! server's page record. Code runs on a remote kernel through a
//! [`KernelClient`], which keeps one WebSocket and one FIFO execution queue
//! per session. Questions are graded by the [`ScoringClient`] and restored to
//! their original content by the [`ResetManager`]; the [`SaveClient`] persists
//! learner answers and authored pages. The [`NotebookController`]
//! ties these together behind button actions and keyboard shortcuts.

pub mod controller;
pub mod editor;
pub mod error;
pub mod execution_queue;
pub mod http;
pub mod kernel;
pub mod node;
pub mod page;
pub mod render;
pub mod reset;
pub mod save;
pub mod scoring;
pub mod session;
pub mod settings;
#[cfg(any(feature = "testing", test))]
pub mod testing;
pub mod ws;

pub use controller::{Action, Key, Notice, NoticeLevel, NotebookController};
pub use error::{
    ApplicationError, FetchError, KernelError, NodeError, NodeStructureError, TransportError,
};
pub use execution_queue::{ExecutionQueue, ExecutionQueueState};
pub use http::{HttpApi, Method, Transport};
pub use kernel::{KernelClient, KernelEvent, KernelOptions, SessionState};
pub use node::{Document, Node, NodeId, NodeType};
pub use page::{Page, ProblemInfo, ViewMode};
pub use reset::ResetManager;
pub use save::SaveClient;
pub use scoring::{ScoringClient, ScoringOutcome};
pub use session::{FileSessionStore, MemorySessionStore, SessionStore};
pub use settings::ClientSettings;
pub use ws::{SocketConnector, WsConnector};
