//! Error taxonomy shared by the notebook client.
//!
//! `ApplicationError` is the base every user-facing operation returns. The
//! controller turns it into a notice; callers decide how to surface it.

use plas_wire::ConversionError;

use crate::node::NodeId;

/// Failure at the HTTP or WebSocket layer (connection refused, TLS, bad URL...).
#[derive(Debug, Clone, thiserror::Error)]
#[error("Transport error: {0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError(err.to_string())
    }
}

impl From<url::ParseError> for TransportError {
    fn from(err: url::ParseError) -> Self {
        TransportError(format!("invalid url: {err}"))
    }
}

/// Non-2xx HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{status} - {status_text}")]
pub struct FetchError {
    pub status: u16,
    pub status_text: String,
}

/// Kernel session, queue and transport failures.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("Failed to start kernel ({status}): {descr}")]
    StartFailed { status: u16, descr: String },

    #[error("Failed to restart kernel {kernel_id} ({status}): {descr}")]
    RestartFailed {
        kernel_id: String,
        status: u16,
        descr: String,
    },

    #[error("Kernel request '{operation}' failed: {source}")]
    RequestFailed {
        operation: &'static str,
        #[source]
        source: FetchError,
    },

    #[error("No kernel session; start a kernel first")]
    NoSession,

    #[error("WebSocket is not open; dropped {dropped} queued node(s)")]
    SocketNotOpen { dropped: usize },

    #[error("Interrupt timeout: kernel still busy after {attempts} checks")]
    InterruptTimeout { attempts: u32 },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Malformed kernel frame: {0}")]
    Protocol(#[from] ConversionError),
}

/// Document shape invariant violated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{node_type}] {message}")]
pub struct NodeStructureError {
    pub node_type: String,
    pub message: String,
}

impl NodeStructureError {
    pub fn new(node_type: impl Into<String>) -> Self {
        let node_type = node_type.into();
        let message = format!("Invalid node structure in {node_type} node");
        Self { node_type, message }
    }

    pub fn with_message(node_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            message: message.into(),
        }
    }

    /// No live node carries this identity.
    pub fn missing(node_id: &NodeId) -> Self {
        Self::with_message("Node", format!("no node with id '{node_id}' exists"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Structure(#[from] NodeStructureError),

    #[error("Node {0} cannot be deleted")]
    NotDeletable(NodeId),
}

/// Base error for everything the controller surfaces to the user.
#[derive(Debug, thiserror::Error)]
pub enum ApplicationError {
    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{0}")]
    Other(String),
}

impl From<NodeStructureError> for ApplicationError {
    fn from(err: NodeStructureError) -> Self {
        ApplicationError::Node(NodeError::Structure(err))
    }
}
