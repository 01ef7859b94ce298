use serde::Serialize;
use std::collections::VecDeque;

use crate::node::NodeId;

/// Status of a queued node
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting behind the head
    Pending,
    /// Dispatched, awaiting or receiving results
    Executing,
}

/// A node in the execution queue
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueuedNode {
    pub node_id: NodeId,
    pub status: QueueStatus,
    /// Position in queue (0 = head)
    pub position: usize,
}

/// Queue snapshot carried by `KernelEvent::QueueChanged`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecutionQueueState {
    /// Kernel reported busy, or work is waiting behind the head
    pub running: bool,
    /// Nodes currently in queue (head first)
    pub nodes: Vec<QueuedNode>,
    pub head: Option<NodeId>,
}

impl ExecutionQueueState {
    pub fn is_idle(&self) -> bool {
        self.nodes.is_empty() && !self.running
    }
}

/// Where `enqueue` placed a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Queue was empty; the node should be dispatched now
    Head,
    /// Appended behind other work
    Behind,
    /// Already queued; nothing was added
    AlreadyQueued,
}

/// FIFO of node identities. The head is the node in flight; an identity is
/// queued at most once.
#[derive(Debug, Default)]
pub struct ExecutionQueue {
    tasks: VecDeque<NodeId>,
    running: bool,
}

impl ExecutionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.tasks.contains(node_id)
    }

    pub fn enqueue(&mut self, node_id: NodeId) -> Enqueued {
        if self.contains(&node_id) {
            return Enqueued::AlreadyQueued;
        }
        let was_empty = self.tasks.is_empty();
        self.tasks.push_back(node_id);
        if was_empty {
            Enqueued::Head
        } else {
            Enqueued::Behind
        }
    }

    pub fn head(&self) -> Option<&NodeId> {
        self.tasks.front()
    }

    pub fn pop_head(&mut self) -> Option<NodeId> {
        self.tasks.pop_front()
    }

    /// Collapse to the head only, returning the discarded ids
    pub fn truncate_to_head(&mut self) -> Vec<NodeId> {
        if self.tasks.len() <= 1 {
            return Vec::new();
        }
        self.tasks.drain(1..).collect()
    }

    /// Remove everything, head included
    pub fn drain(&mut self) -> Vec<NodeId> {
        self.tasks.drain(..).collect()
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Empty and not running
    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty() && !self.running
    }

    /// Forget all work and clear the running flag
    pub fn reset(&mut self) -> Vec<NodeId> {
        self.running = false;
        self.drain()
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.tasks.iter().cloned().collect()
    }

    pub fn get_state(&self) -> ExecutionQueueState {
        let nodes = self
            .tasks
            .iter()
            .enumerate()
            .map(|(position, node_id)| QueuedNode {
                node_id: node_id.clone(),
                status: if position == 0 {
                    QueueStatus::Executing
                } else {
                    QueueStatus::Pending
                },
                position,
            })
            .collect();

        ExecutionQueueState {
            running: self.running,
            nodes,
            head: self.tasks.front().cloned(),
        }
    }
}
