//! Backing output for rendered iterations.
//!
//! The reconciler never inspects output nodes. It positions them only through
//! [`Output::insert_before`] with an anchor node, and moves them by removing
//! and re-inserting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Identity of an output node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

impl NodeId {
    /// Allocate a process-unique node id.
    pub fn fresh() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A node produced by a render unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNode {
    /// Node identity, stable across moves.
    pub id: NodeId,
    /// Rendered text.
    pub text: String,
}

impl OutputNode {
    /// Create a node with a fresh id.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: NodeId::fresh(),
            text: text.into(),
        }
    }
}

/// Destination of rendered nodes.
pub trait Output: Send {
    /// Insert `nodes` immediately before `anchor`, or at the end when `anchor`
    /// is `None` or not present.
    fn insert_before(&mut self, nodes: Vec<OutputNode>, anchor: Option<NodeId>);

    /// Remove the nodes with the given ids, returning them in output order.
    fn remove(&mut self, ids: &[NodeId]) -> Vec<OutputNode>;
}

/// Output shared between a section and its owner.
pub type SharedOutput = Arc<Mutex<dyn Output>>;

/// Flat in-memory output.
///
/// Counts insertions and removals so callers can tell moves from no-ops.
#[derive(Debug, Default)]
pub struct NodeList {
    nodes: Vec<OutputNode>,
    inserted: usize,
    removed: usize,
}

impl NodeList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty list behind a shared handle.
    pub fn shared() -> Arc<Mutex<NodeList>> {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Node texts in output order.
    pub fn texts(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.text.as_str()).collect()
    }

    /// Node ids in output order.
    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id).collect()
    }

    /// Nodes in output order.
    pub fn nodes(&self) -> &[OutputNode] {
        &self.nodes
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if there are no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Position of `id`.
    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Total nodes inserted so far.
    pub fn inserted(&self) -> usize {
        self.inserted
    }

    /// Total nodes removed so far.
    pub fn removed(&self) -> usize {
        self.removed
    }
}

impl Output for NodeList {
    fn insert_before(&mut self, nodes: Vec<OutputNode>, anchor: Option<NodeId>) {
        let at = anchor
            .and_then(|anchor| self.position(anchor))
            .unwrap_or(self.nodes.len());
        self.inserted += nodes.len();
        self.nodes.splice(at..at, nodes);
    }

    fn remove(&mut self, ids: &[NodeId]) -> Vec<OutputNode> {
        let mut removed = Vec::new();
        self.nodes.retain(|node| {
            if ids.contains(&node.id) {
                removed.push(node.clone());
                false
            } else {
                true
            }
        });
        self.removed += removed.len();
        removed
    }
}
