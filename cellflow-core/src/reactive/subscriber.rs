//! Subscriber types for the reactive system.
//!
//! A node notifies two kinds of subscribers when it turns dirty:
//!
//! - another node, which is marked dirty in turn and recomputes only when
//!   someone reads it again (pull)
//! - a callback, which runs immediately, during propagation (push)
//!
//! Closures have no identity, so callbacks are registered with the runtime
//! once and referred to by their [`SubscriberId`] afterwards.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::node::NodeRef;
use crate::graph::NodeId;

/// Unique identifier for a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter so IDs stay unique across runtimes and threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Something to notify when a node is invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subscriber {
    /// A dependent node. It is marked dirty, recursively.
    Node(NodeId),

    /// A registered callback. It is invoked with the node that turned dirty.
    Callback(SubscriberId),
}

impl Subscriber {
    pub fn is_node(&self) -> bool {
        matches!(self, Subscriber::Node(_))
    }
}

impl From<NodeId> for Subscriber {
    fn from(id: NodeId) -> Self {
        Subscriber::Node(id)
    }
}

impl From<SubscriberId> for Subscriber {
    fn from(id: SubscriberId) -> Self {
        Subscriber::Callback(id)
    }
}

/// A callback invoked synchronously when a subscribed node turns dirty.
pub type Callback = Arc<dyn Fn(&NodeRef) + Send + Sync>;
