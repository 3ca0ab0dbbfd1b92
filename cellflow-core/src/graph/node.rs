//! Graph Nodes
//!
//! This module defines the slots that live in the node arena. A slot holds
//! everything the engine knows about one cell: its producer, the cached
//! value, its dirty state and both directions of its dependency edges.
//!
//! Values and producers are type-erased here. The typed
//! [`Node`](crate::reactive::Node) handle is the only way to reach a slot,
//! so the erased types always match the handle's `T`.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use slotmap::new_key_type;

use crate::error::Result;
use crate::reactive::Subscriber;

new_key_type! {
    /// Stable, generational handle to a node in the arena.
    ///
    /// A key is never reused for a different node, so a handle that outlives
    /// its node reports `Disposed` instead of reading someone else's value.
    pub struct NodeId;
}

/// A cached value with its concrete type erased.
pub(crate) type ErasedValue = Box<dyn Any + Send + Sync>;

/// A producer with its return type erased.
pub(crate) type ErasedProducer = Arc<dyn Fn() -> Result<ErasedValue> + Send + Sync>;

/// Dirty state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirtyState {
    /// The cached value is exactly what the producer returns right now.
    Clean,

    /// The cached value is stale or missing and must be recomputed on read.
    Dirty,
}

impl fmt::Display for DirtyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirtyState::Clean => f.write_str("clean"),
            DirtyState::Dirty => f.write_str("dirty"),
        }
    }
}

/// One cell in the arena.
pub(crate) struct NodeSlot {
    name: Option<String>,
    producer: ErasedProducer,
    value: Option<ErasedValue>,
    state: DirtyState,

    /// Bumped on every invalidation and producer swap. An evaluation only
    /// caches its result if the epoch did not move while it ran.
    epoch: u64,

    /// Nodes read during the last successful evaluation, in read order.
    sources: IndexSet<NodeId>,

    /// Transitive closure of `sources`. Only used to reject cycles.
    all_sources: HashSet<NodeId>,

    /// Who to invalidate when this node turns dirty, in subscription order.
    subscribers: IndexSet<Subscriber>,
}

impl NodeSlot {
    /// Create a slot. New slots start dirty and are not evaluated until read.
    pub fn new(name: Option<String>, producer: ErasedProducer) -> Self {
        Self {
            name,
            producer,
            value: None,
            state: DirtyState::Dirty,
            epoch: 0,
            sources: IndexSet::new(),
            all_sources: HashSet::new(),
            subscribers: IndexSet::new(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn state(&self) -> DirtyState {
        self.state
    }

    /// Mark the slot dirty. Returns `false` if it already was.
    pub fn mark_dirty(&mut self) -> bool {
        self.epoch += 1;
        if self.state == DirtyState::Dirty {
            return false;
        }
        self.state = DirtyState::Dirty;
        true
    }

    /// Store a freshly computed value and mark the slot clean.
    pub fn store(&mut self, value: ErasedValue) {
        self.value = Some(value);
        self.state = DirtyState::Clean;
    }

    /// The cached value, if the slot is clean.
    pub fn value(&self) -> Option<&ErasedValue> {
        match self.state {
            DirtyState::Clean => self.value.as_ref(),
            DirtyState::Dirty => None,
        }
    }

    pub fn producer(&self) -> ErasedProducer {
        Arc::clone(&self.producer)
    }

    pub fn set_producer(&mut self, producer: ErasedProducer) {
        self.producer = producer;
        self.epoch += 1;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn sources(&self) -> &IndexSet<NodeId> {
        &self.sources
    }

    pub fn all_sources(&self) -> &HashSet<NodeId> {
        &self.all_sources
    }

    pub(super) fn replace_sources(
        &mut self,
        sources: IndexSet<NodeId>,
        all_sources: HashSet<NodeId>,
    ) {
        self.sources = sources;
        self.all_sources = all_sources;
    }

    pub fn subscribers(&self) -> &IndexSet<Subscriber> {
        &self.subscribers
    }

    /// Returns `true` if the subscriber was not already present.
    pub fn add_subscriber(&mut self, subscriber: Subscriber) -> bool {
        self.subscribers.insert(subscriber)
    }

    /// Returns `true` if the subscriber was present.
    pub fn remove_subscriber(&mut self, subscriber: &Subscriber) -> bool {
        // shift_remove keeps notification order stable for the rest
        self.subscribers.shift_remove(subscriber)
    }
}

impl fmt::Debug for NodeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSlot")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("sources", &self.sources)
            .field("subscriber_count", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::SubscriberId;

    fn constant(value: i32) -> ErasedProducer {
        Arc::new(move || Ok(Box::new(value) as ErasedValue))
    }

    #[test]
    fn new_slot_starts_dirty_without_value() {
        let slot = NodeSlot::new(Some("a".into()), constant(1));
        assert_eq!(slot.state(), DirtyState::Dirty);
        assert_eq!(slot.name(), Some("a"));
        assert!(slot.value().is_none());
    }

    #[test]
    fn store_cleans_and_mark_dirty_is_idempotent() {
        let mut slot = NodeSlot::new(None, constant(1));
        slot.store(Box::new(7i32));
        assert_eq!(slot.state(), DirtyState::Clean);
        assert_eq!(slot.value().and_then(|v| v.downcast_ref::<i32>()), Some(&7));

        assert!(slot.mark_dirty());
        assert!(!slot.mark_dirty());
        assert!(slot.value().is_none());
        assert_eq!(slot.epoch(), 2);
    }

    #[test]
    fn subscribers_keep_insertion_order() {
        let mut slot = NodeSlot::new(None, constant(1));
        let first = Subscriber::Callback(SubscriberId::new());
        let second = Subscriber::Callback(SubscriberId::new());
        let third = Subscriber::Callback(SubscriberId::new());

        assert!(slot.add_subscriber(first));
        assert!(slot.add_subscriber(second));
        assert!(slot.add_subscriber(third));
        assert!(!slot.add_subscriber(second));

        assert!(slot.remove_subscriber(&second));
        assert!(!slot.remove_subscriber(&second));
        let order: Vec<_> = slot.subscribers().iter().copied().collect();
        assert_eq!(order, vec![first, third]);
    }

    #[test]
    fn dirty_state_displays_lowercase() {
        assert_eq!(DirtyState::Clean.to_string(), "clean");
        assert_eq!(DirtyState::Dirty.to_string(), "dirty");
    }
}
