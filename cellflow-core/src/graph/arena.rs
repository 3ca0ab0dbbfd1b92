//! Node Arena
//!
//! The arena owns every node slot and keeps the two directions of each
//! dependency edge in sync:
//!
//! - `sources`: what a node read during its last evaluation
//! - `subscribers`: who must be invalidated when a node turns dirty
//!
//! A tracked read subscribes the reader to its target on the spot, so a
//! write racing with an evaluation still reaches the evaluating node. Once
//! the evaluation settles, the source set is rewritten as a whole: sources
//! that were not read again are unsubscribed. An evaluation that does not
//! settle gives back the edges it added. The arena never runs user code; the
//! runtime calls into it while holding its lock.

use std::collections::HashSet;

use indexmap::IndexSet;
use slotmap::SlotMap;

use super::node::{NodeId, NodeSlot};
use crate::reactive::{Subscriber, SubscriberId};

/// Outcome of replacing a node's source set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Rewire {
    pub added: usize,
    pub removed: usize,
}

/// Arena of nodes addressed by generational [`NodeId`]s.
#[derive(Debug, Default)]
pub(crate) struct Graph {
    nodes: SlotMap<NodeId, NodeSlot>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
        }
    }

    pub fn insert(&mut self, slot: NodeSlot) -> NodeId {
        self.nodes.insert(slot)
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeSlot> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeSlot> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Remove a node and detach it from all of its sources.
    ///
    /// Subscribers keep the id in their own source sets; their next
    /// evaluation drops it.
    pub fn remove(&mut self, id: NodeId) -> Option<NodeSlot> {
        let slot = self.nodes.remove(id)?;
        for &source in slot.sources() {
            self.remove_edge(source, id);
        }
        Some(slot)
    }

    /// Add an edge: `dependent` is invalidated whenever `source` is.
    pub fn add_edge(&mut self, source: NodeId, dependent: NodeId) -> bool {
        self.nodes
            .get_mut(source)
            .map(|slot| slot.add_subscriber(Subscriber::Node(dependent)))
            .unwrap_or(false)
    }

    /// Remove a dependency edge.
    pub fn remove_edge(&mut self, source: NodeId, dependent: NodeId) -> bool {
        self.nodes
            .get_mut(source)
            .map(|slot| slot.remove_subscriber(&Subscriber::Node(dependent)))
            .unwrap_or(false)
    }

    /// Replace `owner`'s sources with the set observed during its latest
    /// evaluation, subscribing to new sources, unsubscribing from dropped
    /// ones, and recomputing the transitive closure.
    pub fn rewire(&mut self, owner: NodeId, mut sources: IndexSet<NodeId>) -> Rewire {
        // a source may have been destroyed after it was read
        sources.retain(|source| self.nodes.contains_key(*source));

        let old: IndexSet<NodeId> = match self.nodes.get(owner) {
            Some(slot) => slot.sources().clone(),
            None => return Rewire::default(),
        };

        let mut rewire = Rewire::default();
        for &source in old.iter().filter(|s| !sources.contains(*s)) {
            self.remove_edge(source, owner);
            rewire.removed += 1;
        }
        for &source in sources.iter().filter(|s| !old.contains(*s)) {
            self.add_edge(source, owner);
            rewire.added += 1;
        }

        let all_sources = self.closure_of(&sources);
        if let Some(slot) = self.nodes.get_mut(owner) {
            slot.replace_sources(sources, all_sources);
        }
        rewire
    }

    /// `sources ∪ ⋃ s.all_sources` over every source.
    fn closure_of(&self, sources: &IndexSet<NodeId>) -> HashSet<NodeId> {
        let mut all: HashSet<NodeId> = sources.iter().copied().collect();
        for source in sources {
            if let Some(slot) = self.nodes.get(*source) {
                all.extend(slot.all_sources().iter().copied());
            }
        }
        all
    }

    /// Whether `target` already depends, directly or transitively, on `reader`.
    pub fn depends_on(&self, target: NodeId, reader: NodeId) -> bool {
        self.nodes
            .get(target)
            .map(|slot| slot.all_sources().contains(&reader))
            .unwrap_or(false)
    }

    /// Undo the edges an unsettled evaluation of `owner` added.
    ///
    /// Reads of nodes that were already sources keep their edge. If `owner`
    /// is gone, every edge from `reads` to it is dropped.
    pub fn release(&mut self, owner: NodeId, reads: &IndexSet<NodeId>) -> usize {
        let kept = self
            .nodes
            .get(owner)
            .map(|slot| slot.sources().clone())
            .unwrap_or_default();
        reads
            .iter()
            .filter(|source| !kept.contains(*source))
            .map(|&source| self.remove_edge(source, owner))
            .filter(|removed| *removed)
            .count()
    }

    /// Mark `root` and everything downstream of it dirty.
    ///
    /// Nodes already dirty stop the walk, except `root` itself when `force`
    /// is set. Returns the callbacks to notify, paired with the node they
    /// are subscribed to, in depth-first order. No callback is collected
    /// before the whole walk has finished, so every dependent is dirty by
    /// the time the first one runs.
    pub fn invalidate(&mut self, root: NodeId, force: bool) -> Vec<(NodeId, SubscriberId)> {
        let mut notify = Vec::new();
        let mut pending = vec![(root, force)];
        while let Some((id, force)) = pending.pop() {
            let Some(slot) = self.nodes.get_mut(id) else {
                continue;
            };
            if !slot.mark_dirty() && !force {
                continue;
            }
            let mut dependents = Vec::new();
            for subscriber in slot.subscribers() {
                match *subscriber {
                    Subscriber::Node(dependent) => dependents.push((dependent, false)),
                    Subscriber::Callback(callback) => notify.push((id, callback)),
                }
            }
            // reversed so the first subscriber is walked first
            pending.extend(dependents.into_iter().rev());
        }
        notify
    }

    /// Drop `subscriber` from every node that lists it.
    pub fn remove_subscriber_everywhere(&mut self, subscriber: &Subscriber) -> usize {
        self.nodes
            .values_mut()
            .map(|slot| slot.remove_subscriber(subscriber))
            .filter(|removed| *removed)
            .count()
    }
}
