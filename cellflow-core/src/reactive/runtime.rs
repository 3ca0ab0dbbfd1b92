//! Reactive Runtime
//!
//! The runtime is the central coordinator. It owns the node arena, the
//! callback registry and the evaluation context stacks, and it implements
//! the two phases of the engine:
//!
//! 1. Pull. Reading a dirty node pushes an evaluation frame and runs the
//!    producer with the lock released. Each tracked read subscribes the
//!    node to what it read right away; afterwards the subscriptions are
//!    trimmed to exactly the set of nodes the producer read.
//!
//! 2. Push. Marking a node dirty walks its subscribers depth-first under
//!    the lock, marking every dependent dirty. The callbacks met along the
//!    way run afterwards, in walk order, with the lock released. Nothing is
//!    recomputed during this phase.
//!
//! # Thread Safety
//!
//! All graph state sits behind one `parking_lot` mutex. The lock is never
//! held while user code runs, so producers may read other nodes and
//! callbacks may read or write nodes. Evaluation frames are kept per OS
//! thread, so reads are always attributed to the producer running on the
//! same thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::context::{ContextStacks, EvalFrame, ReactiveContext};
use super::node::NodeRef;
use super::subscriber::{Callback, Subscriber, SubscriberId};
use crate::config::RuntimeConfig;
use crate::error::{ReactiveError, Result};
use crate::graph::{DirtyState, ErasedProducer, ErasedValue, Graph, NodeId, NodeSlot};

/// Remaining stack below which a producer is moved onto a fresh segment.
const STACK_RED_ZONE: usize = 64 * 1024;

/// Size of each fresh stack segment.
const STACK_SEGMENT: usize = 1024 * 1024;

/// Everything guarded by the runtime lock.
struct Inner {
    graph: Graph,
    callbacks: HashMap<SubscriberId, Callback>,
    contexts: ContextStacks,
    config: RuntimeConfig,
}

impl Inner {
    fn label(&self, id: NodeId) -> String {
        self.graph
            .get(id)
            .and_then(|slot| slot.name())
            .unwrap_or(self.config.default_label.as_str())
            .to_string()
    }

    /// Diagnostic identity: label plus current state.
    fn describe(&self, id: NodeId) -> String {
        match self.graph.get(id) {
            Some(slot) => format!("`{}` [{}]", self.label(id), slot.state()),
            None => format!("{:?} [destroyed]", id),
        }
    }

    /// Attribute a read of `target` to the producer currently running on
    /// this thread, or reject it if it would close a cycle.
    ///
    /// A read is cyclic when `target` is itself being evaluated further down
    /// the stack, or when `target` already depends on the reader.
    fn track_read(&mut self, target: NodeId, tracked: bool) -> Result<()> {
        let Some(reader) = self.contexts.current().map(|frame| frame.owner) else {
            return Ok(());
        };

        let cyclic = self.contexts.is_evaluating(target)
            || (tracked && self.graph.depends_on(target, reader));
        if cyclic {
            warn!(reader = ?reader, target = ?target, "rejected read that would close a cycle");
            return Err(ReactiveError::CircularDependency {
                reader: self.describe(reader),
                target: self.describe(target),
            });
        }

        if tracked {
            self.contexts.record(target);
            // subscribe now so a concurrent write reaches the reader mid-evaluation
            self.graph.add_edge(target, reader);
        }
        Ok(())
    }

    fn type_mismatch(&self, id: NodeId) -> ReactiveError {
        ReactiveError::TypeMismatch {
            node: self.describe(id),
        }
    }
}

fn downcast<T: Clone + 'static>(value: &ErasedValue) -> Option<T> {
    (**value).downcast_ref::<T>().cloned()
}

/// Owner of a reactive graph.
///
/// A `Runtime` is a cheap, clonable handle; clones share the same graph.
/// Independent runtimes never see each other's nodes or evaluation state.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Mutex<Inner>>,
}

/// Non-owning handle to a runtime, held by nodes.
#[derive(Clone)]
pub(crate) struct WeakRuntime {
    inner: Weak<Mutex<Inner>>,
}

impl WeakRuntime {
    pub fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        debug!(max_depth = config.max_depth, "creating runtime");
        Self {
            inner: Arc::new(Mutex::new(Inner {
                graph: Graph::new(),
                callbacks: HashMap::new(),
                contexts: ContextStacks::new(),
                config,
            })),
        }
    }

    pub fn config(&self) -> RuntimeConfig {
        self.inner.lock().config.clone()
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.inner.lock().graph.len()
    }

    /// Whether a producer is currently running on this thread.
    pub fn is_tracking(&self) -> bool {
        self.evaluation_depth() > 0
    }

    /// Number of producers currently running on this thread.
    pub fn evaluation_depth(&self) -> usize {
        self.inner.lock().contexts.depth()
    }

    /// Register a callback so it can be subscribed to nodes.
    ///
    /// The same id may be subscribed to any number of nodes; the callback
    /// receives the node that turned dirty.
    pub fn register_callback<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&NodeRef) + Send + Sync + 'static,
    {
        let id = SubscriberId::new();
        self.inner.lock().callbacks.insert(id, Arc::new(callback));
        id
    }

    /// Forget a callback and unsubscribe it from every node.
    ///
    /// Returns `false` if the id was not registered.
    pub fn remove_callback(&self, id: SubscriberId) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.callbacks.remove(&id).is_some();
        let detached = inner
            .graph
            .remove_subscriber_everywhere(&Subscriber::Callback(id));
        debug!(callback = id.raw(), detached, "removed callback");
        removed
    }

    /// Whether both handles point at the same graph.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // ------------------------------------------------------------------
    // Evaluation frames
    // ------------------------------------------------------------------

    pub(crate) fn push_frame(&self, owner: NodeId) {
        self.inner.lock().contexts.push(owner);
    }

    pub(crate) fn pop_frame(&self, owner: NodeId) -> Option<EvalFrame> {
        self.inner.lock().contexts.pop(owner)
    }

    /// Pop a frame whose evaluation did not complete and give back the
    /// subscriptions its reads added.
    pub(crate) fn abandon_frame(&self, owner: NodeId) {
        let mut inner = self.inner.lock();
        if let Some(frame) = inner.contexts.pop(owner) {
            let released = inner.graph.release(owner, &frame.new_sources);
            if released > 0 {
                trace!(node = ?owner, released, "released reads of abandoned evaluation");
            }
        }
    }

    // ------------------------------------------------------------------
    // Node operations
    // ------------------------------------------------------------------

    pub(crate) fn insert(&self, name: Option<String>, producer: ErasedProducer) -> NodeId {
        let id = self.inner.lock().graph.insert(NodeSlot::new(name, producer));
        trace!(node = ?id, "created node");
        id
    }

    /// Read a node, recomputing it first if it is dirty.
    ///
    /// With `tracked` set, the read is recorded as a dependency of the
    /// producer currently running on this thread.
    pub(crate) fn read<T: Clone + 'static>(&self, id: NodeId, tracked: bool) -> Result<T> {
        let (producer, epoch) = {
            let mut inner = self.inner.lock();
            if !inner.graph.contains(id) {
                return Err(ReactiveError::Disposed { id });
            }
            inner.track_read(id, tracked)?;

            let slot = inner.graph.get(id).ok_or(ReactiveError::Disposed { id })?;
            if let Some(value) = slot.value() {
                return downcast::<T>(value).ok_or_else(|| inner.type_mismatch(id));
            }

            let limit = inner.config.max_depth;
            if inner.contexts.depth() >= limit {
                warn!(node = ?id, limit, "evaluation nested too deeply");
                return Err(ReactiveError::DepthExceeded { limit });
            }
            (slot.producer(), slot.epoch())
        };

        trace!(node = ?id, "recomputing");
        let ctx = ReactiveContext::enter(self, id);
        // long dependency chains nest one producer call per link
        let value = match stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || producer()) {
            Ok(value) => value,
            Err(err) => {
                debug!(node = ?id, error = %err, "producer failed, node stays dirty");
                return Err(err);
            }
        };
        let sources = ctx.finish();

        let mut inner = self.inner.lock();
        let current_epoch = match inner.graph.get(id) {
            Some(slot) => slot.epoch(),
            None => {
                inner.graph.release(id, &sources);
                return Err(ReactiveError::Disposed { id });
            }
        };
        let Some(out) = downcast::<T>(&value) else {
            inner.graph.release(id, &sources);
            return Err(inner.type_mismatch(id));
        };

        if current_epoch != epoch {
            // invalidated while the producer ran; the result may already be stale
            trace!(node = ?id, "invalidated during evaluation, not caching");
            inner.graph.release(id, &sources);
            return Ok(out);
        }

        let rewire = inner.graph.rewire(id, sources);
        if let Some(slot) = inner.graph.get_mut(id) {
            slot.store(value);
        }
        trace!(
            node = ?id,
            added = rewire.added,
            removed = rewire.removed,
            "recomputed"
        );
        Ok(out)
    }

    /// The cached value, without recomputing or tracking.
    pub(crate) fn peek<T: Clone + 'static>(&self, id: NodeId) -> Option<T> {
        let inner = self.inner.lock();
        inner.graph.get(id)?.value().and_then(downcast::<T>)
    }

    /// Swap a node's producer and invalidate it.
    pub(crate) fn replace_producer(&self, id: NodeId, producer: ErasedProducer) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            let slot = inner
                .graph
                .get_mut(id)
                .ok_or(ReactiveError::Disposed { id })?;
            slot.set_producer(producer);
        }
        self.mark_dirty(id);
        Ok(())
    }

    /// Mark a node dirty and propagate to its subscribers.
    ///
    /// A node that is already dirty is left alone: everything downstream of
    /// it was invalidated when it turned dirty, so diamonds are walked once.
    pub(crate) fn mark_dirty(&self, id: NodeId) {
        self.invalidate(id, false);
    }

    /// Every dependent is marked before the first callback runs.
    fn invalidate(&self, id: NodeId, force: bool) {
        let mut inner = self.inner.lock();
        let notify = inner.graph.invalidate(id, force);
        let pending: SmallVec<[(NodeId, Callback); 8]> = notify
            .into_iter()
            .filter_map(|(node, callback_id)| {
                inner
                    .callbacks
                    .get(&callback_id)
                    .map(|callback| (node, Arc::clone(callback)))
            })
            .collect();
        drop(inner);

        if !pending.is_empty() {
            trace!(node = ?id, callbacks = pending.len(), "notifying");
        }
        for (node, callback) in pending {
            callback(&NodeRef::new(self.downgrade(), node));
        }
    }

    pub(crate) fn subscribe(&self, id: NodeId, subscriber: Subscriber) -> Result<bool> {
        let mut inner = self.inner.lock();
        let slot = inner
            .graph
            .get_mut(id)
            .ok_or(ReactiveError::Disposed { id })?;
        Ok(slot.add_subscriber(subscriber))
    }

    pub(crate) fn unsubscribe(&self, id: NodeId, subscriber: Subscriber) -> Result<bool> {
        let mut inner = self.inner.lock();
        let slot = inner
            .graph
            .get_mut(id)
            .ok_or(ReactiveError::Disposed { id })?;
        Ok(slot.remove_subscriber(&subscriber))
    }

    /// Invalidate everything downstream of `id`, then remove it.
    ///
    /// Dependents are left subscribed-to-nothing for this node; their next
    /// evaluation reads it and reports `Disposed`.
    pub(crate) fn destroy(&self, id: NodeId) {
        if !self.contains(id) {
            return;
        }
        self.invalidate(id, true);
        let removed = self.inner.lock().graph.remove(id);
        if let Some(slot) = removed {
            debug!(node = ?id, name = ?slot.name(), "destroyed node");
        }
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.inner.lock().graph.contains(id)
    }

    pub(crate) fn name(&self, id: NodeId) -> Option<String> {
        let inner = self.inner.lock();
        inner.graph.get(id)?.name().map(str::to_string)
    }

    pub(crate) fn label(&self, id: NodeId) -> String {
        self.inner.lock().label(id)
    }

    pub(crate) fn describe(&self, id: NodeId) -> String {
        self.inner.lock().describe(id)
    }

    pub(crate) fn state(&self, id: NodeId) -> Option<DirtyState> {
        self.inner.lock().graph.get(id).map(|slot| slot.state())
    }

    pub(crate) fn sources(&self, id: NodeId) -> Vec<NodeId> {
        self.inner
            .lock()
            .graph
            .get(id)
            .map(|slot| slot.sources().iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn subscriber_count(&self, id: NodeId) -> usize {
        self.inner
            .lock()
            .graph
            .get(id)
            .map(|slot| slot.subscribers().len())
            .unwrap_or(0)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Runtime")
            .field("node_count", &inner.graph.len())
            .field("callback_count", &inner.callbacks.len())
            .field("config", &inner.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn constant(value: i32) -> ErasedProducer {
        Arc::new(move || Ok(Box::new(value) as ErasedValue))
    }

    #[test]
    fn read_caches_until_marked_dirty() {
        let runtime = Runtime::new();
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let id = runtime.insert(
            None,
            Arc::new(move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(42i32) as ErasedValue)
            }),
        );

        assert_eq!(runtime.state(id), Some(DirtyState::Dirty));
        assert_eq!(runtime.read::<i32>(id, true).unwrap(), 42);
        assert_eq!(runtime.read::<i32>(id, true).unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.state(id), Some(DirtyState::Clean));

        runtime.mark_dirty(id);
        assert_eq!(runtime.read::<i32>(id, true).unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn callbacks_fire_on_clean_to_dirty_only() {
        let runtime = Runtime::new();
        let id = runtime.insert(Some("a".into()), constant(1));
        let hits = Arc::new(AtomicI32::new(0));
        let hits_clone = hits.clone();
        let callback = runtime.register_callback(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });
        runtime.subscribe(id, callback.into()).unwrap();

        // already dirty: nothing to report
        runtime.mark_dirty(id);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        runtime.read::<i32>(id, true).unwrap();
        runtime.mark_dirty(id);
        runtime.mark_dirty(id);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removed_callbacks_are_detached() {
        let runtime = Runtime::new();
        let id = runtime.insert(None, constant(1));
        let callback = runtime.register_callback(|_| {});
        runtime.subscribe(id, callback.into()).unwrap();
        assert_eq!(runtime.subscriber_count(id), 1);

        assert!(runtime.remove_callback(callback));
        assert!(!runtime.remove_callback(callback));
        assert_eq!(runtime.subscriber_count(id), 0);
    }

    #[test]
    fn destroyed_nodes_report_disposed() {
        let runtime = Runtime::new();
        let id = runtime.insert(None, constant(1));
        runtime.destroy(id);

        assert_eq!(runtime.node_count(), 0);
        assert_eq!(
            runtime.read::<i32>(id, true),
            Err(ReactiveError::Disposed { id })
        );
        assert!(runtime.replace_producer(id, constant(2)).is_err());
        // second destroy is a no-op
        runtime.destroy(id);
    }

    #[test]
    fn wrong_type_is_reported_not_panicked() {
        let runtime = Runtime::new();
        let id = runtime.insert(None, constant(1));
        let err = runtime.read::<String>(id, true).unwrap_err();
        assert!(matches!(err, ReactiveError::TypeMismatch { .. }));
    }

    #[test]
    fn describe_uses_default_label() {
        let runtime = Runtime::with_config(RuntimeConfig::default().with_default_label("cell"));
        let id = runtime.insert(None, constant(1));
        assert_eq!(runtime.describe(id), "`cell` [dirty]");
        assert_eq!(runtime.label(id), "cell");
    }

    #[test]
    fn runtimes_are_independent() {
        let first = Runtime::new();
        let second = Runtime::new();
        first.insert(None, constant(1));

        assert_eq!(first.node_count(), 1);
        assert_eq!(second.node_count(), 0);
        assert!(first.ptr_eq(&first.clone()));
        assert!(!first.ptr_eq(&second));
    }
}
