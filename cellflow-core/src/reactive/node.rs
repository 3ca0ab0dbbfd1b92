//! Node Implementation
//!
//! A [`Node`] is a memoizing cell: it wraps a producer, caches the producer's
//! result, and recomputes only after something it read has changed.
//!
//! # How Nodes Work
//!
//! 1. A new node starts dirty. Nothing runs until the first [`Node::get`].
//!
//! 2. Reading a dirty node runs its producer inside an evaluation frame.
//!    Every node the producer reads is recorded, and afterwards the node is
//!    subscribed to exactly that set.
//!
//! 3. Reading a clean node returns the cached value.
//!
//! 4. [`Node::set`] swaps the producer and marks the node dirty. Dirtiness
//!    spreads to every dependent before `set` returns; callbacks subscribed
//!    along the way run once the whole walk is done, still before `set`
//!    returns.
//!
//! 5. A producer that fails leaves the node dirty, so the next read tries
//!    again from scratch.
//!
//! A `Node<T>` is a small handle. Clones refer to the same cell. Handles do
//! not keep the runtime alive; once it is dropped every operation reports
//! `Disposed`.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use super::runtime::{Runtime, WeakRuntime};
use super::source::{Producer, Source};
use super::subscriber::{Subscriber, SubscriberId};
use crate::error::{ReactiveError, Result};
use crate::graph::{DirtyState, ErasedProducer, ErasedValue, NodeId};

fn erase<T>(producer: Producer<T>) -> ErasedProducer
where
    T: Send + Sync + 'static,
{
    Arc::new(move || producer().map(|value| Box::new(value) as ErasedValue))
}

/// A memoizing reactive cell holding a value of type `T`.
///
/// # Example
///
/// ```rust
/// use cellflow_core::reactive::{Node, Runtime, Source};
///
/// let runtime = Runtime::new();
/// let a = Node::new(&runtime, || Ok(4));
/// let a2 = a.clone();
/// let b = Node::new(&runtime, move || Ok(a2.get()? * 2));
///
/// assert_eq!(b.get().unwrap(), 8);
/// a.set(Source::value(5)).unwrap();
/// assert_eq!(b.get().unwrap(), 10);
/// ```
pub struct Node<T> {
    runtime: WeakRuntime,
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Node<T> {
    /// The node's arena handle.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// An untyped handle to the same node.
    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.runtime.clone(), self.id)
    }

    /// The runtime this node lives in, if it is still alive.
    pub fn runtime(&self) -> Option<Runtime> {
        self.runtime.upgrade()
    }

    fn rt(&self) -> Result<Runtime> {
        self.runtime
            .upgrade()
            .ok_or(ReactiveError::Disposed { id: self.id })
    }
}

impl<T> Node<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a node computed by `producer`.
    pub fn new<F>(runtime: &Runtime, producer: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self::build(runtime, None, Arc::new(producer))
    }

    /// Create a named node computed by `producer`.
    pub fn named<F>(runtime: &Runtime, name: impl Into<String>, producer: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self::build(runtime, Some(name.into()), Arc::new(producer))
    }

    /// Create a node from a value, another node or a producer.
    pub fn from_source(runtime: &Runtime, source: impl Into<Source<T>>) -> Self {
        Self::build(runtime, None, source.into().into_producer())
    }

    /// Like [`Node::from_source`], with a diagnostic name.
    pub fn named_source(
        runtime: &Runtime,
        name: impl Into<String>,
        source: impl Into<Source<T>>,
    ) -> Self {
        Self::build(runtime, Some(name.into()), source.into().into_producer())
    }

    /// Create a node holding a constant.
    pub fn constant(runtime: &Runtime, value: T) -> Self {
        Self::from_source(runtime, Source::Value(value))
    }

    /// Create a node, accepting only a producer function.
    ///
    /// Use this where a value or node handed over by mistake should be an
    /// error rather than silently becoming a constant or an alias.
    pub fn strict(runtime: &Runtime, source: impl Into<Source<T>>) -> Result<Self> {
        match source.into() {
            Source::Producer(producer) => Ok(Self::build(runtime, None, producer)),
            _ => Err(ReactiveError::InvalidProducer {
                node: format!("`{}`", runtime.config().default_label),
            }),
        }
    }

    fn build(runtime: &Runtime, name: Option<String>, producer: Producer<T>) -> Self {
        let id = runtime.insert(name, erase(producer));
        Self {
            runtime: runtime.downgrade(),
            id,
            _marker: PhantomData,
        }
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Inside another node's producer this also records the dependency.
    /// Fails with `CircularDependency` if the read would close a cycle, and
    /// passes producer errors through unchanged.
    pub fn get(&self) -> Result<T> {
        self.rt()?.read(self.id, true)
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> Result<T> {
        self.rt()?.read(self.id, false)
    }

    /// The cached value if the node is clean. Never runs the producer.
    pub fn peek(&self) -> Option<T> {
        self.runtime.upgrade()?.peek(self.id)
    }

    /// Replace the node's input and invalidate it and its dependents.
    pub fn set(&self, source: impl Into<Source<T>>) -> Result<()> {
        let producer = erase(source.into().into_producer());
        self.rt()?.replace_producer(self.id, producer)
    }

    /// Replace the node's input with a constant.
    pub fn set_constant(&self, value: T) -> Result<()> {
        self.set(Source::Value(value))
    }

    /// Replace the node's producer.
    pub fn set_producer<F>(&self, producer: F) -> Result<()>
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        self.set(Source::producer(producer))
    }

    /// Replace the node's producer, rejecting anything that is not one.
    pub fn set_producer_strict(&self, source: impl Into<Source<T>>) -> Result<()> {
        let runtime = self.rt()?;
        match source.into() {
            Source::Producer(producer) => runtime.replace_producer(self.id, erase(producer)),
            _ => Err(ReactiveError::InvalidProducer {
                node: runtime.describe(self.id),
            }),
        }
    }

    /// Mark the node dirty and propagate to its subscribers.
    pub fn mark_dirty(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.mark_dirty(self.id);
        }
    }

    /// Add a subscriber. Returns `false` if it was already subscribed.
    pub fn subscribe(&self, subscriber: impl Into<Subscriber>) -> Result<bool> {
        self.rt()?.subscribe(self.id, subscriber.into())
    }

    /// Remove a subscriber. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, subscriber: impl Into<Subscriber>) -> Result<bool> {
        self.rt()?.unsubscribe(self.id, subscriber.into())
    }

    /// Register `callback` and subscribe it to this node.
    ///
    /// The callback runs synchronously every time the node goes from clean
    /// to dirty. Pass the returned id to [`Node::unsubscribe`] or
    /// [`Runtime::remove_callback`] to stop it.
    pub fn on_dirty<F>(&self, callback: F) -> Result<SubscriberId>
    where
        F: Fn(&NodeRef) + Send + Sync + 'static,
    {
        let runtime = self.rt()?;
        let id = runtime.register_callback(callback);
        runtime.subscribe(self.id, Subscriber::Callback(id))?;
        Ok(id)
    }

    /// Like [`Node::on_dirty`], but also runs the callback once right away.
    pub fn on_dirty_now<F>(&self, callback: F) -> Result<SubscriberId>
    where
        F: Fn(&NodeRef) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let registered = Arc::clone(&callback);
        let id = self.on_dirty(move |node| registered(node))?;
        callback(&self.node_ref());
        Ok(id)
    }

    /// Invalidate every dependent, detach from all sources and remove the
    /// node. Later reads through any handle fail with `Disposed`.
    pub fn destroy(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.destroy(self.id);
        }
    }

    pub fn name(&self) -> Option<String> {
        self.runtime.upgrade()?.name(self.id)
    }

    /// `None` once the node has been destroyed.
    pub fn state(&self) -> Option<DirtyState> {
        self.runtime.upgrade()?.state(self.id)
    }

    pub fn is_dirty(&self) -> bool {
        self.state() != Some(DirtyState::Clean)
    }

    pub fn is_alive(&self) -> bool {
        self.state().is_some()
    }

    /// Nodes read during the last successful evaluation, in read order.
    pub fn source_ids(&self) -> Vec<NodeId> {
        self.runtime
            .upgrade()
            .map(|runtime| runtime.sources(self.id))
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.runtime
            .upgrade()
            .map(|runtime| runtime.subscriber_count(self.id))
            .unwrap_or(0)
    }
}

impl<T> Node<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    /// A node whose value is the values of `sources`, in order.
    pub fn collect<I>(runtime: &Runtime, sources: I) -> Self
    where
        I: IntoIterator<Item = Source<T>>,
    {
        let sources: Vec<Source<T>> = sources.into_iter().collect();
        Self::new(runtime, move || sources.iter().map(Source::read).collect())
    }
}

impl<T> Clone for Node<T> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            id: self.id,
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Node<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Node<T> {}

impl<T> From<&Node<T>> for Subscriber {
    fn from(node: &Node<T>) -> Self {
        Subscriber::Node(node.id)
    }
}

impl<T> fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let runtime = self.runtime.upgrade();
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &runtime.as_ref().and_then(|rt| rt.name(self.id)))
            .field("state", &runtime.as_ref().and_then(|rt| rt.state(self.id)))
            .finish()
    }
}

/// Renders `Node(label = value)`, or `Node(label = ???)` while dirty.
impl<T> fmt::Display for Node<T>
where
    T: Clone + Send + Sync + fmt::Display + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(runtime) = self.runtime.upgrade() else {
            return write!(f, "Node({:?} = ???)", self.id);
        };
        let label = runtime.label(self.id);
        match runtime.peek::<T>(self.id) {
            Some(value) => write!(f, "Node({label} = {value})"),
            None => write!(f, "Node({label} = ???)"),
        }
    }
}

/// Untyped handle to a node, handed to callbacks.
#[derive(Clone)]
pub struct NodeRef {
    runtime: WeakRuntime,
    id: NodeId,
}

impl NodeRef {
    pub(crate) fn new(runtime: WeakRuntime, id: NodeId) -> Self {
        Self { runtime, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> Option<String> {
        self.runtime.upgrade()?.name(self.id)
    }

    /// `None` once the node has been destroyed.
    pub fn state(&self) -> Option<DirtyState> {
        self.runtime.upgrade()?.state(self.id)
    }

    pub fn is_dirty(&self) -> bool {
        self.state() != Some(DirtyState::Clean)
    }

    pub fn is_alive(&self) -> bool {
        self.state().is_some()
    }

    pub fn runtime(&self) -> Option<Runtime> {
        self.runtime.upgrade()
    }
}

impl<T> PartialEq<Node<T>> for NodeRef {
    fn eq(&self, other: &Node<T>) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef").field("id", &self.id).finish()
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.runtime.upgrade() {
            Some(runtime) => f.write_str(&runtime.describe(self.id)),
            None => write!(f, "{:?} [destroyed]", self.id),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn node_computes_on_first_access() {
        let runtime = Runtime::new();
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let node = Node::new(&runtime, move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        });

        // Not computed yet
        assert!(node.is_dirty());
        assert_eq!(node.peek(), None);
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        assert_eq!(node.get(), Ok(42));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(node.peek(), Some(42));
    }

    #[test]
    fn node_state_transitions() {
        let runtime = Runtime::new();
        let node = Node::new(&runtime, || Ok(42));

        assert_eq!(node.state(), Some(DirtyState::Dirty));
        node.get().unwrap();
        assert_eq!(node.state(), Some(DirtyState::Clean));
        node.mark_dirty();
        assert_eq!(node.state(), Some(DirtyState::Dirty));
        node.get().unwrap();
        assert_eq!(node.state(), Some(DirtyState::Clean));
    }

    #[test]
    fn node_clone_shares_state() {
        let runtime = Runtime::new();
        let node1 = Node::new(&runtime, || Ok(42));
        node1.get().unwrap();

        let node2 = node1.clone();
        assert_eq!(node1, node2);
        assert_eq!(node2.peek(), Some(42));

        node1.mark_dirty();
        assert!(node2.is_dirty());
    }

    #[test]
    fn display_shows_value_or_placeholder() {
        let runtime = Runtime::new();
        let named = Node::named(&runtime, "count", || Ok(3));
        let unnamed = Node::new(&runtime, || Ok(4));

        assert_eq!(named.to_string(), "Node(count = ???)");
        named.get().unwrap();
        assert_eq!(named.to_string(), "Node(count = 3)");

        unnamed.get().unwrap();
        assert_eq!(unnamed.to_string(), "Node(value = 4)");
    }

    #[test]
    fn strict_rejects_values_and_nodes() {
        let runtime = Runtime::new();
        let a = Node::constant(&runtime, 1);

        let err = Node::strict(&runtime, Source::value(1)).unwrap_err();
        assert!(matches!(err, ReactiveError::InvalidProducer { .. }));
        assert!(Node::strict(&runtime, &a).is_err());

        let b = Node::strict(&runtime, Source::producer(|| Ok(2))).unwrap();
        assert_eq!(b.get(), Ok(2));
        assert!(b.set_producer_strict(Source::value(3)).is_err());
        assert_eq!(b.get(), Ok(2));
        b.set_producer_strict(Source::producer(|| Ok(4))).unwrap();
        assert_eq!(b.get(), Ok(4));
    }

    #[test]
    fn untracked_reads_add_no_dependency() {
        let runtime = Runtime::new();
        let a = Node::constant(&runtime, 1);
        let a2 = a.clone();
        let b = Node::new(&runtime, move || a2.get_untracked());

        assert_eq!(b.get(), Ok(1));
        assert!(b.source_ids().is_empty());
        assert_eq!(a.subscriber_count(), 0);

        a.set_constant(2).unwrap();
        assert!(!b.is_dirty());
        assert_eq!(b.get(), Ok(1));
    }

    #[test]
    fn handles_outliving_the_runtime_are_disposed() {
        let runtime = Runtime::new();
        let node = Node::constant(&runtime, 1);
        let id = node.id();
        drop(runtime);

        assert_eq!(node.get(), Err(ReactiveError::Disposed { id }));
        assert!(!node.is_alive());
        assert!(node.runtime().is_none());
    }

    #[test]
    fn collect_reads_every_source() {
        let runtime = Runtime::new();
        let a = Node::constant(&runtime, 1);
        let all = Node::collect(
            &runtime,
            vec![Source::from(&a), Source::value(2), Source::producer(|| Ok(3))],
        );

        assert_eq!(all.get(), Ok(vec![1, 2, 3]));
        a.set_constant(10).unwrap();
        assert!(all.is_dirty());
        assert_eq!(all.get(), Ok(vec![10, 2, 3]));
    }
}
