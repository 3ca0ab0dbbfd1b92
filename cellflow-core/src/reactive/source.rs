//! Node inputs.
//!
//! A node is always driven by a producer function. [`Source`] lets callers
//! hand over a plain value or another node instead, and normalizes it:
//!
//! - `Value(v)` becomes a producer that returns a clone of `v`
//! - `Node(n)` becomes a producer that reads `n`, so it is a real dependency
//! - `Producer(f)` is used as-is

use std::fmt;
use std::sync::Arc;

use super::node::Node;
use crate::error::Result;

/// A producer: the zero-argument function that computes a node's value.
pub type Producer<T> = Arc<dyn Fn() -> Result<T> + Send + Sync>;

/// Anything a node can be built from or reset to.
pub enum Source<T> {
    /// A constant.
    Value(T),
    /// Another node, read through on every evaluation.
    Node(Node<T>),
    /// A producer function.
    Producer(Producer<T>),
}

impl<T> Source<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// A constant source.
    pub fn value(value: T) -> Self {
        Source::Value(value)
    }

    /// A source computed by `producer`.
    pub fn producer<F>(producer: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Source::Producer(Arc::new(producer))
    }

    pub fn is_producer(&self) -> bool {
        matches!(self, Source::Producer(_))
    }

    /// Read the source's current value.
    ///
    /// Reading a `Node` source goes through [`Node::get`], so inside a
    /// producer it is tracked like any other read.
    pub fn read(&self) -> Result<T> {
        match self {
            Source::Value(value) => Ok(value.clone()),
            Source::Node(node) => node.get(),
            Source::Producer(producer) => producer(),
        }
    }

    /// Normalize into a producer.
    pub fn into_producer(self) -> Producer<T> {
        match self {
            Source::Value(value) => Arc::new(move || Ok(value.clone())),
            Source::Node(node) => Arc::new(move || node.get()),
            Source::Producer(producer) => producer,
        }
    }
}

impl<T> From<Node<T>> for Source<T> {
    fn from(node: Node<T>) -> Self {
        Source::Node(node)
    }
}

impl<T> From<&Node<T>> for Source<T> {
    fn from(node: &Node<T>) -> Self {
        Source::Node(node.clone())
    }
}

impl<T> Clone for Source<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        match self {
            Source::Value(value) => Source::Value(value.clone()),
            Source::Node(node) => Source::Node(node.clone()),
            Source::Producer(producer) => Source::Producer(Arc::clone(producer)),
        }
    }
}

impl<T> fmt::Debug for Source<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Source::Node(node) => f.debug_tuple("Node").field(&node.id()).finish(),
            Source::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactiveError;
    use crate::reactive::Runtime;

    #[test]
    fn value_sources_read_back() {
        let source = Source::value(3);
        assert!(!source.is_producer());
        assert_eq!(source.read(), Ok(3));
        assert_eq!((source.into_producer())(), Ok(3));
    }

    #[test]
    fn producer_sources_are_called() {
        let source = Source::producer(|| Err::<i32, _>(ReactiveError::producer("boom")));
        assert!(source.is_producer());
        assert_eq!(source.read(), Err(ReactiveError::producer("boom")));
    }

    #[test]
    fn node_sources_read_through() {
        let runtime = Runtime::new();
        let a = Node::new(&runtime, || Ok(7));
        let source = Source::from(&a);
        assert_eq!(source.read(), Ok(7));

        a.set(Source::value(8)).unwrap();
        assert_eq!((source.into_producer())(), Ok(8));
    }
}
