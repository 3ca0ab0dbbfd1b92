//! Keyed collections of nodes.
//!
//! A [`NodeGroup`] bundles named nodes of one value type, such as the
//! parameters of a shape, so they can be read and written together.

use indexmap::IndexMap;

use super::node::Node;
use super::runtime::Runtime;
use super::source::Source;
use crate::error::{ReactiveError, Result};

/// An ordered set of named nodes.
///
/// Each node is named after its key, so diagnostics point at the right
/// member. Keys are fixed at construction.
pub struct NodeGroup<T> {
    nodes: IndexMap<String, Node<T>>,
}

impl<T> NodeGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Build a group, one node per `(key, source)` pair.
    ///
    /// A repeated key keeps its first position and its last source.
    pub fn new<K, I>(runtime: &Runtime, entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Source<T>)>,
    {
        let sources: IndexMap<String, Source<T>> = entries
            .into_iter()
            .map(|(key, source)| (key.into(), source))
            .collect();
        let nodes = sources
            .into_iter()
            .map(|(key, source)| {
                let node = Node::named_source(runtime, key.clone(), source);
                (key, node)
            })
            .collect();
        Self { nodes }
    }

    /// The node stored under `key`.
    pub fn node(&self, key: &str) -> Option<&Node<T>> {
        self.nodes.get(key)
    }

    fn require(&self, key: &str) -> Result<&Node<T>> {
        self.nodes.get(key).ok_or_else(|| ReactiveError::UnknownKey {
            key: key.to_string(),
        })
    }

    /// Read one member.
    pub fn get(&self, key: &str) -> Result<T> {
        self.require(key)?.get()
    }

    /// Read every member, in key order.
    pub fn snapshot(&self) -> Result<IndexMap<String, T>> {
        self.nodes
            .iter()
            .map(|(key, node)| Ok((key.clone(), node.get()?)))
            .collect()
    }

    /// Reset one member.
    pub fn set(&self, key: &str, source: impl Into<Source<T>>) -> Result<()> {
        self.require(key)?.set(source)
    }

    /// Reset several members.
    ///
    /// Every key is checked before anything is written, so an unknown key
    /// leaves the whole group untouched.
    pub fn set_many<K, I>(&self, updates: I) -> Result<()>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Source<T>)>,
    {
        let updates: Vec<(K, Source<T>)> = updates.into_iter().collect();
        for (key, _) in &updates {
            self.require(key.as_ref())?;
        }
        for (key, source) in updates {
            self.require(key.as_ref())?.set(source)?;
        }
        Ok(())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<T> Clone for NodeGroup<T> {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
        }
    }
}
