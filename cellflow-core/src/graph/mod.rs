//! Dependency Graph
//!
//! This module stores the cells and the edges between them.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph kept in an arena:
//!
//! - Nodes are cells: a producer, a cached value and a dirty flag
//! - Edges are recorded in both directions: a node's `sources` are what it
//!   read, a node's `subscribers` are who read it
//!
//! Edges are discovered, never declared. The runtime records every read a
//! producer performs and hands the resulting set to `Graph::rewire` once
//! the producer returns.
//!
//! Each node also carries the transitive closure of its sources. It is only
//! consulted to reject a read that would close a cycle; propagation walks
//! `subscribers` instead.

mod arena;
mod node;

pub(crate) use arena::Graph;
pub(crate) use node::{ErasedProducer, ErasedValue, NodeSlot};
pub use node::{DirtyState, NodeId};
