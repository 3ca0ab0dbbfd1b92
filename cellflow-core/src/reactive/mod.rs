//! Reactive Primitives
//!
//! This module implements the cell engine: nodes, their inputs, the
//! subscribers they notify and the runtime that ties them together.
//!
//! # Concepts
//!
//! ## Nodes
//!
//! A [`Node`] wraps a producer function and caches its result. When a node's
//! producer reads another node, the read is recorded and the first node
//! becomes a subscriber of the second. When the second changes, the first
//! is marked dirty and recomputes the next time it is read.
//!
//! ## Subscribers
//!
//! A node notifies two kinds of [`Subscriber`]: dependent nodes, which are
//! marked dirty (pull), and callbacks, which run immediately (push). A
//! callback that needs a consistent view of several nodes should read them
//! through a derived node rather than one by one.
//!
//! ## Sources
//!
//! A [`Source`] is anything a node can be built from: a value, another
//! node, or a producer. It is normalized to a producer.
//!
//! # Implementation Notes
//!
//! Dependencies are discovered, not declared. The runtime keeps a stack of
//! evaluation frames; a read is attributed to the frame on top. Reads that
//! would close a cycle are rejected with an error before any edge is added.
//!
//! Producers must run to completion without yielding: a frame left on the
//! stack across a suspension point would collect reads made by unrelated
//! code.

mod context;
mod group;
mod node;
mod runtime;
mod source;
mod subscriber;

pub use group::NodeGroup;
pub use node::{Node, NodeRef};
pub use runtime::Runtime;
pub use source::{Producer, Source};
pub use subscriber::{Callback, Subscriber, SubscriberId};
