//! Cellflow Core
//!
//! This crate provides the engine behind cellflow: a pull-based graph of
//! memoizing cells. It implements:
//!
//! - Lazily recomputed nodes with automatic dependency discovery
//! - Synchronous dirty propagation to dependent nodes and callbacks
//! - Cycle detection before a cycle can form
//! - Explicit teardown of nodes
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: nodes, sources, subscribers and the runtime
//! - `graph`: the node arena and its dependency edges
//! - `config`: runtime tunables
//! - `error`: the error type shared by every fallible operation
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use cellflow_core::reactive::{Node, Runtime, Source};
//!
//! let runtime = Runtime::new();
//!
//! let count = Node::named(&runtime, "count", || Ok(2));
//! let count2 = count.clone();
//! let doubled = Node::named(&runtime, "doubled", move || Ok(count2.get()? * 2));
//!
//! let redraws = Arc::new(AtomicUsize::new(0));
//! let redraws2 = redraws.clone();
//! doubled
//!     .on_dirty(move |_| {
//!         redraws2.fetch_add(1, Ordering::SeqCst);
//!     })
//!     .unwrap();
//!
//! assert_eq!(doubled.get().unwrap(), 4);
//!
//! count.set(Source::value(5)).unwrap();
//! assert_eq!(redraws.load(Ordering::SeqCst), 1);
//! assert_eq!(doubled.get().unwrap(), 10);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{ReactiveError, Result};
