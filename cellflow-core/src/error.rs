//! Error types for the cell engine.
//!
//! Every fallible operation returns [`Result`]. Cycles are reported as a
//! typed error instead of a panic so call sites have to deal with them.

use thiserror::Error;

use crate::graph::NodeId;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReactiveError>;

/// Errors raised while reading, writing or configuring cells.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// Reading `target` from inside `reader`'s producer would close a cycle.
    ///
    /// Both fields hold the diagnostic identity of the node (label and
    /// current state) at the moment the read was rejected.
    #[error("circular dependency: {reader} reads {target}")]
    CircularDependency { reader: String, target: String },

    /// A strict entry point received something other than a producer function.
    #[error("{node} only accepts a producer function")]
    InvalidProducer { node: String },

    /// The handle refers to a node that has been destroyed.
    #[error("node {id:?} has been destroyed")]
    Disposed { id: NodeId },

    /// A cached value did not have the type the handle expects.
    #[error("{node} holds a value of an unexpected type")]
    TypeMismatch { node: String },

    /// A user producer failed. The message is passed through unchanged.
    #[error("producer failed: {0}")]
    Producer(String),

    /// Evaluation frames nested deeper than the configured limit.
    #[error("evaluation nested deeper than {limit} frames")]
    DepthExceeded { limit: usize },

    /// A node group was addressed with a key it does not contain.
    #[error("unknown key `{key}`")]
    UnknownKey { key: String },

    /// Runtime configuration could not be parsed.
    #[error("invalid runtime config: {0}")]
    Config(String),
}

impl ReactiveError {
    /// Build a producer failure from any message.
    pub fn producer(message: impl Into<String>) -> Self {
        Self::Producer(message.into())
    }

    /// Whether this error reports a dependency cycle.
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::CircularDependency { .. })
    }
}

impl From<serde_json::Error> for ReactiveError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_names_both_nodes() {
        let err = ReactiveError::CircularDependency {
            reader: "`a` [dirty]".into(),
            target: "`b` [clean]".into(),
        };
        assert!(err.is_cycle());
        assert_eq!(
            err.to_string(),
            "circular dependency: `a` [dirty] reads `b` [clean]"
        );
    }

    #[test]
    fn producer_errors_keep_their_message() {
        let err = ReactiveError::producer("division by zero");
        assert!(!err.is_cycle());
        assert_eq!(err.to_string(), "producer failed: division by zero");
    }

    #[test]
    fn json_errors_become_config_errors() {
        let err: ReactiveError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, ReactiveError::Config(_)));
    }
}
