//! Runtime configuration.
//!
//! A [`RuntimeConfig`] can be built in code or loaded from JSON. Missing
//! fields fall back to their defaults.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Label used in diagnostics for nodes created without a name.
pub const DEFAULT_LABEL: &str = "value";

/// Default limit on nested evaluation frames per thread.
pub const DEFAULT_MAX_DEPTH: usize = 1024;

/// Tunables for a [`Runtime`](crate::reactive::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Label shown for unnamed nodes in `Display` output and error messages.
    pub default_label: String,

    /// Maximum number of producers that may be evaluating at once on one
    /// thread. Reading past this limit fails with `DepthExceeded`.
    pub max_depth: usize,
}

impl RuntimeConfig {
    /// Parse a config from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        tracing::debug!(
            default_label = %config.default_label,
            max_depth = config.max_depth,
            "loaded runtime config"
        );
        Ok(config)
    }

    /// Replace the label used for unnamed nodes.
    pub fn with_default_label(mut self, label: impl Into<String>) -> Self {
        self.default_label = label.into();
        self
    }

    /// Replace the nesting limit.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_label: DEFAULT_LABEL.to_string(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactiveError;

    #[test]
    fn empty_document_uses_defaults() {
        let config = RuntimeConfig::from_json("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.default_label, "value");
        assert_eq!(config.max_depth, 1024);
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = RuntimeConfig::from_json(r#"{"max_depth": 8}"#).unwrap();
        assert_eq!(config.max_depth, 8);
        assert_eq!(config.default_label, DEFAULT_LABEL);
    }

    #[test]
    fn malformed_document_is_rejected() {
        let err = RuntimeConfig::from_json(r#"{"max_depth": "deep"}"#).unwrap_err();
        assert!(matches!(err, ReactiveError::Config(_)));
    }

    #[test]
    fn builder_methods_chain() {
        let config = RuntimeConfig::default()
            .with_default_label("cell")
            .with_max_depth(3);
        assert_eq!(config.default_label, "cell");
        assert_eq!(config.max_depth, 3);
    }
}
