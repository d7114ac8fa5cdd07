//! Error types for configuration and context handling.
//!
//! These errors indicate a malformed invocation or configuration, not a
//! transient cluster problem. They are fatal: the run aborts instead of
//! recording a per-cluster failure.

use thiserror::Error;

/// Errors raised by the configuration framework.
#[derive(Debug, Error)]
pub enum FrameworkError {
    /// A `--cluster<i>` marker required by the multicluster form is absent.
    #[error("missing --cluster{0} marker in multicluster arguments")]
    MissingClusterMarker(usize),

    /// A context switch targeted an index outside the registered range.
    #[error("cluster index {index} out of range (registered clusters: {nclusters})")]
    IndexOutOfRange { index: usize, nclusters: usize },

    /// The configured platform has no deployment implementation.
    #[error("unsupported platform: {0} (only aws is supported)")]
    UnsupportedPlatform(String),

    /// A required configuration key is missing or empty.
    #[error("required configuration key missing: {0}")]
    MissingConfigKey(String),

    /// Configuration document failed to parse or re-type after a merge.
    #[error("configuration error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration file could not be read.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
}
