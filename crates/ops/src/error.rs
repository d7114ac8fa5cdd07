//! Error types for external-call plumbing.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while driving external collaborators.
#[derive(Debug, Error)]
pub enum OpsError {
    /// External invocation returned non-zero or could not be spawned.
    #[error("command failed: {command}\n{stderr}")]
    CommandFailed { command: String, stderr: String },

    /// A poll (or a command's own deadline) expired.
    #[error("timed out after {timeout:?} waiting for {what} (last observed: {last})")]
    TimeoutExpired {
        what: String,
        timeout: Duration,
        last: String,
    },

    /// A polled object never reached the expected condition.
    #[error("resource {kind}/{name} in unexpected state: {state}")]
    ResourceWrongState {
        kind: String,
        name: String,
        state: String,
    },

    /// A polled object never appeared.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// A binary or tarball could not be fetched.
    #[error("download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    /// This control host's OS has no published tool builds.
    #[error("unsupported host OS: {0}")]
    UnsupportedHost(String),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Machine-readable command output failed to parse
    #[error("invalid JSON output: {0}")]
    Json(#[from] serde_json::Error),

    /// Manifest data failed to serialize
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Manifest template failed to render
    #[error("template rendering failed: {0}")]
    Template(#[from] handlebars::RenderError),

    /// HTTP request failed
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Discriminants of [`OpsError`], used as retry predicates: a retry policy
/// names the kinds it considers transient and everything else propagates
/// immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CommandFailed,
    TimeoutExpired,
    ResourceWrongState,
    ResourceNotFound,
    DownloadFailed,
    UnsupportedHost,
    Io,
    Json,
    Yaml,
    Template,
    Http,
}

impl OpsError {
    /// The error's kind, for retry predicate matching.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CommandFailed { .. } => ErrorKind::CommandFailed,
            Self::TimeoutExpired { .. } => ErrorKind::TimeoutExpired,
            Self::ResourceWrongState { .. } => ErrorKind::ResourceWrongState,
            Self::ResourceNotFound(_) => ErrorKind::ResourceNotFound,
            Self::DownloadFailed { .. } => ErrorKind::DownloadFailed,
            Self::UnsupportedHost(_) => ErrorKind::UnsupportedHost,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) => ErrorKind::Json,
            Self::Yaml(_) => ErrorKind::Yaml,
            Self::Template(_) => ErrorKind::Template,
            Self::Http(_) => ErrorKind::Http,
        }
    }
}
