//! Multi-cluster configuration framework for drdeploy.
//!
//! This crate owns the pieces every deployment stage depends on:
//! - Per-cluster configuration documents with overlay merging
//! - The context registry that tracks which cluster is "current"
//! - Tokenization of the `multicluster` command-line form
//!
//! The registry is owned and driven by the single orchestrating task;
//! parallel workers receive resolved configuration values as arguments
//! and never touch the cursor.

pub mod args;
pub mod config;
pub mod context;
pub mod error;

pub use args::TokenizedArgs;
pub use config::ClusterConfig;
pub use context::{ClusterContext, ContextRegistry};
pub use error::FrameworkError;

/// Convenience result alias for framework operations.
pub type Result<T> = std::result::Result<T, FrameworkError>;
