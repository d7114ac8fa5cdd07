//! External-call plumbing for drdeploy.
//!
//! Everything a deployment stage needs to talk to the outside world lives
//! here: local command execution with a shared exclusivity gate, the
//! retry/poll primitives wrapped around every readiness check, the
//! `oc`-based cluster client, operator resource helpers, manifest
//! templating, and provisioning of the installer/client/mesh binaries.

pub mod bins;
pub mod client;
pub mod cmd;
pub mod error;
pub mod resources;
pub mod retry;
pub mod template;

pub use client::KubeClient;
pub use cmd::{exec_cmd, CmdOutput, ExecOpts};
pub use error::{ErrorKind, OpsError};
pub use retry::{poll_until, Probe, RetryPolicy};

/// Convenience result alias for ops operations.
pub type Result<T> = std::result::Result<T, OpsError>;
