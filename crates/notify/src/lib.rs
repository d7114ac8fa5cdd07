//! End-of-run email reporting.
//!
//! Builds an HTML cluster report and sends it over SMTP, optionally with
//! the cluster's kubeconfig attached. Callers treat delivery failures as
//! log-and-continue; nothing here is fatal to a deployment run.

pub mod email;
pub mod error;

pub use email::{ClusterReport, ClusterRow, EmailChannel};
pub use error::NotifyError;
