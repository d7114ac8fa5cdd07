//! Cluster API client wrapper.
//!
//! Drives the `oc` client binary against a per-cluster kubeconfig and
//! parses its machine-readable output. Client invocations share a local
//! credentials cache, so every call routes through the exclusive command
//! gate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::cmd::{exec_cmd, ExecOpts};
use crate::error::OpsError;
use crate::retry::{poll_until, Probe};

/// A client bound to one cluster's kubeconfig.
#[derive(Debug, Clone)]
pub struct KubeClient {
    kubeconfig: PathBuf,
    binary: String,
}

impl KubeClient {
    /// Create a client for the cluster behind `kubeconfig`.
    #[must_use]
    pub fn new(kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
            binary: "oc".to_string(),
        }
    }

    /// Use a specific client binary path instead of `oc` from PATH.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// The kubeconfig this client is bound to.
    #[must_use]
    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }

    fn base_argv(&self) -> Vec<String> {
        vec![
            self.binary.clone(),
            "--kubeconfig".into(),
            self.kubeconfig.display().to_string(),
        ]
    }

    async fn run(&self, args: &[&str], opts: ExecOpts) -> Result<String, OpsError> {
        let mut argv = self.base_argv();
        argv.extend(args.iter().map(ToString::to_string));
        let opts = ExecOpts {
            exclusive: true,
            ..opts
        };
        Ok(exec_cmd(&argv, opts).await?.stdout)
    }

    /// `oc get <kind> [name] [-n ns] [--selector] -o json`, parsed.
    ///
    /// # Errors
    ///
    /// `CommandFailed` if the call fails, `Json` if the output is not
    /// machine readable.
    pub async fn get(
        &self,
        kind: &str,
        name: Option<&str>,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Value, OpsError> {
        let mut args = vec!["get", kind];
        // A selector query replaces the name, never combines with it.
        if selector.is_none() {
            if let Some(name) = name {
                args.push(name);
            }
        }
        if let Some(ns) = namespace {
            args.extend(["-n", ns]);
        }
        let selector_arg;
        if let Some(selector) = selector {
            selector_arg = format!("--selector={selector}");
            args.push(&selector_arg);
        }
        args.extend(["-o", "json"]);
        let stdout = self.run(&args, ExecOpts::default()).await?;
        Ok(serde_json::from_str(&stdout)?)
    }

    /// `oc get` with a jsonpath expression, returning the raw value.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn get_jsonpath(
        &self,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
        jsonpath: &str,
    ) -> Result<String, OpsError> {
        let output = format!("-o=jsonpath={{{jsonpath}}}");
        let mut args = vec!["get", kind, name];
        if let Some(ns) = namespace {
            args.extend(["-n", ns]);
        }
        args.push(&output);
        self.run(&args, ExecOpts::default()).await
    }

    /// `oc apply -f <file>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the apply fails.
    pub async fn apply_file(&self, path: &Path, timeout: Duration) -> Result<(), OpsError> {
        let file = path.display().to_string();
        self.run(
            &["apply", "-f", &file],
            ExecOpts::with_timeout(timeout),
        )
        .await?;
        info!(manifest = %file, "Applied manifest");
        Ok(())
    }

    /// `oc create -f <file>` (optionally namespaced).
    ///
    /// # Errors
    ///
    /// Returns an error if the create fails.
    pub async fn create_file(&self, path: &Path, namespace: Option<&str>) -> Result<(), OpsError> {
        let file = path.display().to_string();
        let mut args = vec!["create", "-f", file.as_str()];
        if let Some(ns) = namespace {
            args.extend(["-n", ns]);
        }
        self.run(&args, ExecOpts::default()).await?;
        info!(manifest = %file, "Created resource");
        Ok(())
    }

    /// `oc patch <kind> <name> --type=<type> -p <patch>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the patch fails.
    pub async fn patch(
        &self,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
        patch_type: &str,
        patch: &str,
    ) -> Result<(), OpsError> {
        let type_arg = format!("--type={patch_type}");
        let mut args = vec!["patch", kind, name];
        if let Some(ns) = namespace {
            args.extend(["-n", ns]);
        }
        args.extend([type_arg.as_str(), "-p", patch]);
        self.run(&args, ExecOpts::default()).await?;
        Ok(())
    }

    /// `oc label <kind> <name> <label>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the label fails.
    pub async fn label(&self, kind: &str, name: &str, label: &str) -> Result<(), OpsError> {
        self.run(&["label", kind, name, label], ExecOpts::default())
            .await?;
        Ok(())
    }

    /// Probe cluster reachability with `oc cluster-info`.
    pub async fn cluster_reachable(&self) -> bool {
        if !self.kubeconfig.is_file() {
            return false;
        }
        if which::which(&self.binary).is_err() {
            warn!(binary = %self.binary, "Client binary not found");
            return false;
        }
        self.run(
            &["cluster-info"],
            ExecOpts {
                silent: true,
                timeout: Duration::from_secs(60),
                ..ExecOpts::default()
            },
        )
        .await
        .is_ok()
    }

    /// Poll a resource until `predicate` accepts its JSON document.
    ///
    /// Missing resources count as pending, not as errors, so a resource
    /// that has not been created yet can still be waited for.
    ///
    /// # Errors
    ///
    /// `TimeoutExpired` if the predicate never accepts within `timeout`.
    pub async fn wait_for_resource<P>(
        &self,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
        timeout: Duration,
        interval: Duration,
        predicate: P,
    ) -> Result<Value, OpsError>
    where
        P: Fn(&Value) -> bool,
    {
        let what = format!("{kind}/{name}");
        let predicate = &predicate;
        let this = self;
        poll_until(&what, timeout, interval, move || async move {
            match this.get(kind, Some(name), namespace, None).await {
                Ok(doc) if predicate(&doc) => Ok(Probe::Ready(doc)),
                Ok(doc) => Ok(Probe::Pending(summarize_status(&doc))),
                Err(OpsError::CommandFailed { stderr, .. }) => {
                    Ok(Probe::Pending(format!("not found: {}", stderr.trim())))
                }
                Err(other) => Err(other),
            }
        })
        .await
    }
}

/// Short status summary for pending-resource diagnostics.
fn summarize_status(doc: &Value) -> String {
    doc.get("status").map_or_else(
        || "no status".to_string(),
        |s| {
            let text = s.to_string();
            if text.chars().count() > 200 {
                let short: String = text.chars().take(200).collect();
                format!("{short}...")
            } else {
                text
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_argv_carries_kubeconfig() {
        let client = KubeClient::new("/tmp/dr1/auth/kubeconfig");
        let argv = client.base_argv();
        assert_eq!(argv[0], "oc");
        assert_eq!(argv[1], "--kubeconfig");
        assert_eq!(argv[2], "/tmp/dr1/auth/kubeconfig");
    }

    #[test]
    fn test_with_binary_override() {
        let client = KubeClient::new("/tmp/kc").with_binary("./bin/oc");
        assert_eq!(client.base_argv()[0], "./bin/oc");
    }

    #[tokio::test]
    async fn test_unreachable_without_kubeconfig_file() {
        let client = KubeClient::new("/nonexistent/kubeconfig");
        assert!(!client.cluster_reachable().await);
    }

    #[test]
    fn test_summarize_status_truncates() {
        let doc = serde_json::json!({"status": {"conditions": ["x".repeat(400)]}});
        assert!(summarize_status(&doc).len() < 250);
    }
}
