//! Operator-lifecycle resource helpers.
//!
//! Thin wrappers around the cluster client for the OLM objects every
//! operator install polls on: package manifests, catalog sources,
//! subscriptions and CSVs.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::client::KubeClient;
use crate::error::{ErrorKind, OpsError};
use crate::retry::{poll_until, Probe, RetryPolicy};

/// Namespace hosting catalog sources and package manifests.
pub const MARKETPLACE_NAMESPACE: &str = "openshift-marketplace";

/// A package manifest in the marketplace namespace.
pub struct PackageManifest {
    client: KubeClient,
    name: String,
    selector: Option<String>,
}

impl PackageManifest {
    /// Handle for the named package manifest.
    #[must_use]
    pub fn new(client: KubeClient, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
            selector: None,
        }
    }

    /// Restrict lookups to a label selector.
    #[must_use]
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    /// Fetch the manifest document, retrying while the catalog is still
    /// populating.
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` once the retry budget is exhausted.
    pub async fn get(&self) -> Result<Value, OpsError> {
        let policy = RetryPolicy::new(
            &[ErrorKind::ResourceNotFound, ErrorKind::CommandFailed],
            10,
            Duration::from_secs(10),
        );
        policy.run(|| self.fetch()).await
    }

    async fn fetch(&self) -> Result<Value, OpsError> {
        let doc = self
            .client
            .get(
                "packagemanifest",
                Some(&self.name),
                Some(MARKETPLACE_NAMESPACE),
                self.selector.as_deref(),
            )
            .await?;
        // Selector queries come back as a List; pick the matching item.
        if doc.get("kind").and_then(Value::as_str) == Some("List") {
            let items = doc
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let found = items.into_iter().find(|item| {
                item.pointer("/metadata/name").and_then(Value::as_str) == Some(self.name.as_str())
            });
            return found.ok_or_else(|| {
                OpsError::ResourceNotFound(format!("packagemanifest/{}", self.name))
            });
        }
        Ok(doc)
    }

    /// Wait until the package manifest exists at all.
    ///
    /// # Errors
    ///
    /// `TimeoutExpired` when it never appears.
    pub async fn wait_until_present(&self, timeout: Duration) -> Result<(), OpsError> {
        let what = format!("packagemanifest/{}", self.name);
        let this = self;
        poll_until(&what, timeout, Duration::from_secs(10), move || async move {
            match this.fetch().await {
                Ok(_) => Ok(Probe::Ready(())),
                Err(OpsError::ResourceNotFound(name)) => Ok(Probe::Pending(name)),
                Err(OpsError::CommandFailed { stderr, .. }) => {
                    Ok(Probe::Pending(stderr.trim().to_string()))
                }
                Err(other) => Err(other),
            }
        })
        .await
    }

    /// The manifest's default channel.
    ///
    /// # Errors
    ///
    /// `ResourceWrongState` when the manifest carries no default channel.
    pub async fn default_channel(&self) -> Result<String, OpsError> {
        let doc = self.get().await?;
        doc.pointer("/status/defaultChannel")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| OpsError::ResourceWrongState {
                kind: "packagemanifest".into(),
                name: self.name.clone(),
                state: "no defaultChannel in status".into(),
            })
    }

    /// The CSV currently served on `channel`.
    ///
    /// # Errors
    ///
    /// `ResourceWrongState` when the channel is absent.
    pub async fn current_csv(&self, channel: &str) -> Result<String, OpsError> {
        let doc = self.get().await?;
        let channels = doc
            .pointer("/status/channels")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        channels
            .iter()
            .find(|c| c.get("name").and_then(Value::as_str) == Some(channel))
            .and_then(|c| c.get("currentCSV").and_then(Value::as_str))
            .map(ToString::to_string)
            .ok_or_else(|| OpsError::ResourceWrongState {
                kind: "packagemanifest".into(),
                name: self.name.clone(),
                state: format!("channel {channel} not found"),
            })
    }
}

/// A catalog source and its readiness condition.
pub struct CatalogSource {
    client: KubeClient,
    name: String,
    namespace: String,
}

impl CatalogSource {
    /// Handle for the named catalog source.
    #[must_use]
    pub fn new(client: KubeClient, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Wait until the registry reports the desired connection state.
    ///
    /// # Errors
    ///
    /// `TimeoutExpired` when the state is never reached.
    pub async fn wait_for_state(&self, state: &str, timeout: Duration) -> Result<(), OpsError> {
        info!(
            catalog_source = %self.name,
            state,
            "Waiting for catalog source state"
        );
        self.client
            .wait_for_resource(
                "catalogsource",
                &self.name,
                Some(&self.namespace),
                timeout,
                Duration::from_secs(5),
                |doc| {
                    doc.pointer("/status/connectionState/lastObservedState")
                        .and_then(Value::as_str)
                        == Some(state)
                },
            )
            .await?;
        Ok(())
    }
}

/// A cluster service version and its install phase.
pub struct ClusterServiceVersion {
    client: KubeClient,
    name: String,
    namespace: String,
}

impl ClusterServiceVersion {
    /// Handle for the named CSV.
    #[must_use]
    pub fn new(client: KubeClient, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Wait until the CSV reaches `phase` (normally `Succeeded`).
    ///
    /// # Errors
    ///
    /// `TimeoutExpired` when the phase is never reached.
    pub async fn wait_for_phase(&self, phase: &str, timeout: Duration) -> Result<(), OpsError> {
        info!(csv = %self.name, phase, "Waiting for CSV phase");
        self.client
            .wait_for_resource(
                "csv",
                &self.name,
                Some(&self.namespace),
                timeout,
                Duration::from_secs(5),
                |doc| doc.pointer("/status/phase").and_then(Value::as_str) == Some(phase),
            )
            .await?;
        Ok(())
    }
}

/// Wait until a subscription whose name contains `pattern` exists in
/// `namespace`.
///
/// # Errors
///
/// `TimeoutExpired` when no matching subscription appears.
pub async fn wait_for_subscription(
    client: &KubeClient,
    namespace: &str,
    pattern: &str,
    timeout: Duration,
) -> Result<String, OpsError> {
    let what = format!("subscription matching {pattern}");
    poll_until(&what, timeout, Duration::from_secs(10), move || async move {
        let doc = match client
            .get("subscriptions.operators.coreos.com", None, Some(namespace), None)
            .await
        {
            Ok(doc) => doc,
            Err(OpsError::CommandFailed { stderr, .. }) => {
                return Ok(Probe::Pending(stderr.trim().to_string()));
            }
            Err(other) => return Err(other),
        };
        let names: Vec<String> = list_names(&doc);
        match names.iter().find(|n| n.contains(pattern)) {
            Some(name) => {
                debug!(subscription = %name, "Subscription found");
                Ok(Probe::Ready(name.clone()))
            }
            None => Ok(Probe::Pending(format!("present: {names:?}"))),
        }
    })
    .await
}

/// Wait until a CSV whose name contains `pattern` exists in `namespace`.
///
/// # Errors
///
/// `TimeoutExpired` when no matching CSV appears.
pub async fn wait_for_csv_matching(
    client: &KubeClient,
    namespace: &str,
    pattern: &str,
    timeout: Duration,
) -> Result<String, OpsError> {
    let what = format!("csv matching {pattern}");
    poll_until(&what, timeout, Duration::from_secs(10), move || async move {
        let doc = match client.get("csv", None, Some(namespace), None).await {
            Ok(doc) => doc,
            Err(OpsError::CommandFailed { stderr, .. }) => {
                return Ok(Probe::Pending(stderr.trim().to_string()));
            }
            Err(other) => return Err(other),
        };
        let names = list_names(&doc);
        match names.iter().find(|n| n.contains(pattern)) {
            Some(name) => {
                debug!(csv = %name, "CSV found");
                Ok(Probe::Ready(name.clone()))
            }
            None => Ok(Probe::Pending(format!("present: {names:?}"))),
        }
    })
    .await
}

/// Names of every item in a List document.
fn list_names(doc: &Value) -> Vec<String> {
    doc.get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.pointer("/metadata/name").and_then(Value::as_str))
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_names() {
        let doc = json!({
            "kind": "List",
            "items": [
                {"metadata": {"name": "odf-operator"}},
                {"metadata": {"name": "mco-operator"}},
            ]
        });
        assert_eq!(list_names(&doc), vec!["odf-operator", "mco-operator"]);
    }

    #[test]
    fn test_list_names_empty_document() {
        assert!(list_names(&json!({})).is_empty());
    }
}
