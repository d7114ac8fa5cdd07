//! Managed-cluster import into the hub.
//!
//! Each import renders a two-document manifest (the ManagedCluster and
//! its auto-import secret carrying the managed cluster's kubeconfig) and
//! applies it against the hub. The settle delay follows the whole batch,
//! in the pipeline, not each individual import.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use framework::ClusterConfig;
use ops::template;
use serde::Deserialize;
use serde_json::json;
use serde_yaml::Value;
use tracing::info;

use crate::cluster;
use crate::templates;

/// Settle delay applied once after the whole import batch.
pub const IMPORT_SETTLE_DELAY: Duration = Duration::from_secs(60);

/// Import `managed` into `hub` as a managed cluster.
///
/// # Errors
///
/// Returns an error when the manifest cannot be produced or applied.
pub async fn import_cluster(hub: &ClusterConfig, managed: &ClusterConfig) -> Result<()> {
    info!(cluster = %managed.env.cluster_name, "Generating import manifest");
    let rendered = template::render(
        templates::IMPORT_CLUSTER,
        &json!({ "cluster_name": managed.env.cluster_name }),
    )?;

    let mut docs: Vec<Value> = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(&rendered) {
        docs.push(Value::deserialize(doc).context("parsing import manifest template")?);
    }

    let kubeconfig_path = managed.kubeconfig_path();
    let kubeconfig = std::fs::read_to_string(&kubeconfig_path)
        .with_context(|| format!("reading kubeconfig at {}", kubeconfig_path.display()))?;
    if !inject_kubeconfig(&mut docs, &kubeconfig) {
        bail!("import manifest has no auto-import secret document");
    }

    let content = docs
        .iter()
        .map(serde_yaml::to_string)
        .collect::<std::result::Result<Vec<_>, _>>()?
        .join("---\n");
    let path = template::write_temp_manifest(&content, "aws_import_cluster")?;

    let hub_client = cluster::client_for(hub);
    hub_client
        .apply_file(&path, Duration::from_secs(2400))
        .await
        .with_context(|| format!("importing {} into the hub", managed.env.cluster_name))?;
    Ok(())
}

/// Put the kubeconfig into the secret document's stringData. Returns
/// false when no document carries a stringData section.
fn inject_kubeconfig(docs: &mut [Value], kubeconfig: &str) -> bool {
    for doc in docs {
        if let Some(string_data) = doc
            .get_mut("stringData")
            .and_then(Value::as_mapping_mut)
        {
            string_data.insert("kubeconfig".into(), kubeconfig.into());
            return true;
        }
    }
    false
}
