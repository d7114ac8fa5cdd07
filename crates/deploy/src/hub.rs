//! ACM hub install (hub only).

use std::time::Duration;

use anyhow::{Context, Result};
use framework::ClusterConfig;
use ops::resources::{ClusterServiceVersion, PackageManifest};
use ops::{template, KubeClient};
use serde_json::{json, Value};
use tracing::info;

use crate::cluster;
use crate::templates;

/// Namespace the hub operator and its CR live in.
pub const ACM_NAMESPACE: &str = "open-cluster-management";
/// Hub operator package name.
pub const ACM_OPERATOR_NAME: &str = "advanced-cluster-management";
/// Name of the MultiClusterHub resource created by the install.
pub const ACM_HUB_RESOURCE: &str = "multiclusterhub";

/// Install the ACM hub on the hub cluster.
///
/// # Errors
///
/// Returns an error when any install step fails or times out.
pub async fn install(config: &ClusterConfig) -> Result<()> {
    info!(cluster = %config.env.cluster_name, "Installing ACM hub");
    let client = cluster::client_for(config);
    let channel = &config.multicluster.hub_channel;

    info!("Creating hub namespace");
    let namespace = template::render(templates::NAMESPACE, &json!({ "name": ACM_NAMESPACE }))?;
    let path = template::write_temp_manifest(&namespace, "acm_hub_namespace_manifest")?;
    client
        .create_file(&path, None)
        .await
        .context("creating hub namespace")?;

    info!("Creating operator group for the hub");
    let group = template::render(templates::ACM_OPERATORGROUP, &json!({}))?;
    let path = template::write_temp_manifest(&group, "acm_hub_operatorgroup_manifest")?;
    client
        .create_file(&path, Some(ACM_NAMESPACE))
        .await
        .context("creating hub operator group")?;

    info!(channel = %channel, "Creating hub subscription");
    let manifest = PackageManifest::new(client.clone(), ACM_OPERATOR_NAME);
    let starting_csv = manifest.current_csv(channel).await?;
    let subscription = template::render(
        templates::ACM_SUBSCRIPTION,
        &json!({
            "channel": channel,
            "starting_csv": starting_csv,
        }),
    )?;
    let path = template::write_temp_manifest(&subscription, "acm_hub_subscription_manifest")?;
    client
        .create_file(&path, None)
        .await
        .context("creating hub subscription")?;

    info!("Sleeping for 90 seconds after subscribing to the hub operator");
    tokio::time::sleep(Duration::from_secs(90)).await;

    let csv_name = manifest.current_csv(channel).await?;
    ClusterServiceVersion::new(client.clone(), csv_name, ACM_NAMESPACE)
        .wait_for_phase("Succeeded", Duration::from_secs(720))
        .await
        .context("waiting for hub operator CSV")?;
    info!("Hub operator deployment succeeded");

    info!("Creating MultiClusterHub");
    let hub_cr = template::render(templates::ACM_MULTICLUSTERHUB, &json!({}))?;
    let path = template::write_temp_manifest(&hub_cr, "acm_multiclusterhub_manifest")?;
    client
        .create_file(&path, Some(ACM_NAMESPACE))
        .await
        .context("creating MultiClusterHub")?;

    validate_hub_install(&client).await
}

/// Verify the MultiClusterHub reached the Running phase.
///
/// # Errors
///
/// Returns an error when the hub never reports Running.
pub async fn validate_hub_install(client: &KubeClient) -> Result<()> {
    info!("Verifying MultiClusterHub installation");
    client
        .wait_for_resource(
            "multiclusterhub",
            ACM_HUB_RESOURCE,
            Some(ACM_NAMESPACE),
            Duration::from_secs(720),
            Duration::from_secs(5),
            |doc| doc.pointer("/status/phase").and_then(Value::as_str) == Some("Running"),
        )
        .await
        .context("waiting for MultiClusterHub to run")?;
    info!("MultiClusterHub deployment succeeded");
    Ok(())
}
