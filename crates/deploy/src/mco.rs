//! Multicluster orchestrator operator install (hub only).

use std::time::Duration;

use anyhow::{Context, Result};
use framework::ClusterConfig;
use ops::resources::{self, PackageManifest};
use ops::template;
use serde_json::json;
use tracing::info;

use crate::cluster;
use crate::operators;
use crate::templates;

/// Operator package name.
pub const MCO_OPERATOR_NAME: &str = "odf-multicluster-orchestrator";
/// Namespace the orchestrator subscription lands in.
pub const MCO_OPERATOR_NAMESPACE: &str = "openshift-operators";
/// Console plugin enabled after the install.
pub const MCO_PLUGIN_NAME: &str = "odf-multicluster-console";

/// Install the multicluster orchestrator on the hub cluster.
///
/// # Errors
///
/// Returns an error when any install step fails or times out.
pub async fn install(config: &ClusterConfig) -> Result<()> {
    info!(cluster = %config.env.cluster_name, "Installing multicluster orchestrator");
    let client = cluster::client_for(config);

    // The hub may have skipped the storage stage, so the catalog source
    // is ensured here as well.
    operators::create_catalog_source(&client, config).await?;

    let manifest = PackageManifest::new(client.clone(), MCO_OPERATOR_NAME);
    manifest
        .wait_until_present(Duration::from_secs(300))
        .await
        .context("waiting for orchestrator package manifest")?;

    let channel = match &config.deployment.csv_channel {
        Some(custom) => {
            info!(channel = %custom, "Custom channel will be used");
            custom.clone()
        }
        None => {
            let default = manifest.default_channel().await?;
            info!(channel = %default, "Default channel will be used");
            default
        }
    };
    let starting_csv = manifest.current_csv(&channel).await?;
    let source = if config.deployment.stage {
        operators::OPERATOR_SOURCE_NAME
    } else {
        operators::OPERATOR_CATALOG_SOURCE_NAME
    };

    let rendered = template::render(
        templates::SUBSCRIPTION_MCO,
        &json!({
            "namespace": MCO_OPERATOR_NAMESPACE,
            "channel": channel,
            "starting_csv": starting_csv,
            "source": source,
        }),
    )?;
    let path = template::write_temp_manifest(&rendered, "subscription_manifest")?;
    client
        .apply_file(&path, Duration::from_secs(600))
        .await
        .context("applying orchestrator subscription")?;

    resources::wait_for_subscription(
        &client,
        MCO_OPERATOR_NAMESPACE,
        MCO_OPERATOR_NAME,
        Duration::from_secs(300),
    )
    .await
    .context("waiting for orchestrator subscription")?;
    resources::wait_for_csv_matching(
        &client,
        MCO_OPERATOR_NAMESPACE,
        MCO_OPERATOR_NAME,
        Duration::from_secs(300),
    )
    .await
    .context("waiting for orchestrator CSV")?;

    info!("Sleeping for 30 seconds after CSV creation");
    tokio::time::sleep(Duration::from_secs(30)).await;

    operators::enable_console_plugin(
        &client,
        MCO_OPERATOR_NAMESPACE,
        MCO_PLUGIN_NAME,
        config.multicluster.enable_console_plugin,
    )
    .await?;
    Ok(())
}
