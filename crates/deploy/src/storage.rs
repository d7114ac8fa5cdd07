//! Storage operator install.
//!
//! Points the cluster at the custom storage catalog: the stock source is
//! disabled (the custom catalog takes its name) and the catalog source is
//! applied and waited into READY. The operator subscription itself rides
//! the catalog through OLM.

use anyhow::Result;
use framework::ClusterConfig;
use tracing::info;

use crate::cluster;
use crate::operators;

/// Install the storage operator prerequisites on one cluster.
///
/// # Errors
///
/// Returns an error if the catalog source cannot be applied or never
/// becomes READY.
pub async fn install(config: &ClusterConfig) -> Result<()> {
    info!(cluster = %config.env.cluster_name, "Installing storage operator catalog");
    let client = cluster::client_for(config);
    operators::disable_default_source(&client, operators::OPERATOR_CATALOG_SOURCE_NAME).await?;
    operators::create_catalog_source(&client, config).await?;
    Ok(())
}
