//! Shared operator-install plumbing.
//!
//! The storage operator and the multicluster orchestrator both install
//! from the same custom catalog source; the pieces they share live here.

use std::time::Duration;

use anyhow::{Context, Result};
use framework::ClusterConfig;
use ops::resources::{CatalogSource, MARKETPLACE_NAMESPACE};
use ops::{template, KubeClient};
use serde_json::json;
use tracing::{debug, info};

use crate::templates;

/// Name of the custom catalog source. It shadows the stock one, which is
/// why the stock source gets disabled first.
pub const OPERATOR_CATALOG_SOURCE_NAME: &str = "redhat-operators";

/// Operator source used for staged builds instead of the custom catalog.
pub const OPERATOR_SOURCE_NAME: &str = "ocs-operatorsource";

/// Disable a default operator source so the custom catalog can take its
/// name.
///
/// # Errors
///
/// Returns an error if the operatorhub patch fails.
pub async fn disable_default_source(client: &KubeClient, source_name: &str) -> Result<()> {
    info!(source = %source_name, "Disabling default operator source");
    let patch =
        format!(r#"{{"spec":{{"sources":[{{"disabled":true,"name":"{source_name}"}}]}}}}"#);
    client
        .patch("operatorhub.config.openshift.io", "cluster", None, "merge", &patch)
        .await
        .context("disabling default operator source")?;
    info!(source = %source_name, "Waiting 20 seconds after disabling source");
    tokio::time::sleep(Duration::from_secs(20)).await;
    Ok(())
}

/// Apply the custom catalog source and wait until its registry is READY.
///
/// # Errors
///
/// Returns an error if the apply fails or readiness times out.
pub async fn create_catalog_source(client: &KubeClient, config: &ClusterConfig) -> Result<()> {
    info!("Adding catalog source");
    let image = registry_image(config);
    let rendered = template::render(
        templates::CATALOG_SOURCE,
        &json!({
            "name": OPERATOR_CATALOG_SOURCE_NAME,
            "image": image,
        }),
    )?;
    let manifest = template::write_temp_manifest(&rendered, "catalog_source_manifest")?;
    client
        .apply_file(&manifest, Duration::from_secs(2400))
        .await
        .context("applying catalog source manifest")?;

    CatalogSource::new(
        client.clone(),
        OPERATOR_CATALOG_SOURCE_NAME,
        MARKETPLACE_NAMESPACE,
    )
    .wait_for_state("READY", Duration::from_secs(480))
    .await
    .context("waiting for catalog source readiness")?;
    Ok(())
}

/// The registry image for the catalog source: the configured override, or
/// the default, with a `latest` tag when none is given.
fn registry_image(config: &ClusterConfig) -> String {
    let image = config
        .env
        .storage_registry_image
        .clone()
        .unwrap_or_else(|| config.env.default_storage_registry_image.clone());
    let tagged = image
        .rsplit_once('/')
        .map_or(image.contains(':'), |(_, name)| name.contains(':'));
    if tagged {
        image
    } else {
        format!("{image}:latest")
    }
}

/// Enable a console plugin, falling back to creating the plugin list when
/// the console has none yet.
///
/// # Errors
///
/// Returns an error when both patch forms fail.
pub async fn enable_console_plugin(
    client: &KubeClient,
    namespace: &str,
    plugin: &str,
    enabled: bool,
) -> Result<()> {
    if !enabled {
        debug!(plugin = %plugin, "Skipping console plugin");
        return Ok(());
    }
    info!(plugin = %plugin, "Enabling console plugin");
    let append = format!(r#"[{{"op": "add", "path": "/spec/plugins/-", "value": "{plugin}"}}]"#);
    if client
        .patch("console.operator", "cluster", Some(namespace), "json", &append)
        .await
        .is_ok()
    {
        return Ok(());
    }
    let create = format!(r#"[{{"op": "add", "path": "/spec/plugins", "value": ["{plugin}"]}}]"#);
    client
        .patch("console.operator", "cluster", Some(namespace), "json", &create)
        .await
        .context("enabling console plugin")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_images(image: Option<&str>, default_image: &str) -> ClusterConfig {
        let mut config = ClusterConfig::default();
        let mut doc = format!("env:\n  default_storage_registry_image: {default_image}\n");
        if let Some(image) = image {
            doc.push_str(&format!("  storage_registry_image: {image}\n"));
        }
        let overlay: serde_yaml::Value = serde_yaml::from_str(&doc).unwrap();
        config.update(&overlay).unwrap();
        config
    }

    #[test]
    fn test_registry_image_prefers_override() {
        let config = config_with_images(
            Some("quay.io/acme/catalog:v4.12"),
            "quay.io/acme/default:latest",
        );
        assert_eq!(registry_image(&config), "quay.io/acme/catalog:v4.12");
    }

    #[test]
    fn test_registry_image_appends_latest_tag() {
        let config = config_with_images(Some("quay.io/acme/catalog"), "unused");
        assert_eq!(registry_image(&config), "quay.io/acme/catalog:latest");
    }

    #[test]
    fn test_registry_image_ignores_port_colon() {
        let config = config_with_images(Some("registry.local:5000/acme/catalog"), "unused");
        assert_eq!(
            registry_image(&config),
            "registry.local:5000/acme/catalog:latest"
        );
    }
}
