//! Ingress certificate exchange across the fleet.
//!
//! Every cluster's default ingress CA is collected into one bundle; the
//! bundle is installed as a trusted CA configmap on each cluster and the
//! cluster proxy is patched to use it, so application traffic between
//! clusters trusts every fleet member's ingress.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use framework::ClusterConfig;
use ops::template;
use serde_yaml::Value;
use tracing::info;

use crate::cluster;
use crate::templates;

/// Read one cluster's default ingress CA bundle.
///
/// # Errors
///
/// Returns an error when the configmap cannot be read or carries no CA.
pub async fn ingress_ca(config: &ClusterConfig) -> Result<String> {
    let client = cluster::client_for(config);
    let ca = client
        .get_jsonpath(
            "cm",
            "default-ingress-cert",
            Some("openshift-config-managed"),
            ".data.ca-bundle\\.crt",
        )
        .await
        .with_context(|| format!("reading ingress CA of {}", config.env.cluster_name))?;
    if ca.trim().is_empty() {
        bail!(
            "cluster {} returned an empty ingress CA bundle",
            config.env.cluster_name
        );
    }
    Ok(ca)
}

/// Install the fleet trust bundle on one cluster and point the cluster
/// proxy at it.
///
/// # Errors
///
/// Returns an error when the configmap create or proxy patch fails.
pub async fn apply_trust_bundle(config: &ClusterConfig, bundle: &str) -> Result<()> {
    info!(cluster = %config.env.cluster_name, "Installing fleet trust bundle");
    let mut doc: Value = serde_yaml::from_str(templates::SSL_CERTIFICATE)?;
    let Some(data) = doc.get_mut("data").and_then(Value::as_mapping_mut) else {
        bail!("trust bundle template has no data section");
    };
    data.insert("ca-bundle.crt".into(), bundle.into());

    let path = template::write_yaml_manifest(&doc, "ssl_cert")?;
    let client = cluster::client_for(config);
    client
        .create_file(&path, None)
        .await
        .context("creating trust bundle configmap")?;
    client
        .patch(
            "proxy",
            "cluster",
            None,
            "merge",
            r#"{"spec":{"trustedCA":{"name":"user-ca-bundle"}}}"#,
        )
        .await
        .context("pointing cluster proxy at the trust bundle")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_bundle_template_accepts_payload() {
        let mut doc: Value = serde_yaml::from_str(templates::SSL_CERTIFICATE).unwrap();
        let data = doc.get_mut("data").and_then(Value::as_mapping_mut).unwrap();
        data.insert(
            "ca-bundle.crt".into(),
            "-----BEGIN CERTIFICATE-----\nabc\n-----END CERTIFICATE-----\n".into(),
        );
        let dumped = serde_yaml::to_string(&doc).unwrap();
        assert!(dumped.contains("BEGIN CERTIFICATE"));
        assert!(dumped.contains("user-ca-bundle"));
    }
}
