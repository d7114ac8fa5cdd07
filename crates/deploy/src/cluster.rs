//! Cluster bring-up and teardown via the installer binary.
//!
//! The synchronous prerequisites (installer provisioning, install-config
//! rendering) run on the orchestrating task; the installer invocation
//! itself is handed to a worker as an [`InstallJob`] carrying fully
//! resolved values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use framework::config::expand_home;
use framework::ClusterConfig;
use ops::bins::{self, ToolSpec};
use ops::cmd::{exec_cmd, ExecOpts};
use ops::template;
use ops::KubeClient;
use serde_json::json;
use tracing::{debug, info};

use crate::templates;

/// Deadline for one installer create/destroy invocation.
pub const INSTALLER_TIMEOUT: Duration = Duration::from_secs(3600);

/// Resolved inputs for one cluster's installer worker. Workers receive
/// this instead of registry access.
#[derive(Debug, Clone)]
pub struct InstallJob {
    pub cluster_name: String,
    pub installer: PathBuf,
    pub cluster_path: PathBuf,
    pub log_level: String,
}

/// Client bound to this cluster's kubeconfig, preferring the downloaded
/// binary over whatever is on PATH.
#[must_use]
pub fn client_for(config: &ClusterConfig) -> KubeClient {
    let client = KubeClient::new(config.kubeconfig_path());
    let local = config.bin_dir().join(bins::CLIENT_BIN);
    if local.is_file() {
        client.with_binary(local.display().to_string())
    } else {
        client
    }
}

/// Whether the cluster already answers on its kubeconfig.
pub async fn is_cluster_running(config: &ClusterConfig) -> bool {
    client_for(config).cluster_reachable().await
}

/// Bring-up prerequisites: installer binary and install-config.
///
/// `first_context` scopes forced re-downloads to the first cluster so a
/// parallel context cannot delete a binary in use.
///
/// # Errors
///
/// Returns an error when the installer cannot be provisioned or the
/// install-config cannot be produced.
pub async fn prepare_bring_up(config: &ClusterConfig, first_context: bool) -> Result<InstallJob> {
    let version = bins::resolve_version(
        &config.deployment.installer_version,
        &config.deployment.channel,
        config.deployment.version_index,
    )
    .await
    .context("resolving installer version")?;

    let installer = bins::ensure_installer(&ToolSpec {
        mirror_url: config.deployment.mirror_url.clone(),
        version,
        bin_dir: config.bin_dir(),
        force: config.deployment.force_download_installer,
        first_context,
    })
    .await
    .context("provisioning installer binary")?;

    create_install_config(config).context("creating install-config")?;

    Ok(InstallJob {
        cluster_name: config.env.cluster_name.clone(),
        installer,
        cluster_path: config.env.cluster_path.clone(),
        log_level: config.run.log_level.to_lowercase(),
    })
}

/// Render the install-config and write it into the cluster directory.
fn create_install_config(config: &ClusterConfig) -> Result<()> {
    info!("Generating install-config");
    let rendered = template::render(
        templates::INSTALL_CONFIG_AWS,
        &json!({
            "cluster_name": config.env.cluster_name,
            "base_domain": config.env.base_domain,
            "region": config.env.region,
        }),
    )?;
    // Log before the pull secret goes in, so nothing sensitive leaks.
    info!("Install config:\n{rendered}");

    let mut doc: serde_yaml::Value = serde_yaml::from_str(&rendered)?;
    let Some(map) = doc.as_mapping_mut() else {
        bail!("rendered install-config is not a mapping");
    };
    map.insert("pullSecret".into(), pull_secret(config)?.into());
    if let Some(key) = ssh_key(config)? {
        map.insert("sshKey".into(), key.into());
    }

    std::fs::create_dir_all(&config.env.cluster_path).with_context(|| {
        format!(
            "creating cluster directory {}",
            config.env.cluster_path.display()
        )
    })?;
    let path = config.env.cluster_path.join("install-config.yaml");
    std::fs::write(&path, serde_yaml::to_string(&doc)?)?;
    info!(path = %path.display(), "Install config written");
    Ok(())
}

/// Load the pull secret, re-serialized onto a single well-formed line.
fn pull_secret(config: &ClusterConfig) -> Result<String> {
    let path = expand_home(&config.run.data_dir).join("pull-secret");
    if !path.is_file() {
        bail!("pull secret does not exist at {}", path.display());
    }
    let content = std::fs::read_to_string(&path)?;
    let parsed: serde_json::Value =
        serde_json::from_str(&content).context("pull secret is not valid JSON")?;
    Ok(serde_json::to_string(&parsed)?)
}

/// Load the public ssh key, or None when not configured on disk.
fn ssh_key(config: &ClusterConfig) -> Result<Option<String>> {
    let path = expand_home(&config.deployment.ssh_key);
    if !path.is_file() {
        debug!(path = %path.display(), "No ssh key found, continuing without one");
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)?;
    Ok(content.lines().next().map(|line| line.trim().to_string()))
}

/// The long-running installer invocation for one cluster.
///
/// # Errors
///
/// Returns an error when the installer exits non-zero or times out.
pub async fn create_cluster(job: &InstallJob) -> Result<()> {
    info!(
        cluster = %job.cluster_name,
        "Deploying cluster; this can take close to an hour"
    );
    let installer = job.installer.display().to_string();
    let dir = job.cluster_path.display().to_string();
    let log_level = format!("--log-level={}", job.log_level);
    exec_cmd(
        &[
            installer.as_str(),
            "create",
            "cluster",
            "--dir",
            &dir,
            &log_level,
        ],
        ExecOpts::with_timeout(INSTALLER_TIMEOUT),
    )
    .await
    .with_context(|| format!("deploying cluster {}", job.cluster_name))?;
    Ok(())
}

/// Destroy a cluster previously created from `cluster_path`.
///
/// # Errors
///
/// Returns an error when the installer exits non-zero or times out.
pub async fn destroy_cluster(installer: &Path, cluster_path: &Path, log_level: &str) -> Result<()> {
    info!(path = %cluster_path.display(), "Destroying cluster");
    let installer = installer.display().to_string();
    let dir = cluster_path.display().to_string();
    let log_level = format!("--log-level={}", log_level.to_lowercase());
    exec_cmd(
        &[
            installer.as_str(),
            "destroy",
            "cluster",
            "--dir",
            &dir,
            &log_level,
        ],
        ExecOpts::with_timeout(INSTALLER_TIMEOUT),
    )
    .await
    .with_context(|| format!("destroying cluster at {}", cluster_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(data_dir: &Path, cluster_path: &Path) -> ClusterConfig {
        let mut config = ClusterConfig::default();
        let overlay: serde_yaml::Value = serde_yaml::from_str(&format!(
            "env:\n  cluster_name: dr1\n  cluster_path: {}\nrun:\n  data_dir: {}\n",
            cluster_path.display(),
            data_dir.display()
        ))
        .unwrap();
        config.update(&overlay).unwrap();
        config
    }

    #[test]
    fn test_pull_secret_normalized_to_single_line() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pull-secret"),
            "{\n  \"auths\": {\n    \"quay.io\": {\"auth\": \"abc\"}\n  }\n}\n",
        )
        .unwrap();
        let config = config_with(dir.path(), Path::new("/tmp/dr1"));
        let secret = pull_secret(&config).unwrap();
        assert!(!secret.contains('\n'));
        assert!(secret.contains("quay.io"));
    }

    #[test]
    fn test_pull_secret_missing_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), Path::new("/tmp/dr1"));
        assert!(pull_secret(&config).is_err());
    }

    #[test]
    fn test_create_install_config_injects_secret() {
        let data_dir = tempfile::tempdir().unwrap();
        let cluster_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            data_dir.path().join("pull-secret"),
            "{\"auths\": {}}",
        )
        .unwrap();
        let config = config_with(data_dir.path(), cluster_dir.path());

        create_install_config(&config).unwrap();

        let written =
            std::fs::read_to_string(cluster_dir.path().join("install-config.yaml")).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&written).unwrap();
        assert_eq!(
            doc.get("pullSecret").and_then(serde_yaml::Value::as_str),
            Some("{\"auths\":{}}")
        );
        assert!(written.contains("name: dr1"));
        assert!(written.contains("region: us-east-2"));
    }

    #[test]
    fn test_client_prefers_downloaded_binary_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ClusterConfig::default();
        let overlay: serde_yaml::Value = serde_yaml::from_str(&format!(
            "env:\n  cluster_name: dr1\n  cluster_path: /tmp/dr1\nrun:\n  bin_dir: {}\n",
            dir.path().display()
        ))
        .unwrap();
        config.update(&overlay).unwrap();

        // Without the binary on disk the PATH client is used.
        let _ = client_for(&config);
        std::fs::write(dir.path().join("oc"), "").unwrap();
        let _ = client_for(&config);
    }
}
