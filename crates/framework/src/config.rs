//! Per-cluster configuration model.
//!
//! A cluster's configuration is a YAML document with five sections
//! (`env`, `run`, `deployment`, `multicluster`, `reporting`). The document
//! starts from built-in defaults and is refined by overlay files and CLI
//! flags: overlays are deep-merged in the order given, later files winning,
//! and explicit CLI flags win over everything merged from files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::FrameworkError;

/// Environment data: identity and platform of one cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// Name of the cluster being deployed.
    pub cluster_name: String,
    /// Directory holding the installer's state for this cluster.
    pub cluster_path: PathBuf,
    /// Deployment platform. Only `aws` has an implementation.
    pub platform: String,
    /// Cloud region the cluster lives in.
    pub region: String,
    /// Base DNS domain for cluster endpoints.
    pub base_domain: String,
    /// Skip the cluster bring-up stage for this cluster.
    pub skip_cluster_deploy: bool,
    /// Skip the storage operator stage for this cluster.
    pub skip_storage_deploy: bool,
    /// Storage operator registry image override (`repo:tag`).
    pub storage_registry_image: Option<String>,
    /// Fallback storage registry image when no override is set.
    pub default_storage_registry_image: String,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            cluster_path: PathBuf::new(),
            platform: "aws".into(),
            region: "us-east-2".into(),
            base_domain: "devcluster.example.com".into(),
            skip_cluster_deploy: false,
            skip_storage_deploy: false,
            storage_registry_image: None,
            default_storage_registry_image: "quay.io/rhceph-dev/ocs-registry:latest".into(),
        }
    }
}

/// Run data: process-level settings shared by all stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Log level passed to external installer invocations.
    pub log_level: String,
    /// Directory where downloaded binaries are kept.
    pub bin_dir: PathBuf,
    /// Directory with auth material (pull secret, SMTP password).
    pub data_dir: PathBuf,
    /// Kubeconfig location relative to the cluster path.
    pub kubeconfig_location: PathBuf,
    /// Admin password location relative to the cluster path.
    pub password_location: PathBuf,
    /// Console login user reported at the end of the run.
    pub username: String,
    /// Identifier of this run, stamped into logs and report subjects.
    pub run_id: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".into(),
            bin_dir: PathBuf::from("./bin"),
            data_dir: PathBuf::from("./data"),
            kubeconfig_location: PathBuf::from("auth/kubeconfig"),
            password_location: PathBuf::from("auth/kubeadmin-password"),
            username: "kubeadmin".into(),
            run_id: chrono::Utc::now().format("%Y%m%d%H%M%S").to_string(),
        }
    }
}

/// Deployment data: versions and sources of the installed pieces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Installer version. `X.Y-ga` and `*.nightly` forms are resolved
    /// against the release services before download.
    pub installer_version: String,
    /// Client binary version, resolved the same way.
    pub client_version: String,
    /// Mirror base URL for installer/client tarballs.
    pub mirror_url: String,
    /// Release channel used to resolve `-ga` versions.
    pub channel: String,
    /// Index into the channel's version list (-1 = latest).
    pub version_index: i64,
    /// Re-download the installer even when present.
    pub force_download_installer: bool,
    /// Re-download the client even when present.
    pub force_download_client: bool,
    /// Operator subscription channel override.
    pub csv_channel: Option<String>,
    /// Use the staging operator source instead of the custom catalog.
    pub stage: bool,
    /// Public ssh key injected into the install config.
    pub ssh_key: PathBuf,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            installer_version: "4.12-ga".into(),
            client_version: "4.12-ga".into(),
            mirror_url: "https://mirror.openshift.com/pub/openshift-v4/clients/ocp".into(),
            channel: "stable".into(),
            version_index: -1,
            force_download_installer: false,
            force_download_client: false,
            csv_channel: None,
            stage: false,
            ssh_key: PathBuf::from("~/.ssh/id_rsa.pub"),
        }
    }
}

/// Multicluster data: this cluster's role within the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MulticlusterConfig {
    /// This cluster runs the hub (ACM) operator and manages the fleet.
    pub hub_cluster: bool,
    /// This cluster is the designated primary from the DR perspective;
    /// the mesh broker is deployed here.
    pub primary_cluster: bool,
    /// Import this cluster into the hub as a managed cluster.
    pub import_as_managed_cluster: bool,
    /// Subscription channel for the hub operator.
    pub hub_channel: String,
    /// Mesh build source. Only `upstream` is recognized.
    pub mesh_source: String,
    /// Download URL override for the mesh CLI installer script.
    pub mesh_url: Option<String>,
    /// Broker info file produced by `deploy-broker` and consumed by `join`.
    pub mesh_info_file: String,
    /// Enable the multicluster console plugin after the MCO install.
    pub enable_console_plugin: bool,
}

impl Default for MulticlusterConfig {
    fn default() -> Self {
        Self {
            hub_cluster: false,
            primary_cluster: false,
            import_as_managed_cluster: false,
            hub_channel: "release-2.8".into(),
            mesh_source: "upstream".into(),
            mesh_url: None,
            mesh_info_file: "broker-info.subm".into(),
            enable_console_plugin: true,
        }
    }
}

/// Email reporting settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReportingConfig {
    pub email: EmailConfig,
}

/// SMTP settings for the end-of-run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// Comma-separated recipient list. Empty disables the report.
    pub recipients: String,
    /// Sender address, also the SMTP login user.
    pub address: String,
    pub smtp_server: String,
    pub smtp_port: u16,
    /// Skip the email notification for this cluster.
    pub skip_notification: bool,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            recipients: String::new(),
            address: String::new(),
            smtp_server: "smtp.gmail.com".into(),
            smtp_port: 465,
            skip_notification: false,
        }
    }
}

/// One cluster's full configuration: the merged raw document plus the
/// typed views regenerated after every merge.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    raw: Value,
    pub env: EnvConfig,
    pub run: RunConfig,
    pub deployment: DeploymentConfig,
    pub multicluster: MulticlusterConfig,
    pub reporting: ReportingConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let env = EnvConfig::default();
        let run = RunConfig::default();
        let deployment = DeploymentConfig::default();
        let multicluster = MulticlusterConfig::default();
        let reporting = ReportingConfig::default();
        let raw = serde_yaml::to_value(DocumentView {
            env: &env,
            run: &run,
            deployment: &deployment,
            multicluster: &multicluster,
            reporting: &reporting,
        })
        .unwrap_or(Value::Null);
        Self {
            raw,
            env,
            run,
            deployment,
            multicluster,
            reporting,
        }
    }
}

/// Serialization helper so the raw document stays in sync with the views.
#[derive(Serialize)]
struct DocumentView<'a> {
    env: &'a EnvConfig,
    run: &'a RunConfig,
    deployment: &'a DeploymentConfig,
    multicluster: &'a MulticlusterConfig,
    reporting: &'a ReportingConfig,
}

impl ClusterConfig {
    /// Deep-merge a partial configuration document into this one.
    ///
    /// Mappings merge recursively; scalars and sequences in the overlay
    /// replace the existing value. The typed views are regenerated from
    /// the merged document.
    ///
    /// # Errors
    ///
    /// Returns an error if the merged document no longer deserializes
    /// into the typed sections.
    pub fn update(&mut self, overlay: &Value) -> Result<(), FrameworkError> {
        deep_merge(&mut self.raw, overlay);
        self.retype()
    }

    /// Load an overlay file and merge it in.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the
    /// merged document fails to re-type.
    pub fn update_from_file(&mut self, path: &Path) -> Result<(), FrameworkError> {
        let content = std::fs::read_to_string(expand_home(path))?;
        let overlay: Value = serde_yaml::from_str(&content)?;
        self.update(&overlay)
    }

    fn retype(&mut self) -> Result<(), FrameworkError> {
        let section = |raw: &Value, key: &str| {
            raw.get(key)
                .cloned()
                .unwrap_or_else(|| Value::Mapping(serde_yaml::Mapping::new()))
        };
        self.env = serde_yaml::from_value(section(&self.raw, "env"))?;
        self.run = serde_yaml::from_value(section(&self.raw, "run"))?;
        self.deployment = serde_yaml::from_value(section(&self.raw, "deployment"))?;
        self.multicluster = serde_yaml::from_value(section(&self.raw, "multicluster"))?;
        self.reporting = serde_yaml::from_value(section(&self.raw, "reporting"))?;
        Ok(())
    }

    /// Validate that this configuration can actually be deployed.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPlatform` for non-aws platforms and
    /// `MissingConfigKey` when identity fields are absent.
    pub fn validate(&self) -> Result<(), FrameworkError> {
        if !self.env.platform.eq_ignore_ascii_case("aws") {
            return Err(FrameworkError::UnsupportedPlatform(
                self.env.platform.clone(),
            ));
        }
        if self.env.cluster_name.is_empty() {
            return Err(FrameworkError::MissingConfigKey("env.cluster_name".into()));
        }
        if self.env.cluster_path.as_os_str().is_empty() {
            return Err(FrameworkError::MissingConfigKey("env.cluster_path".into()));
        }
        Ok(())
    }

    /// Absolute path of this cluster's kubeconfig.
    #[must_use]
    pub fn kubeconfig_path(&self) -> PathBuf {
        self.env.cluster_path.join(&self.run.kubeconfig_location)
    }

    /// Absolute path of this cluster's admin password file.
    #[must_use]
    pub fn password_path(&self) -> PathBuf {
        self.env.cluster_path.join(&self.run.password_location)
    }

    /// Console URL derived from cluster name and base domain.
    #[must_use]
    pub fn console_url(&self) -> String {
        format!(
            "https://console-openshift-console.apps.{}.{}",
            self.env.cluster_name, self.env.base_domain
        )
    }

    /// API server URL derived from cluster name and base domain.
    #[must_use]
    pub fn api_url(&self) -> String {
        format!(
            "https://api.{}.{}:6443",
            self.env.cluster_name, self.env.base_domain
        )
    }

    /// Expanded bin directory.
    #[must_use]
    pub fn bin_dir(&self) -> PathBuf {
        expand_home(&self.run.bin_dir)
    }
}

/// Recursively merge `overlay` into `base`. Mappings merge key by key;
/// any other overlay value replaces the base value.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Expand a leading `~` to the user's home directory.
#[must_use]
pub fn expand_home(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if let Some(rest) = s.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = ClusterConfig::default();
        assert_eq!(config.env.platform, "aws");
        assert_eq!(
            config.run.kubeconfig_location,
            PathBuf::from("auth/kubeconfig")
        );
        assert!(!config.multicluster.hub_cluster);
        assert_eq!(config.reporting.email.smtp_port, 465);
    }

    #[test]
    fn test_update_merges_nested_keys() {
        let mut config = ClusterConfig::default();
        config
            .update(&yaml(
                "env:\n  cluster_name: dr1\n  cluster_path: /tmp/dr1\n",
            ))
            .unwrap();
        config
            .update(&yaml("env:\n  region: eu-west-1\n"))
            .unwrap();

        // Second overlay must not clobber sibling keys from the first.
        assert_eq!(config.env.cluster_name, "dr1");
        assert_eq!(config.env.region, "eu-west-1");
        // Untouched sections keep their defaults.
        assert_eq!(config.run.username, "kubeadmin");
    }

    #[test]
    fn test_later_overlay_wins() {
        let mut config = ClusterConfig::default();
        config
            .update(&yaml("deployment:\n  installer_version: 4.11-ga\n"))
            .unwrap();
        config
            .update(&yaml("deployment:\n  installer_version: 4.12-ga\n"))
            .unwrap();
        assert_eq!(config.deployment.installer_version, "4.12-ga");
    }

    #[test]
    fn test_overlay_file_round_trip() {
        let mut config = ClusterConfig::default();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            "multicluster:\n  hub_cluster: true\n  primary_cluster: false\n",
        )
        .unwrap();
        config.update_from_file(file.path()).unwrap();
        assert!(config.multicluster.hub_cluster);
    }

    #[test]
    fn test_validate_rejects_unsupported_platform() {
        let mut config = ClusterConfig::default();
        config
            .update(&yaml(
                "env:\n  cluster_name: c\n  cluster_path: /tmp/c\n  platform: vsphere\n",
            ))
            .unwrap();
        assert!(matches!(
            config.validate(),
            Err(FrameworkError::UnsupportedPlatform(_))
        ));
    }

    #[test]
    fn test_validate_requires_identity() {
        let config = ClusterConfig::default();
        assert!(matches!(
            config.validate(),
            Err(FrameworkError::MissingConfigKey(_))
        ));
    }

    #[test]
    fn test_derived_paths() {
        let mut config = ClusterConfig::default();
        config
            .update(&yaml(
                "env:\n  cluster_name: dr1\n  cluster_path: /tmp/dr1\n  base_domain: example.org\n",
            ))
            .unwrap();
        assert_eq!(
            config.kubeconfig_path(),
            PathBuf::from("/tmp/dr1/auth/kubeconfig")
        );
        assert_eq!(config.api_url(), "https://api.dr1.example.org:6443");
    }

    #[test]
    fn test_deep_merge_replaces_sequences() {
        let mut base = yaml("a:\n  - 1\n  - 2\n");
        deep_merge(&mut base, &yaml("a:\n  - 3\n"));
        assert_eq!(base, yaml("a:\n  - 3\n"));
    }
}
