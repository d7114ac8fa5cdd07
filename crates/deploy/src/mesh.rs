//! Submariner mesh configuration.
//!
//! A fleet-wide machine driven from the hub: the broker deploys on the
//! designated primary cluster, then every participating cluster prepares
//! its cloud networking and joins the broker under a dense `c<seq>`
//! cluster id assigned in registry order. Each mesh CLI call is an
//! external command wrapped in a retry policy.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use framework::{ClusterConfig, ClusterContext};
use ops::bins;
use ops::cmd::{exec_cmd, ExecOpts};
use ops::{ErrorKind, RetryPolicy};
use tracing::info;

use crate::aws::IamPolicyManager;
use crate::templates;

/// Resolved values one mesh target needs; workers and CLI calls get this
/// instead of registry access.
#[derive(Debug, Clone)]
pub struct MeshTarget {
    pub index: usize,
    pub name: String,
    pub cluster_path: PathBuf,
    pub kubeconfig: PathBuf,
    pub region: String,
}

impl MeshTarget {
    /// Snapshot a registered context into a mesh target.
    #[must_use]
    pub fn from_context(ctx: &ClusterContext) -> Self {
        Self {
            index: ctx.index,
            name: ctx.config.env.cluster_name.clone(),
            cluster_path: ctx.config.env.cluster_path.clone(),
            kubeconfig: ctx.config.kubeconfig_path(),
            region: ctx.config.env.region.clone(),
        }
    }
}

/// Handle to a provisioned mesh CLI.
#[derive(Debug, Clone)]
pub struct MeshCli {
    bin: PathBuf,
    info_file: String,
}

impl MeshCli {
    /// Provision the mesh CLI and the cloud policy its joins depend on.
    ///
    /// # Errors
    ///
    /// Returns an error for unrecognized mesh sources and download or
    /// policy failures.
    pub async fn provision(hub: &ClusterConfig) -> Result<Self> {
        let source = &hub.multicluster.mesh_source;
        if source != "upstream" {
            bail!("the mesh source {source} is not recognized");
        }
        let bin = bins::ensure_mesh_cli(&hub.bin_dir(), hub.multicluster.mesh_url.as_deref())
            .await
            .context("provisioning mesh CLI")?;

        let iam = IamPolicyManager::new().await;
        iam.ensure_policy(templates::AWS_IAM_POLICY).await?;

        Ok(Self {
            bin,
            info_file: hub.multicluster.mesh_info_file.clone(),
        })
    }

    /// Handle for pipeline tests; never touches the filesystem.
    #[cfg(test)]
    #[must_use]
    pub fn fake() -> Self {
        Self {
            bin: PathBuf::from("/usr/bin/true"),
            info_file: "broker-info.subm".into(),
        }
    }

    async fn subctl(&self, args: Vec<String>, policy: &RetryPolicy) -> Result<(), ops::OpsError> {
        let bin = self.bin.display().to_string();
        policy
            .run(|| {
                let mut argv = vec![bin.clone()];
                argv.extend(args.iter().cloned());
                async move {
                    exec_cmd(&argv, ExecOpts::default()).await?;
                    Ok(())
                }
            })
            .await
    }

    /// Deploy the broker on the designated primary cluster.
    ///
    /// # Errors
    ///
    /// Returns an error once the retry budget is exhausted.
    pub async fn deploy_broker(&self, broker: &ClusterConfig) -> Result<()> {
        info!(cluster = %broker.env.cluster_name, "Deploying mesh broker");
        // Stale broker info from a previous run confuses join.
        match std::fs::remove_file(&self.info_file) {
            Ok(()) => info!(file = %self.info_file, "Removed stale broker info file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("removing stale broker info file"),
        }
        let policy = RetryPolicy::new(&[ErrorKind::CommandFailed], 5, Duration::from_secs(30));
        self.subctl(
            vec![
                "deploy-broker".into(),
                "--kubeconfig".into(),
                broker.kubeconfig_path().display().to_string(),
            ],
            &policy,
        )
        .await
        .context("deploying mesh broker")?;
        Ok(())
    }

    /// Prepare the target's cloud networking prerequisites.
    ///
    /// # Errors
    ///
    /// Returns an error once the retry budget is exhausted.
    pub async fn prepare_cloud(&self, target: &MeshTarget) -> Result<()> {
        let metadata = target.cluster_path.join("metadata.json");
        let policy = RetryPolicy::new(&[ErrorKind::CommandFailed], 5, Duration::from_secs(30));
        self.subctl(
            vec![
                "cloud".into(),
                "prepare".into(),
                "aws".into(),
                "--ocp-metadata".into(),
                metadata.display().to_string(),
                "--region".into(),
                target.region.clone(),
            ],
            &policy,
        )
        .await
        .with_context(|| format!("preparing cloud for {}", target.name))?;
        Ok(())
    }

    /// Join the target to the broker as `c<sequence>`.
    ///
    /// # Errors
    ///
    /// Returns an error once the retry budget is exhausted.
    pub async fn join_cluster(&self, target: &MeshTarget, sequence: u32) -> Result<()> {
        let policy = RetryPolicy::new(&[ErrorKind::CommandFailed], 5, Duration::from_secs(60));
        self.subctl(
            vec![
                "join".into(),
                "--kubeconfig".into(),
                target.kubeconfig.display().to_string(),
                self.info_file.clone(),
                "--clusterid".into(),
                format!("c{sequence}"),
            ],
            &policy,
        )
        .await
        .with_context(|| format!("joining {} to the mesh", target.name))?;
        info!(cluster = %target.name, "Mesh join succeeded");
        Ok(())
    }

    /// Show the target's mesh connections, failing when the CLI does.
    ///
    /// # Errors
    ///
    /// Returns an error once the retry budget is exhausted.
    pub async fn verify_connection(&self, target: &MeshTarget) -> Result<()> {
        let policy = RetryPolicy::new(&[ErrorKind::CommandFailed], 5, Duration::from_secs(60));
        self.subctl(
            vec![
                "show".into(),
                "connections".into(),
                "--kubeconfig".into(),
                target.kubeconfig.display().to_string(),
            ],
            &policy,
        )
        .await
        .with_context(|| format!("verifying mesh connections for {}", target.name))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_snapshot_resolves_paths() {
        let mut config = ClusterConfig::default();
        let overlay: serde_yaml::Value = serde_yaml::from_str(
            "env:\n  cluster_name: dr1\n  cluster_path: /tmp/dr1\n  region: eu-west-1\n",
        )
        .unwrap();
        config.update(&overlay).unwrap();
        let ctx = ClusterContext { index: 2, config };

        let target = MeshTarget::from_context(&ctx);
        assert_eq!(target.index, 2);
        assert_eq!(target.name, "dr1");
        assert_eq!(target.kubeconfig, PathBuf::from("/tmp/dr1/auth/kubeconfig"));
        assert_eq!(target.region, "eu-west-1");
    }
}
