//! The destroy subcommand.
//!
//! Destroys previously deployed clusters in parallel, one installer
//! worker per cluster directory, optionally detaching the mesh IAM
//! policy from each cluster's API user on the way out.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::ui;
use deploy::aws::IamPolicyManager;
use deploy::cluster;
use ops::bins;

/// Destroy previously deployed clusters.
#[derive(Parser, Debug)]
pub struct DestroyCommand {
    /// Cluster install directories to destroy.
    #[arg(long = "cluster-paths", num_args = 1.., required = true)]
    cluster_paths: Vec<PathBuf>,

    /// Log level handed to the installer.
    #[arg(long, default_value = "INFO")]
    log_level: String,

    /// Directory the installer binary lives in.
    #[arg(long, default_value = "./bin")]
    bin_dir: PathBuf,

    /// Detach the mesh IAM policy from each cluster's API user.
    #[arg(long)]
    detach_policy: bool,
}

impl DestroyCommand {
    /// Run the teardown and return the process exit code.
    ///
    /// # Errors
    ///
    /// Returns an error when the installer binary is missing; per-cluster
    /// teardown failures are reflected in the exit code instead.
    pub async fn run(self) -> Result<i32> {
        let installer = self.bin_dir.join(bins::INSTALLER_BIN);
        if !installer.is_file() {
            bail!("installer binary not found at {}", installer.display());
        }

        if self.detach_policy {
            let iam = IamPolicyManager::new().await;
            for path in &self.cluster_paths {
                let name = cluster_name_of(path)?;
                if let Err(e) = iam.detach(&name).await {
                    error!(cluster = %name, error = %format!("{e:#}"), "Policy detach failed");
                }
            }
        }

        ui::print_section("Destroying clusters");
        let mut workers: JoinSet<(PathBuf, Result<()>)> = JoinSet::new();
        for path in self.cluster_paths.clone() {
            let installer = installer.clone();
            let log_level = self.log_level.clone();
            workers.spawn(async move {
                let result = cluster::destroy_cluster(&installer, &path, &log_level).await;
                (path, result)
            });
        }

        let mut failures = 0;
        while let Some(joined) = workers.join_next().await {
            let (path, result) = joined.context("destroy worker panicked")?;
            match result {
                Ok(()) => {
                    info!(path = %path.display(), "Cluster destroyed");
                    ui::print_success(&format!("destroyed {}", path.display()));
                }
                Err(e) => {
                    failures += 1;
                    error!(path = %path.display(), error = %format!("{e:#}"), "Destroy failed");
                    ui::print_error(&format!("failed to destroy {}", path.display()));
                }
            }
        }
        Ok(i32::from(failures > 0))
    }
}

/// The cluster name backing an install directory (its directory name).
fn cluster_name_of(path: &PathBuf) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(ToString::to_string)
        .with_context(|| format!("cannot derive cluster name from {}", path.display()))
}
