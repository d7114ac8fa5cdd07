//! End-of-run reporting.
//!
//! Builds one report row per cluster (role, reachability, version,
//! console endpoints, login material) and emails it with the cluster's
//! kubeconfig attached. Delivery problems are logged and demoted; a
//! report failure never fails the run.

use anyhow::{Context, Result};
use framework::config::expand_home;
use framework::ClusterConfig;
use notify::{ClusterReport, ClusterRow, EmailChannel};
use serde_json::Value;
use tracing::{info, warn};

use crate::cluster;
use crate::pipeline::StageResult;

/// Send the report for one cluster. The caller has already applied the
/// skip flags; everything that goes wrong here is demoted to a skip with
/// the error recorded in the reason.
pub async fn send_report(config: &ClusterConfig) -> StageResult {
    match build_and_send(config).await {
        Ok(()) => StageResult::Success,
        Err(e) => {
            warn!(
                cluster = %config.env.cluster_name,
                error = %format!("{e:#}"),
                "Sending email report failed"
            );
            StageResult::Skipped(format!("email delivery failed: {e:#}"))
        }
    }
}

async fn build_and_send(config: &ClusterConfig) -> Result<()> {
    let email = &config.reporting.email;
    let recipients: Vec<String> = email
        .recipients
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(ToString::to_string)
        .collect();

    let row = cluster_row(config).await;
    let report = ClusterReport {
        run_id: config.run.run_id.clone(),
        rows: vec![row],
    };
    let subject = format!(
        "drdeploy cluster deployment (RUN ID: {})",
        config.run.run_id
    );

    let kubeconfig = std::fs::read(config.kubeconfig_path()).ok();
    let password = smtp_password(config).context("loading SMTP password")?;
    let channel = EmailChannel::new(
        email.smtp_server.clone(),
        email.smtp_port,
        email.address.clone(),
        password,
    );
    channel
        .send_report(&recipients, &subject, &report, kubeconfig)
        .await?;
    info!(cluster = %config.env.cluster_name, "Report emailed");
    Ok(())
}

/// Build the report row for one cluster.
pub async fn cluster_row(config: &ClusterConfig) -> ClusterRow {
    let available = cluster::is_cluster_running(config).await;
    let username = config.run.username.clone();
    let password = std::fs::read_to_string(config.password_path())
        .map(|p| p.trim().to_string())
        .unwrap_or_default();
    let role = if config.multicluster.hub_cluster {
        "ACM Cluster"
    } else {
        "Non-ACM Cluster"
    };

    ClusterRow {
        cluster_name: config.env.cluster_name.clone(),
        role: role.to_string(),
        status: if available { "Available" } else { "Not Available" }.to_string(),
        status_color: ClusterRow::available_color(available).to_string(),
        version: cluster_version(config).await.unwrap_or_default(),
        console_url: config.console_url(),
        api_url: config.api_url(),
        login_command: format!(
            "oc login {} -u {username} -p {password}",
            config.api_url()
        ),
        username,
        password,
    }
}

/// The cluster's major.minor version: asked from the running cluster
/// when bring-up was skipped, otherwise derived from the configured
/// installer version.
pub async fn cluster_version(config: &ClusterConfig) -> Option<String> {
    let raw = if config.env.skip_cluster_deploy {
        let client = cluster::client_for(config);
        let doc = client.get("clusterversion", Some("version"), None, None).await.ok()?;
        doc.pointer("/status/desired/version")
            .and_then(Value::as_str)?
            .to_string()
    } else {
        config.deployment.installer_version.clone()
    };
    major_minor(&raw)
}

/// Reduce a version string to its major.minor prefix.
fn major_minor(version: &str) -> Option<String> {
    let mut parts = version.split('.');
    let major: String = parts
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    let minor: String = parts
        .next()
        .unwrap_or("")
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    if major.is_empty() || minor.is_empty() {
        return None;
    }
    Some(format!("{major}.{minor}"))
}

/// Load the SMTP password from the data directory.
fn smtp_password(config: &ClusterConfig) -> Result<String> {
    let path = expand_home(&config.run.data_dir).join("email-pass");
    let password = std::fs::read_to_string(&path)
        .with_context(|| format!("email password does not exist at {}", path.display()))?;
    Ok(password.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_major_minor() {
        assert_eq!(major_minor("4.12.9"), Some("4.12".into()));
        assert_eq!(major_minor("4.12-ga"), Some("4.12".into()));
        assert_eq!(major_minor("4.13.0-0.nightly-2026-01-01"), Some("4.13".into()));
        assert_eq!(major_minor("garbage"), None);
    }

    #[tokio::test]
    async fn test_cluster_row_for_unreachable_cluster() {
        let mut config = ClusterConfig::default();
        let overlay: serde_yaml::Value = serde_yaml::from_str(
            "env:\n  cluster_name: dr1\n  cluster_path: /nonexistent/dr1\n  base_domain: example.org\nmulticluster:\n  hub_cluster: true\n",
        )
        .unwrap();
        config.update(&overlay).unwrap();

        let row = cluster_row(&config).await;
        assert_eq!(row.cluster_name, "dr1");
        assert_eq!(row.role, "ACM Cluster");
        assert_eq!(row.status, "Not Available");
        assert_eq!(row.status_color, "red");
        assert!(row.console_url.contains("dr1.example.org"));
    }
}
