//! The seam between the orchestrator and the external world.
//!
//! Every stage's interaction with installers, clusters, the cloud API and
//! SMTP goes through [`StageDriver`]. The orchestrator owns sequencing,
//! context switching and failure policy; the driver owns the calls. This
//! keeps the retry/skip/fail policy in one place and lets the pipeline be
//! exercised without any external binary.

use async_trait::async_trait;
use framework::ClusterConfig;

use crate::cluster::{self, InstallJob};
use crate::mesh::{MeshCli, MeshTarget};
use crate::pipeline::StageResult;
use crate::{certs, hub, import, mco, report, storage};

/// External-world operations invoked by the pipeline, one per stage step.
///
/// Implementations must not touch the context registry: every method
/// receives fully resolved configuration values.
#[async_trait]
pub trait StageDriver: Send + Sync {
    /// Whether the cluster already answers on its kubeconfig.
    async fn is_cluster_running(&self, config: &ClusterConfig) -> bool;

    /// Synchronous bring-up prerequisites: installer binary and
    /// install-config rendering. `first_context` scopes forced
    /// re-downloads of shared binaries to the first cluster.
    async fn prepare_bring_up(
        &self,
        config: &ClusterConfig,
        first_context: bool,
    ) -> anyhow::Result<InstallJob>;

    /// The long-running installer invocation. Runs on a spawned worker.
    async fn create_cluster(&self, job: InstallJob) -> anyhow::Result<()>;

    /// Storage operator install for one cluster.
    async fn install_storage(&self, config: &ClusterConfig) -> anyhow::Result<()>;

    /// Multicluster orchestrator install on the hub.
    async fn install_mco(&self, config: &ClusterConfig) -> anyhow::Result<()>;

    /// ACM hub install.
    async fn install_hub(&self, config: &ClusterConfig) -> anyhow::Result<()>;

    /// Provision the mesh CLI and the cloud policy it depends on.
    async fn prepare_mesh(&self, hub: &ClusterConfig) -> anyhow::Result<MeshCli>;

    /// Deploy the mesh broker on the designated primary cluster.
    async fn deploy_broker(&self, cli: &MeshCli, broker: &ClusterConfig) -> anyhow::Result<()>;

    /// Attach the cloud policy to the target cluster's API user.
    async fn attach_mesh_policy(&self, target: &MeshTarget) -> anyhow::Result<()>;

    /// Prepare the target cluster's cloud networking for the mesh.
    async fn prepare_cloud(&self, cli: &MeshCli, target: &MeshTarget) -> anyhow::Result<()>;

    /// Join the target cluster to the mesh under `c<sequence>`.
    async fn join_mesh(
        &self,
        cli: &MeshCli,
        target: &MeshTarget,
        sequence: u32,
    ) -> anyhow::Result<()>;

    /// Verify the joined cluster's mesh connections.
    async fn verify_connection(&self, cli: &MeshCli, target: &MeshTarget) -> anyhow::Result<()>;

    /// Import a managed cluster into the hub.
    async fn import_cluster(
        &self,
        hub: &ClusterConfig,
        managed: &ClusterConfig,
    ) -> anyhow::Result<()>;

    /// Settle delay after the whole import batch.
    async fn settle_after_import(&self);

    /// Read one cluster's ingress CA.
    async fn ingress_ca(&self, config: &ClusterConfig) -> anyhow::Result<String>;

    /// Install the fleet trust bundle on one cluster.
    async fn apply_trust_bundle(&self, config: &ClusterConfig, bundle: &str)
        -> anyhow::Result<()>;

    /// Send the per-cluster report. Reporting failures are demoted inside
    /// the implementation; they never fail the run.
    async fn send_report(&self, config: &ClusterConfig) -> StageResult;
}

/// Production driver delegating to the stage modules.
pub struct ExternalStageDriver;

#[async_trait]
impl StageDriver for ExternalStageDriver {
    async fn is_cluster_running(&self, config: &ClusterConfig) -> bool {
        cluster::is_cluster_running(config).await
    }

    async fn prepare_bring_up(
        &self,
        config: &ClusterConfig,
        first_context: bool,
    ) -> anyhow::Result<InstallJob> {
        cluster::prepare_bring_up(config, first_context).await
    }

    async fn create_cluster(&self, job: InstallJob) -> anyhow::Result<()> {
        cluster::create_cluster(&job).await
    }

    async fn install_storage(&self, config: &ClusterConfig) -> anyhow::Result<()> {
        storage::install(config).await
    }

    async fn install_mco(&self, config: &ClusterConfig) -> anyhow::Result<()> {
        mco::install(config).await
    }

    async fn install_hub(&self, config: &ClusterConfig) -> anyhow::Result<()> {
        hub::install(config).await
    }

    async fn prepare_mesh(&self, hub: &ClusterConfig) -> anyhow::Result<MeshCli> {
        MeshCli::provision(hub).await
    }

    async fn deploy_broker(&self, cli: &MeshCli, broker: &ClusterConfig) -> anyhow::Result<()> {
        cli.deploy_broker(broker).await
    }

    async fn attach_mesh_policy(&self, target: &MeshTarget) -> anyhow::Result<()> {
        let iam = crate::aws::IamPolicyManager::new().await;
        iam.attach(&target.name).await?;
        Ok(())
    }

    async fn prepare_cloud(&self, cli: &MeshCli, target: &MeshTarget) -> anyhow::Result<()> {
        cli.prepare_cloud(target).await
    }

    async fn join_mesh(
        &self,
        cli: &MeshCli,
        target: &MeshTarget,
        sequence: u32,
    ) -> anyhow::Result<()> {
        cli.join_cluster(target, sequence).await
    }

    async fn verify_connection(&self, cli: &MeshCli, target: &MeshTarget) -> anyhow::Result<()> {
        cli.verify_connection(target).await
    }

    async fn import_cluster(
        &self,
        hub: &ClusterConfig,
        managed: &ClusterConfig,
    ) -> anyhow::Result<()> {
        import::import_cluster(hub, managed).await
    }

    async fn settle_after_import(&self) {
        tokio::time::sleep(import::IMPORT_SETTLE_DELAY).await;
    }

    async fn ingress_ca(&self, config: &ClusterConfig) -> anyhow::Result<String> {
        certs::ingress_ca(config).await
    }

    async fn apply_trust_bundle(
        &self,
        config: &ClusterConfig,
        bundle: &str,
    ) -> anyhow::Result<()> {
        certs::apply_trust_bundle(config, bundle).await
    }

    async fn send_report(&self, config: &ClusterConfig) -> StageResult {
        report::send_report(config).await
    }
}
