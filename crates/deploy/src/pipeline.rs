//! The fixed deployment pipeline.
//!
//! Stages run in a compile-time order over every registered cluster. Each
//! stage follows the same template: switch the context, evaluate the
//! cluster's applicability, run the synchronous portion with per-cluster
//! failure isolation, fan out the expensive external calls to workers,
//! fan them all back in, and restore the default context. A cluster that
//! fails a stage is excluded from later stages (reporting still covers
//! it) and never stops a sibling cluster.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use framework::{ClusterContext, ContextRegistry};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::driver::{ExternalStageDriver, StageDriver};
use crate::mesh::MeshTarget;

/// One named phase of the deployment pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Cluster bring-up via the installer binary.
    ClusterBringUp,
    /// Storage operator install.
    StorageOperator,
    /// Multicluster orchestrator operator install.
    McoOperator,
    /// ACM hub install.
    HubInstall,
    /// Cross-cluster mesh configuration.
    MeshConfig,
    /// Managed-cluster import into the hub.
    ManagedImport,
    /// Ingress certificate exchange across the fleet.
    CertExchange,
    /// End-of-run reporting.
    Report,
}

impl Stage {
    /// The fixed execution order.
    pub const ORDER: [Self; 8] = [
        Self::ClusterBringUp,
        Self::StorageOperator,
        Self::McoOperator,
        Self::HubInstall,
        Self::MeshConfig,
        Self::ManagedImport,
        Self::CertExchange,
        Self::Report,
    ];

    /// Human-readable stage name.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::ClusterBringUp => "cluster bring-up",
            Self::StorageOperator => "storage operator install",
            Self::McoOperator => "multicluster orchestrator install",
            Self::HubInstall => "hub install",
            Self::MeshConfig => "mesh configuration",
            Self::ManagedImport => "managed-cluster import",
            Self::CertExchange => "certificate exchange",
            Self::Report => "reporting",
        }
    }

    /// Whether this stage's body runs on the hub cluster only.
    #[must_use]
    pub fn hub_only(&self) -> bool {
        matches!(
            self,
            Self::McoOperator
                | Self::HubInstall
                | Self::MeshConfig
                | Self::ManagedImport
                | Self::CertExchange
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Outcome of one stage for one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageResult {
    Success,
    Skipped(String),
    Failed(String),
}

impl StageResult {
    /// Whether this result records a failure.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for StageResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Skipped(reason) => write!(f, "skipped ({reason})"),
            Self::Failed(error) => write!(f, "failed ({error})"),
        }
    }
}

/// One recorded (stage, cluster) outcome.
#[derive(Debug, Clone)]
pub struct StageRecord {
    pub stage: Stage,
    pub cluster_index: usize,
    pub cluster_name: String,
    pub result: StageResult,
}

/// Accumulated outcomes of a whole run.
#[derive(Debug, Default)]
pub struct DeploymentReport {
    records: Vec<StageRecord>,
    failed: BTreeSet<usize>,
}

impl DeploymentReport {
    /// Record one outcome.
    pub fn record(
        &mut self,
        stage: Stage,
        cluster_index: usize,
        cluster_name: &str,
        result: StageResult,
    ) {
        if result.is_failed() {
            self.failed.insert(cluster_index);
        }
        self.records.push(StageRecord {
            stage,
            cluster_index,
            cluster_name: cluster_name.to_string(),
            result,
        });
    }

    /// Whether the cluster has a failure recorded in any stage so far.
    #[must_use]
    pub fn cluster_failed(&self, cluster_index: usize) -> bool {
        self.failed.contains(&cluster_index)
    }

    /// Whether any cluster failed any stage.
    #[must_use]
    pub fn any_failed(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Process exit code: non-zero iff anything failed.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(self.any_failed())
    }

    /// All recorded outcomes, in execution order.
    #[must_use]
    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    /// Outcomes recorded for one stage.
    #[must_use]
    pub fn stage_records(&self, stage: Stage) -> Vec<&StageRecord> {
        self.records.iter().filter(|r| r.stage == stage).collect()
    }
}

/// Drives the stage pipeline over the registered fleet.
pub struct Orchestrator {
    registry: ContextRegistry,
    report: DeploymentReport,
    driver: Arc<dyn StageDriver>,
}

impl Orchestrator {
    /// Orchestrator with the production driver.
    #[must_use]
    pub fn new(registry: ContextRegistry) -> Self {
        Self::with_driver(registry, Arc::new(ExternalStageDriver))
    }

    /// Orchestrator with an explicit driver (used by tests).
    #[must_use]
    pub fn with_driver(registry: ContextRegistry, driver: Arc<dyn StageDriver>) -> Self {
        Self {
            registry,
            report: DeploymentReport::default(),
            driver,
        }
    }

    /// The registry, for callers assembling the run.
    #[must_use]
    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    /// Run every stage over every cluster and return the report.
    ///
    /// # Errors
    ///
    /// Only registry misuse (an out-of-range context switch, i.e. a bug)
    /// escapes; every cluster-level problem becomes a `Failed` record.
    pub async fn run(mut self) -> Result<DeploymentReport> {
        for stage in Stage::ORDER {
            info!(stage = %stage, "Starting stage");
            match stage {
                Stage::ClusterBringUp => self.run_bring_up().await?,
                Stage::StorageOperator => {
                    let driver = Arc::clone(&self.driver);
                    self.run_per_cluster(stage, move |ctx| {
                        let driver = Arc::clone(&driver);
                        async move {
                            driver.install_storage(&ctx.config).await?;
                            Ok(StageResult::Success)
                        }
                    })
                    .await?;
                }
                Stage::McoOperator => {
                    let driver = Arc::clone(&self.driver);
                    self.run_per_cluster(stage, move |ctx| {
                        let driver = Arc::clone(&driver);
                        async move {
                            driver.install_mco(&ctx.config).await?;
                            Ok(StageResult::Success)
                        }
                    })
                    .await?;
                }
                Stage::HubInstall => {
                    let driver = Arc::clone(&self.driver);
                    self.run_per_cluster(stage, move |ctx| {
                        let driver = Arc::clone(&driver);
                        async move {
                            driver.install_hub(&ctx.config).await?;
                            Ok(StageResult::Success)
                        }
                    })
                    .await?;
                }
                Stage::MeshConfig => self.run_mesh().await?,
                Stage::ManagedImport => self.run_import().await?,
                Stage::CertExchange => self.run_certs().await?,
                Stage::Report => {
                    let driver = Arc::clone(&self.driver);
                    self.run_per_cluster(stage, move |ctx| {
                        let driver = Arc::clone(&driver);
                        async move { Ok(driver.send_report(&ctx.config).await) }
                    })
                    .await?;
                }
            }
        }
        Ok(self.report)
    }

    /// Record one outcome, tagged with the cluster identity for log
    /// disambiguation across interleaved workers.
    fn record(&mut self, stage: Stage, index: usize, name: &str, result: StageResult) {
        match &result {
            StageResult::Success => {
                info!(cluster = %name, stage = %stage, "Stage succeeded");
            }
            StageResult::Skipped(reason) => {
                warn!(cluster = %name, stage = %stage, reason = %reason, "Stage skipped");
            }
            StageResult::Failed(error) => {
                error!(cluster = %name, stage = %stage, error = %error, "Stage failed");
            }
        }
        self.report.record(stage, index, name, result);
    }

    /// The single skip policy: why would `stage` not run on cluster
    /// `index`? Returns the reason, or `None` when the stage applies.
    fn skip_reason(&self, stage: Stage, index: usize) -> Option<String> {
        let ctx = self.registry.get(index)?;
        let config = &ctx.config;
        let acm = self.registry.acm_index();

        if stage != Stage::Report && self.report.cluster_failed(index) {
            return Some("earlier stage failed".into());
        }

        match stage {
            Stage::ClusterBringUp => {
                if config.env.skip_cluster_deploy {
                    return Some("cluster deployment skipped by configuration".into());
                }
            }
            Stage::StorageOperator => {
                if config.env.skip_storage_deploy {
                    return Some("storage deployment skipped by configuration".into());
                }
                // The hub runs no storage unless it doubles as the primary.
                if self.registry.multicluster()
                    && acm == Some(index)
                    && !config.multicluster.primary_cluster
                {
                    return Some("storage not deployed on a non-primary hub".into());
                }
            }
            Stage::McoOperator | Stage::HubInstall => {
                if acm.is_none() {
                    return Some("no hub cluster registered".into());
                }
                if acm != Some(index) {
                    return Some("hub-only stage".into());
                }
            }
            Stage::ManagedImport => {
                if !config.multicluster.import_as_managed_cluster {
                    return Some("not flagged for managed-cluster import".into());
                }
                if acm == Some(index) {
                    return Some("hub cluster is not imported into itself".into());
                }
            }
            Stage::Report => {
                if config.reporting.email.skip_notification {
                    return Some("email notification skipped by configuration".into());
                }
                if config.reporting.email.recipients.is_empty() {
                    return Some("no recipients configured".into());
                }
            }
            Stage::MeshConfig | Stage::CertExchange => {}
        }
        None
    }

    /// Record a skip for every cluster in one go.
    fn skip_all(&mut self, stage: Stage, reason: &str) {
        for index in 0..self.registry.nclusters() {
            let name = self.registry.get(index).map_or_else(
                || index.to_string(),
                |c| c.name().to_string(),
            );
            self.record(stage, index, &name, StageResult::Skipped(reason.to_string()));
        }
    }

    /// The shared per-cluster stage template for synchronous stages.
    async fn run_per_cluster<F, Fut>(&mut self, stage: Stage, body: F) -> Result<()>
    where
        F: Fn(ClusterContext) -> Fut,
        Fut: Future<Output = Result<StageResult>>,
    {
        for index in 0..self.registry.nclusters() {
            self.registry.switch_to(index)?;
            let name = self.registry.current().name().to_string();
            if let Some(reason) = self.skip_reason(stage, index) {
                self.record(stage, index, &name, StageResult::Skipped(reason));
                continue;
            }
            // The body receives an owned snapshot; it must never reach
            // back into the registry.
            let ctx = self.registry.current().clone();
            match body(ctx).await {
                Ok(result) => self.record(stage, index, &name, result),
                Err(e) => self.record(stage, index, &name, StageResult::Failed(format!("{e:#}"))),
            }
        }
        self.registry.switch_to_default();
        Ok(())
    }

    /// Cluster bring-up: synchronous prerequisites per cluster, then one
    /// installer worker per cluster, all started before any is joined.
    async fn run_bring_up(&mut self) -> Result<()> {
        let stage = Stage::ClusterBringUp;
        let mut workers: JoinSet<(usize, String, Result<()>)> = JoinSet::new();

        for index in 0..self.registry.nclusters() {
            self.registry.switch_to(index)?;
            let name = self.registry.current().name().to_string();
            if let Some(reason) = self.skip_reason(stage, index) {
                self.record(stage, index, &name, StageResult::Skipped(reason));
                continue;
            }
            let ctx = self.registry.current().clone();
            if self.driver.is_cluster_running(&ctx.config).await {
                warn!(cluster = %name, "Cluster is already running, skipping installation");
                self.record(
                    stage,
                    index,
                    &name,
                    StageResult::Skipped("cluster already running".into()),
                );
                continue;
            }
            match self.driver.prepare_bring_up(&ctx.config, index == 0).await {
                Ok(job) => {
                    let driver = Arc::clone(&self.driver);
                    let worker_name = name.clone();
                    workers.spawn(async move {
                        let result = driver.create_cluster(job).await;
                        (index, worker_name, result)
                    });
                }
                Err(e) => {
                    self.record(stage, index, &name, StageResult::Failed(format!("{e:#}")));
                }
            }
        }

        // Fan-in: every started worker is joined exactly once.
        while let Some(joined) = workers.join_next().await {
            let (index, name, result) =
                joined.map_err(|e| anyhow::anyhow!("bring-up worker panicked: {e}"))?;
            match result {
                Ok(()) => self.record(stage, index, &name, StageResult::Success),
                Err(e) => self.record(stage, index, &name, StageResult::Failed(format!("{e:#}"))),
            }
        }

        self.registry.switch_to_default();
        Ok(())
    }

    /// Mesh configuration: a fleet-wide sub-state-machine scoped to the
    /// hub. Broker first, then every non-hub cluster joins with a dense
    /// 1-based sequence number, then pairwise connectivity is verified.
    async fn run_mesh(&mut self) -> Result<()> {
        let stage = Stage::MeshConfig;

        if !self.registry.multicluster() {
            self.skip_all(stage, "mesh requires a multicluster run");
            return Ok(());
        }
        let Some(acm) = self.registry.acm_index() else {
            self.skip_all(stage, "no hub cluster registered");
            return Ok(());
        };
        let hub_name = self.registry.get(acm).map_or_else(String::new, |c| c.name().to_string());
        if self.report.cluster_failed(acm) {
            self.skip_all(stage, "hub failed an earlier stage");
            return Ok(());
        }

        let Some(broker_index) = self.registry.primary_index() else {
            self.record(
                stage,
                acm,
                &hub_name,
                StageResult::Failed("no cluster is designated primary for the mesh broker".into()),
            );
            return Ok(());
        };
        if self.report.cluster_failed(broker_index) {
            // The run is already non-zero through the broker cluster's
            // earlier failure; the mesh just cannot be configured.
            self.skip_all(stage, "designated broker cluster failed an earlier stage");
            return Ok(());
        }

        // Resolve join targets up front: non-hub clusters (the hub itself
        // when it doubles as primary), minus anything already failed.
        let mut targets: Vec<MeshTarget> = Vec::new();
        for ctx in self.registry.non_hub_contexts(true) {
            if self.report.cluster_failed(ctx.index) {
                continue;
            }
            targets.push(MeshTarget::from_context(ctx));
        }
        for index in 0..self.registry.nclusters() {
            let is_target = targets.iter().any(|t| t.index == index) || index == acm;
            if !is_target {
                let name = self
                    .registry
                    .get(index)
                    .map_or_else(|| index.to_string(), |c| c.name().to_string());
                self.record(
                    stage,
                    index,
                    &name,
                    StageResult::Skipped("earlier stage failed".into()),
                );
            }
        }

        let hub_config = match self.registry.get(acm) {
            Some(ctx) => ctx.config.clone(),
            None => return Ok(()),
        };
        let cli = match self.driver.prepare_mesh(&hub_config).await {
            Ok(cli) => cli,
            Err(e) => {
                self.record(stage, acm, &hub_name, StageResult::Failed(format!("{e:#}")));
                for target in &targets {
                    if target.index != acm {
                        let name = target.name.clone();
                        self.record(
                            stage,
                            target.index,
                            &name,
                            StageResult::Skipped("mesh CLI provisioning failed".into()),
                        );
                    }
                }
                return Ok(());
            }
        };

        // Broker deployment happens under the broker cluster's context.
        self.registry.switch_to(broker_index)?;
        let broker_config = self.registry.current().config.clone();
        let broker_name = self.registry.current().name().to_string();
        if let Err(e) = self.driver.deploy_broker(&cli, &broker_config).await {
            self.record(
                stage,
                broker_index,
                &broker_name,
                StageResult::Failed(format!("broker deployment: {e:#}")),
            );
            for target in &targets {
                if target.index != broker_index {
                    let name = target.name.clone();
                    self.record(
                        stage,
                        target.index,
                        &name,
                        StageResult::Skipped("broker deployment failed".into()),
                    );
                }
            }
            self.registry.switch_to_default();
            return Ok(());
        }

        // Join order is registry iteration order; the sequence number is
        // the mesh's internal cluster id and stays dense over the joined
        // set; a failed join does not consume a number.
        let mut sequence = 1;
        let mut joined: Vec<MeshTarget> = Vec::new();
        for target in &targets {
            self.registry.switch_to(target.index)?;
            let outcome = async {
                self.driver.attach_mesh_policy(target).await?;
                self.driver.prepare_cloud(&cli, target).await?;
                self.driver.join_mesh(&cli, target, sequence).await
            }
            .await;
            match outcome {
                Ok(()) => {
                    info!(cluster = %target.name, clusterid = %format!("c{sequence}"), "Mesh join succeeded");
                    sequence += 1;
                    joined.push(target.clone());
                    let name = target.name.clone();
                    self.record(stage, target.index, &name, StageResult::Success);
                }
                Err(e) => {
                    let name = target.name.clone();
                    self.record(
                        stage,
                        target.index,
                        &name,
                        StageResult::Failed(format!("{e:#}")),
                    );
                }
            }
        }
        self.registry.switch_to_default();

        // Pairwise connectivity check for every joined cluster.
        let mut verify_failure = None;
        for target in &joined {
            if let Err(e) = self.driver.verify_connection(&cli, target).await {
                verify_failure = Some(format!("connection check for {}: {e:#}", target.name));
            }
        }
        let hub_is_target = targets.iter().any(|t| t.index == acm);
        match verify_failure {
            Some(message) => {
                self.record(stage, acm, &hub_name, StageResult::Failed(message));
            }
            None if !hub_is_target => {
                self.record(stage, acm, &hub_name, StageResult::Success);
            }
            None => {}
        }
        Ok(())
    }

    /// Managed-cluster import: flagged clusters are imported against the
    /// hub; the settle delay follows the whole batch, not each import.
    async fn run_import(&mut self) -> Result<()> {
        let stage = Stage::ManagedImport;
        let Some(acm) = self.registry.acm_index() else {
            self.skip_all(stage, "no hub cluster registered");
            return Ok(());
        };
        let hub_config = match self.registry.get(acm) {
            Some(ctx) => ctx.config.clone(),
            None => return Ok(()),
        };

        let mut imported_any = false;
        for index in 0..self.registry.nclusters() {
            self.registry.switch_to(index)?;
            let name = self.registry.current().name().to_string();
            if let Some(reason) = self.skip_reason(stage, index) {
                self.record(stage, index, &name, StageResult::Skipped(reason));
                continue;
            }
            let managed = self.registry.current().config.clone();
            match self.driver.import_cluster(&hub_config, &managed).await {
                Ok(()) => {
                    imported_any = true;
                    self.record(stage, index, &name, StageResult::Success);
                }
                Err(e) => {
                    self.record(stage, index, &name, StageResult::Failed(format!("{e:#}")));
                }
            }
        }
        self.registry.switch_to_default();

        if imported_any {
            self.driver.settle_after_import().await;
        }
        Ok(())
    }

    /// Certificate exchange: collect every healthy cluster's ingress CA
    /// into one bundle, then install that bundle everywhere so each
    /// cluster trusts every other's ingress.
    async fn run_certs(&mut self) -> Result<()> {
        let stage = Stage::CertExchange;
        if !self.registry.multicluster() {
            self.skip_all(stage, "single-cluster run");
            return Ok(());
        }

        let mut bundle = String::new();
        let mut collect_failed: BTreeSet<usize> = BTreeSet::new();
        for index in 0..self.registry.nclusters() {
            self.registry.switch_to(index)?;
            let name = self.registry.current().name().to_string();
            if self.skip_reason(stage, index).is_some() {
                continue;
            }
            let config = self.registry.current().config.clone();
            match self.driver.ingress_ca(&config).await {
                Ok(ca) => {
                    bundle.push_str(ca.trim_end());
                    bundle.push('\n');
                }
                Err(e) => {
                    collect_failed.insert(index);
                    self.record(
                        stage,
                        index,
                        &name,
                        StageResult::Failed(format!("reading ingress CA: {e:#}")),
                    );
                }
            }
        }

        for index in 0..self.registry.nclusters() {
            self.registry.switch_to(index)?;
            let name = self.registry.current().name().to_string();
            if collect_failed.contains(&index) {
                continue;
            }
            if let Some(reason) = self.skip_reason(stage, index) {
                self.record(stage, index, &name, StageResult::Skipped(reason));
                continue;
            }
            let config = self.registry.current().config.clone();
            match self.driver.apply_trust_bundle(&config, &bundle).await {
                Ok(()) => self.record(stage, index, &name, StageResult::Success),
                Err(e) => {
                    self.record(stage, index, &name, StageResult::Failed(format!("{e:#}")));
                }
            }
        }
        self.registry.switch_to_default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InstallJob;
    use crate::mesh::MeshCli;
    use async_trait::async_trait;
    use framework::ClusterConfig;
    use std::sync::Mutex;

    /// Driver that records every external call and fails on demand.
    #[derive(Default)]
    struct FakeDriver {
        calls: Mutex<Vec<String>>,
        fail_bring_up: Vec<String>,
        fail_join: Vec<String>,
        fail_broker: bool,
    }

    impl FakeDriver {
        fn log(&self, entry: impl Into<String>) {
            self.calls.lock().unwrap().push(entry.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn calls_with_prefix(&self, prefix: &str) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|c| c.starts_with(prefix))
                .collect()
        }
    }

    #[async_trait]
    impl StageDriver for FakeDriver {
        async fn is_cluster_running(&self, _config: &ClusterConfig) -> bool {
            false
        }

        async fn prepare_bring_up(
            &self,
            config: &ClusterConfig,
            _first_context: bool,
        ) -> anyhow::Result<InstallJob> {
            self.log(format!("prepare:{}", config.env.cluster_name));
            Ok(InstallJob {
                cluster_name: config.env.cluster_name.clone(),
                installer: "/tmp/bin/openshift-install".into(),
                cluster_path: config.env.cluster_path.clone(),
                log_level: "info".into(),
            })
        }

        async fn create_cluster(&self, job: InstallJob) -> anyhow::Result<()> {
            self.log(format!("create:{}", job.cluster_name));
            if self.fail_bring_up.contains(&job.cluster_name) {
                anyhow::bail!("installer exited with status 1");
            }
            Ok(())
        }

        async fn install_storage(&self, config: &ClusterConfig) -> anyhow::Result<()> {
            self.log(format!("storage:{}", config.env.cluster_name));
            Ok(())
        }

        async fn install_mco(&self, config: &ClusterConfig) -> anyhow::Result<()> {
            self.log(format!("mco:{}", config.env.cluster_name));
            Ok(())
        }

        async fn install_hub(&self, config: &ClusterConfig) -> anyhow::Result<()> {
            self.log(format!("hub:{}", config.env.cluster_name));
            Ok(())
        }

        async fn prepare_mesh(&self, hub: &ClusterConfig) -> anyhow::Result<MeshCli> {
            self.log(format!("mesh-prepare:{}", hub.env.cluster_name));
            Ok(MeshCli::fake())
        }

        async fn deploy_broker(
            &self,
            _cli: &MeshCli,
            broker: &ClusterConfig,
        ) -> anyhow::Result<()> {
            self.log(format!("broker:{}", broker.env.cluster_name));
            if self.fail_broker {
                anyhow::bail!("broker deployment failed");
            }
            Ok(())
        }

        async fn attach_mesh_policy(&self, target: &MeshTarget) -> anyhow::Result<()> {
            self.log(format!("policy:{}", target.name));
            Ok(())
        }

        async fn prepare_cloud(&self, _cli: &MeshCli, target: &MeshTarget) -> anyhow::Result<()> {
            self.log(format!("cloud:{}", target.name));
            // Uneven latency must not affect join ordering.
            if target.index == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
            Ok(())
        }

        async fn join_mesh(
            &self,
            _cli: &MeshCli,
            target: &MeshTarget,
            sequence: u32,
        ) -> anyhow::Result<()> {
            self.log(format!("join:{}:c{sequence}", target.name));
            if self.fail_join.contains(&target.name) {
                anyhow::bail!("join failed");
            }
            Ok(())
        }

        async fn verify_connection(&self, _cli: &MeshCli, target: &MeshTarget) -> anyhow::Result<()> {
            self.log(format!("verify:{}", target.name));
            Ok(())
        }

        async fn import_cluster(
            &self,
            hub: &ClusterConfig,
            managed: &ClusterConfig,
        ) -> anyhow::Result<()> {
            self.log(format!(
                "import:{}->{}",
                managed.env.cluster_name, hub.env.cluster_name
            ));
            Ok(())
        }

        async fn settle_after_import(&self) {
            self.log("settle");
        }

        async fn ingress_ca(&self, config: &ClusterConfig) -> anyhow::Result<String> {
            self.log(format!("ca:{}", config.env.cluster_name));
            Ok(format!("CERT-{}", config.env.cluster_name))
        }

        async fn apply_trust_bundle(
            &self,
            config: &ClusterConfig,
            bundle: &str,
        ) -> anyhow::Result<()> {
            self.log(format!(
                "bundle:{}:{}",
                config.env.cluster_name,
                bundle.lines().count()
            ));
            Ok(())
        }

        async fn send_report(&self, config: &ClusterConfig) -> StageResult {
            self.log(format!("report:{}", config.env.cluster_name));
            StageResult::Success
        }
    }

    fn cluster(name: &str, hub: bool, primary: bool, import: bool) -> ClusterConfig {
        let mut config = ClusterConfig::default();
        let overlay: serde_yaml::Value = serde_yaml::from_str(&format!(
            "env:\n  cluster_name: {name}\n  cluster_path: /tmp/{name}\n\
             multicluster:\n  hub_cluster: {hub}\n  primary_cluster: {primary}\n  import_as_managed_cluster: {import}\n\
             reporting:\n  email:\n    recipients: ops@example.com\n"
        ))
        .unwrap();
        config.update(&overlay).unwrap();
        config
    }

    /// Three clusters, hub in the middle, both non-hub clusters imported.
    fn dr_fleet() -> ContextRegistry {
        ContextRegistry::register(vec![
            cluster("dr1", false, true, true),
            cluster("hub", true, false, false),
            cluster("dr2", false, false, true),
        ])
    }

    fn results_of(report: &DeploymentReport, stage: Stage) -> Vec<(String, StageResult)> {
        report
            .stage_records(stage)
            .into_iter()
            .map(|r| (r.cluster_name.clone(), r.result.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_happy_path_runs_all_stages() {
        let driver = Arc::new(FakeDriver::default());
        let orchestrator = Orchestrator::with_driver(dr_fleet(), Arc::clone(&driver) as _);
        let report = orchestrator.run().await.unwrap();

        assert!(!report.any_failed());
        assert_eq!(report.exit_code(), 0);

        // Every cluster was brought up.
        assert_eq!(driver.calls_with_prefix("create:").len(), 3);
        // Hub-only stages ran exactly once, on the hub.
        assert_eq!(driver.calls_with_prefix("mco:"), vec!["mco:hub"]);
        assert_eq!(driver.calls_with_prefix("hub:"), vec!["hub:hub"]);
        // Both managed clusters were imported, one settle for the batch.
        assert_eq!(
            driver.calls_with_prefix("import:"),
            vec!["import:dr1->hub", "import:dr2->hub"]
        );
        assert_eq!(driver.calls_with_prefix("settle").len(), 1);
        // Reporting covered the whole fleet.
        assert_eq!(driver.calls_with_prefix("report:").len(), 3);
    }

    #[tokio::test]
    async fn test_bring_up_failure_is_isolated() {
        let driver = Arc::new(FakeDriver {
            fail_bring_up: vec!["dr1".into()],
            ..FakeDriver::default()
        });
        let orchestrator = Orchestrator::with_driver(dr_fleet(), Arc::clone(&driver) as _);
        let report = orchestrator.run().await.unwrap();

        // All three clusters were attempted despite dr1 failing.
        assert_eq!(driver.calls_with_prefix("create:").len(), 3);
        assert_eq!(report.exit_code(), 1);
        assert!(report.cluster_failed(0));
        assert!(!report.cluster_failed(1));
        assert!(!report.cluster_failed(2));

        // Hub-only stages still ran exactly once, scoped to the hub.
        assert_eq!(driver.calls_with_prefix("mco:"), vec!["mco:hub"]);
        assert_eq!(driver.calls_with_prefix("hub:"), vec!["hub:hub"]);

        // dr1 is not silently advanced: storage skipped it with a reason.
        let storage = results_of(&report, Stage::StorageOperator);
        let dr1_storage = storage.iter().find(|(name, _)| name == "dr1").unwrap();
        assert!(matches!(dr1_storage.1, StageResult::Skipped(_)));
        assert!(!driver.calls().contains(&"storage:dr1".to_string()));

        // The report stage still covers the failed cluster.
        assert!(driver.calls().contains(&"report:dr1".to_string()));
    }

    #[tokio::test]
    async fn test_mesh_join_sequence_is_dense_and_ordered() {
        let driver = Arc::new(FakeDriver::default());
        let orchestrator = Orchestrator::with_driver(dr_fleet(), Arc::clone(&driver) as _);
        let report = orchestrator.run().await.unwrap();
        assert!(!report.any_failed());

        // dr1 (primary, index 0) joins first as c1, dr2 as c2, even
        // though dr1's cloud prepare is slower.
        assert_eq!(
            driver.calls_with_prefix("join:"),
            vec!["join:dr1:c1", "join:dr2:c2"]
        );
        // The broker landed on the designated primary.
        assert_eq!(driver.calls_with_prefix("broker:"), vec!["broker:dr1"]);
        // Both joined clusters were verified.
        assert_eq!(
            driver.calls_with_prefix("verify:"),
            vec!["verify:dr1", "verify:dr2"]
        );
    }

    #[tokio::test]
    async fn test_failed_join_does_not_consume_sequence_number() {
        let driver = Arc::new(FakeDriver {
            fail_join: vec!["dr1".into()],
            ..FakeDriver::default()
        });
        let orchestrator = Orchestrator::with_driver(dr_fleet(), Arc::clone(&driver) as _);
        let report = orchestrator.run().await.unwrap();

        // dr1's failed join burned no id: dr2 still joined as c1.
        assert_eq!(
            driver.calls_with_prefix("join:"),
            vec!["join:dr1:c1", "join:dr2:c1"]
        );
        // Only the joined cluster is verified.
        assert_eq!(driver.calls_with_prefix("verify:"), vec!["verify:dr2"]);
        assert!(report.cluster_failed(0));
    }

    #[tokio::test]
    async fn test_broker_failure_skips_joins() {
        let driver = Arc::new(FakeDriver {
            fail_broker: true,
            ..FakeDriver::default()
        });
        let orchestrator = Orchestrator::with_driver(dr_fleet(), Arc::clone(&driver) as _);
        let report = orchestrator.run().await.unwrap();

        assert!(driver.calls_with_prefix("join:").is_empty());
        let mesh = results_of(&report, Stage::MeshConfig);
        let dr2 = mesh.iter().find(|(name, _)| name == "dr2").unwrap();
        assert!(matches!(dr2.1, StageResult::Skipped(_)));
        assert!(report.cluster_failed(0), "broker cluster records the failure");
    }

    #[tokio::test]
    async fn test_mesh_requires_designated_primary() {
        let registry = ContextRegistry::register(vec![
            cluster("dr1", false, false, false),
            cluster("hub", true, false, false),
        ]);
        let driver = Arc::new(FakeDriver::default());
        let orchestrator = Orchestrator::with_driver(registry, Arc::clone(&driver) as _);
        let report = orchestrator.run().await.unwrap();

        let mesh = results_of(&report, Stage::MeshConfig);
        let hub_row = mesh.iter().find(|(name, _)| name == "hub").unwrap();
        assert!(matches!(hub_row.1, StageResult::Failed(_)));
        assert!(driver.calls_with_prefix("broker:").is_empty());
    }

    #[tokio::test]
    async fn test_cert_bundle_collects_whole_fleet() {
        let driver = Arc::new(FakeDriver::default());
        let orchestrator = Orchestrator::with_driver(dr_fleet(), Arc::clone(&driver) as _);
        let report = orchestrator.run().await.unwrap();
        assert!(!report.any_failed());

        // Three CAs collected, and every cluster received a three-line
        // bundle.
        assert_eq!(driver.calls_with_prefix("ca:").len(), 3);
        assert_eq!(
            driver.calls_with_prefix("bundle:"),
            vec!["bundle:dr1:3", "bundle:hub:3", "bundle:dr2:3"]
        );
    }

    #[tokio::test]
    async fn test_single_cluster_run_skips_fleet_stages() {
        let registry = ContextRegistry::register(vec![cluster("solo", false, false, false)]);
        let driver = Arc::new(FakeDriver::default());
        let orchestrator = Orchestrator::with_driver(registry, Arc::clone(&driver) as _);
        let report = orchestrator.run().await.unwrap();

        assert!(!report.any_failed());
        assert!(driver.calls_with_prefix("mco:").is_empty());
        assert!(driver.calls_with_prefix("broker:").is_empty());
        assert!(driver.calls_with_prefix("import:").is_empty());
        assert!(driver.calls_with_prefix("ca:").is_empty());
        // Bring-up, storage and reporting still ran.
        assert_eq!(driver.calls_with_prefix("create:").len(), 1);
        assert_eq!(driver.calls_with_prefix("storage:").len(), 1);
        assert_eq!(driver.calls_with_prefix("report:").len(), 1);
    }

    #[test]
    fn test_stage_order_is_fixed() {
        assert_eq!(Stage::ORDER[0], Stage::ClusterBringUp);
        assert_eq!(Stage::ORDER[7], Stage::Report);
        assert!(Stage::McoOperator.hub_only());
        assert!(!Stage::ClusterBringUp.hub_only());
    }

    #[test]
    fn test_report_exit_code_policy() {
        let mut report = DeploymentReport::default();
        report.record(Stage::ClusterBringUp, 0, "dr1", StageResult::Success);
        report.record(
            Stage::StorageOperator,
            0,
            "dr1",
            StageResult::Skipped("flag".into()),
        );
        assert_eq!(report.exit_code(), 0);

        report.record(
            Stage::HubInstall,
            1,
            "hub",
            StageResult::Failed("boom".into()),
        );
        assert_eq!(report.exit_code(), 1);
        assert!(report.cluster_failed(1));
        assert!(!report.cluster_failed(0));
    }
}
