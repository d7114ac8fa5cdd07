//! The deploy subcommand.
//!
//! Accepts either the flat single-cluster form or the multicluster form
//! (`multicluster <N> --cluster1 … --cluster2 …`). Per-cluster argument
//! blocks are tokenized first; each cluster's effective argument vector
//! (common + own block) is then parsed by the same flag parser and turned
//! into a configuration: defaults, then overlay files in order, then
//! explicit CLI flags on top.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use framework::{ClusterConfig, ContextRegistry, TokenizedArgs};
use serde_yaml::{Mapping, Value};
use tracing::info;

use crate::ui;
use deploy::Orchestrator;

/// Deploy a cluster fleet and its DR stack.
#[derive(Parser, Debug)]
pub struct DeployCommand {
    /// Deployment arguments: flat single-cluster flags, or
    /// `multicluster <N>` followed by marker-delimited per-cluster blocks.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

/// Per-cluster flags, parsed from each cluster's effective argument set.
#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true)]
struct ClusterArgs {
    /// Name of the cluster.
    #[arg(long)]
    cluster_name: Option<String>,

    /// Installer state directory for the cluster.
    #[arg(long)]
    cluster_path: Option<PathBuf>,

    /// Configuration overlay files, merged in the order given.
    #[arg(long = "conf")]
    conf: Vec<PathBuf>,

    /// Comma-separated report recipients.
    #[arg(long)]
    email_ids: Option<String>,

    /// Log level handed to external installer invocations.
    #[arg(long)]
    log_level: Option<String>,
}

impl DeployCommand {
    /// Run the deployment and return the process exit code.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed invocations and unsupported
    /// configurations; cluster-level failures are reflected in the exit
    /// code instead.
    pub async fn run(self) -> Result<i32> {
        let configs = if self.args.first().map(String::as_str) == Some("multicluster") {
            multicluster_configs(&self.args)?
        } else {
            vec![cluster_config_from_argv(&self.args)?]
        };
        for config in &configs {
            config.validate()?;
        }

        ui::print_section("Deployment plan");
        for (i, config) in configs.iter().enumerate() {
            let mut role = Vec::new();
            if config.multicluster.hub_cluster {
                role.push("hub");
            }
            if config.multicluster.primary_cluster {
                role.push("primary");
            }
            let role = if role.is_empty() {
                String::new()
            } else {
                format!(" [{}]", role.join(", "))
            };
            ui::print_info(&format!(
                "cluster{}: {} at {}{}",
                i + 1,
                config.env.cluster_name,
                config.env.cluster_path.display(),
                role
            ));
        }

        let registry = ContextRegistry::register(configs);
        info!(
            nclusters = registry.nclusters(),
            multicluster = registry.multicluster(),
            "Starting deployment run"
        );
        let report = Orchestrator::new(registry).run().await?;
        ui::print_report(&report);
        Ok(report.exit_code())
    }
}

/// Parse the multicluster form into one configuration per cluster.
fn multicluster_configs(args: &[String]) -> Result<Vec<ClusterConfig>> {
    let nclusters: usize = args
        .get(1)
        .context("multicluster requires a cluster count")?
        .parse()
        .context("invalid cluster count")?;
    if nclusters < 2 {
        bail!("multicluster deployments need at least 2 clusters");
    }
    let tokens = TokenizedArgs::tokenize(&args[2..], nclusters)?;
    (0..nclusters)
        .map(|i| {
            cluster_config_from_argv(&tokens.cluster_argv(i))
                .with_context(|| format!("parsing arguments for cluster{}", i + 1))
        })
        .collect()
}

/// Build one cluster's configuration from its argument vector.
fn cluster_config_from_argv(argv: &[String]) -> Result<ClusterConfig> {
    let args = ClusterArgs::try_parse_from(argv).context("parsing cluster arguments")?;

    let mut config = ClusterConfig::default();
    for file in &args.conf {
        config
            .update_from_file(file)
            .with_context(|| format!("loading configuration overlay {}", file.display()))?;
    }
    // Explicit CLI flags beat anything merged from overlay files.
    config.update(&cli_overlay(&args))?;
    Ok(config)
}

/// Partial configuration document carrying only the explicit CLI flags.
fn cli_overlay(args: &ClusterArgs) -> Value {
    let mut env = Mapping::new();
    if let Some(ref name) = args.cluster_name {
        env.insert("cluster_name".into(), name.clone().into());
    }
    if let Some(ref path) = args.cluster_path {
        env.insert(
            "cluster_path".into(),
            path.display().to_string().into(),
        );
    }

    let mut run = Mapping::new();
    if let Some(ref level) = args.log_level {
        run.insert("log_level".into(), level.clone().into());
    }

    let mut email = Mapping::new();
    if let Some(ref ids) = args.email_ids {
        email.insert("recipients".into(), ids.clone().into());
    }

    let mut root = Mapping::new();
    if !env.is_empty() {
        root.insert("env".into(), Value::Mapping(env));
    }
    if !run.is_empty() {
        root.insert("run".into(), Value::Mapping(run));
    }
    if !email.is_empty() {
        let mut reporting = Mapping::new();
        reporting.insert("email".into(), Value::Mapping(email));
        root.insert("reporting".into(), Value::Mapping(reporting));
    }
    Value::Mapping(root)
}
