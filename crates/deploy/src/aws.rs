//! Cloud IAM plumbing for the mesh.
//!
//! The mesh's `cloud prepare` acts through each cluster's generated
//! machine-API user, which needs a networking policy attached. Detach is
//! idempotent: a missing user is not an error on teardown paths.

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};

/// Name of the policy attached to per-cluster API users.
pub const MESH_IAM_POLICY_NAME: &str = "mirroring_pool";

/// Marker carried by the generated machine-API user names.
const API_USER_MARKER: &str = "openshift-machine-api-aws";

/// IAM policy lifecycle against the account's generated API users.
pub struct IamPolicyManager {
    iam: aws_sdk_iam::Client,
    sts: aws_sdk_sts::Client,
}

impl IamPolicyManager {
    /// Build clients from the ambient AWS environment.
    pub async fn new() -> Self {
        let config = aws_config::load_from_env().await;
        Self {
            iam: aws_sdk_iam::Client::new(&config),
            sts: aws_sdk_sts::Client::new(&config),
        }
    }

    async fn account_id(&self) -> Result<String> {
        let identity = self
            .sts
            .get_caller_identity()
            .send()
            .await
            .context("looking up AWS caller identity")?;
        identity
            .account()
            .map(ToString::to_string)
            .ok_or_else(|| anyhow!("caller identity has no account id"))
    }

    async fn policy_arn(&self) -> Result<String> {
        Ok(format!(
            "arn:aws:iam::{}:policy/{MESH_IAM_POLICY_NAME}",
            self.account_id().await?
        ))
    }

    /// The generated API user for `cluster_name`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the user listing fails.
    pub async fn find_api_user(&self, cluster_name: &str) -> Result<Option<String>> {
        let matcher = format!("{cluster_name}-");
        let mut pages = self.iam.list_users().into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page.context("listing IAM users")?;
            for user in page.users() {
                let name = user.user_name();
                if name.contains(&matcher) && name.contains(API_USER_MARKER) {
                    return Ok(Some(name.to_string()));
                }
            }
        }
        Ok(None)
    }

    /// Create the mesh policy; an already-existing policy is fine.
    ///
    /// # Errors
    ///
    /// Returns an error on any other create failure.
    pub async fn ensure_policy(&self, document: &str) -> Result<()> {
        match self
            .iam
            .create_policy()
            .policy_name(MESH_IAM_POLICY_NAME)
            .policy_document(document)
            .send()
            .await
        {
            Ok(_) => {
                info!(policy = %MESH_IAM_POLICY_NAME, "Created mesh IAM policy");
                Ok(())
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_entity_already_exists_exception() {
                    warn!(policy = %MESH_IAM_POLICY_NAME, "IAM policy already exists");
                    Ok(())
                } else {
                    Err(anyhow::Error::new(service_err).context("creating mesh IAM policy"))
                }
            }
        }
    }

    /// Attach the mesh policy to the cluster's API user.
    ///
    /// # Errors
    ///
    /// Returns an error when no API user exists or the attach fails.
    pub async fn attach(&self, cluster_name: &str) -> Result<()> {
        let user = self
            .find_api_user(cluster_name)
            .await?
            .ok_or_else(|| anyhow!("no API user found for cluster {cluster_name}"))?;
        info!(user = %user, "Attaching mesh IAM policy");
        self.iam
            .attach_user_policy()
            .user_name(&user)
            .policy_arn(self.policy_arn().await?)
            .send()
            .await
            .with_context(|| format!("attaching policy to {user}"))?;
        Ok(())
    }

    /// Detach the mesh policy from the cluster's API user. A missing
    /// user means there is nothing to detach.
    ///
    /// # Errors
    ///
    /// Returns an error when the detach call itself fails.
    pub async fn detach(&self, cluster_name: &str) -> Result<()> {
        let Some(user) = self.find_api_user(cluster_name).await? else {
            debug!(cluster = %cluster_name, "No API user found, nothing to detach");
            return Ok(());
        };
        info!(user = %user, "Detaching mesh IAM policy");
        self.iam
            .detach_user_policy()
            .user_name(&user)
            .policy_arn(self.policy_arn().await?)
            .send()
            .await
            .with_context(|| format!("detaching policy from {user}"))?;
        Ok(())
    }
}
