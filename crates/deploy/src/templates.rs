//! Embedded manifest templates.
//!
//! Templates are compiled into the binary so a deployment host needs no
//! template directory alongside the executable.

/// AWS install-config rendered for the installer.
pub const INSTALL_CONFIG_AWS: &str = include_str!("../templates/install-config-aws.yaml.hbs");

/// Custom operator catalog source.
pub const CATALOG_SOURCE: &str = include_str!("../templates/catalog-source.yaml.hbs");

/// Multicluster orchestrator subscription.
pub const SUBSCRIPTION_MCO: &str = include_str!("../templates/subscription-mco.yaml.hbs");

/// Bare namespace manifest.
pub const NAMESPACE: &str = include_str!("../templates/namespace.yaml.hbs");

/// ACM hub operator group.
pub const ACM_OPERATORGROUP: &str = include_str!("../templates/acm-operatorgroup.yaml.hbs");

/// ACM hub subscription.
pub const ACM_SUBSCRIPTION: &str = include_str!("../templates/acm-subscription.yaml.hbs");

/// ACM MultiClusterHub custom resource.
pub const ACM_MULTICLUSTERHUB: &str = include_str!("../templates/acm-multiclusterhub.yaml.hbs");

/// Managed-cluster import pair (ManagedCluster + auto-import secret).
pub const IMPORT_CLUSTER: &str = include_str!("../templates/import-cluster.yaml.hbs");

/// Trust-bundle configmap skeleton; the CA payload is injected after parse.
pub const SSL_CERTIFICATE: &str = include_str!("../templates/ssl-certificate.yaml");

/// IAM policy document attached to per-cluster API users for the mesh.
pub const AWS_IAM_POLICY: &str = include_str!("../templates/aws-iam-policy.json");
