//! Cluster contexts and the registry that switches between them.
//!
//! The registry owns one context per cluster and a cursor naming the
//! cluster that is "current". Switching moves the cursor; it never copies
//! configuration. The registry is single-threaded by design: only the
//! orchestrating task may switch or read the cursor, and anything handed
//! to a parallel worker must be resolved to owned values first.

use crate::config::ClusterConfig;
use crate::error::FrameworkError;

/// One cluster's registered configuration snapshot.
#[derive(Debug, Clone)]
pub struct ClusterContext {
    /// Position in the registry, fixed at registration.
    pub index: usize,
    /// The cluster's configuration.
    pub config: ClusterConfig,
}

impl ClusterContext {
    /// The cluster's name, for log tagging.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.env.cluster_name
    }
}

/// Ordered collection of cluster contexts plus the current-cluster cursor.
#[derive(Debug)]
pub struct ContextRegistry {
    clusters: Vec<ClusterContext>,
    current: usize,
    default_index: usize,
}

impl ContextRegistry {
    /// Register the fleet's contexts in order.
    ///
    /// The default index is the hub cluster when one is declared,
    /// otherwise index 0. The cursor starts at the default.
    #[must_use]
    pub fn register(configs: Vec<ClusterConfig>) -> Self {
        let clusters: Vec<ClusterContext> = configs
            .into_iter()
            .enumerate()
            .map(|(index, config)| ClusterContext { index, config })
            .collect();
        let default_index = clusters
            .iter()
            .position(|c| c.config.multicluster.hub_cluster)
            .unwrap_or(0);
        Self {
            clusters,
            current: default_index,
            default_index,
        }
    }

    /// Number of registered clusters.
    #[must_use]
    pub fn nclusters(&self) -> usize {
        self.clusters.len()
    }

    /// Whether this run drives more than one cluster.
    #[must_use]
    pub fn multicluster(&self) -> bool {
        self.clusters.len() > 1
    }

    /// Move the cursor to cluster `index`.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfRange` (cursor unchanged) if no such cluster
    /// is registered.
    pub fn switch_to(&mut self, index: usize) -> Result<(), FrameworkError> {
        if index >= self.clusters.len() {
            return Err(FrameworkError::IndexOutOfRange {
                index,
                nclusters: self.clusters.len(),
            });
        }
        tracing::debug!(
            cluster = %self.clusters[index].name(),
            index,
            "Switching cluster context"
        );
        self.current = index;
        Ok(())
    }

    /// Move the cursor back to the default cluster.
    pub fn switch_to_default(&mut self) {
        self.current = self.default_index;
    }

    /// The context under the cursor.
    #[must_use]
    pub fn current(&self) -> &ClusterContext {
        &self.clusters[self.current]
    }

    /// The cursor's position.
    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Index fixed as the default at registration.
    #[must_use]
    pub fn default_index(&self) -> usize {
        self.default_index
    }

    /// Index of the cluster declaring itself the hub, if any.
    #[must_use]
    pub fn acm_index(&self) -> Option<usize> {
        self.clusters
            .iter()
            .position(|c| c.config.multicluster.hub_cluster)
    }

    /// Context at `index`, if registered.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ClusterContext> {
        self.clusters.get(index)
    }

    /// Iterate over all contexts in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ClusterContext> {
        self.clusters.iter()
    }

    /// All contexts except the hub, in registration order. When
    /// `include_hub_if_primary` is set and the hub is also the declared
    /// primary, the hub is included.
    #[must_use]
    pub fn non_hub_contexts(&self, include_hub_if_primary: bool) -> Vec<&ClusterContext> {
        let acm = self.acm_index();
        self.clusters
            .iter()
            .filter(|c| {
                if Some(c.index) != acm {
                    return true;
                }
                include_hub_if_primary && c.config.multicluster.primary_cluster
            })
            .collect()
    }

    /// Index of the cluster declared primary, if any.
    #[must_use]
    pub fn primary_index(&self) -> Option<usize> {
        self.clusters
            .iter()
            .position(|c| c.config.multicluster.primary_cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;

    fn cluster(name: &str, hub: bool, primary: bool) -> ClusterConfig {
        let mut config = ClusterConfig::default();
        let overlay: Value = serde_yaml::from_str(&format!(
            "env:\n  cluster_name: {name}\n  cluster_path: /tmp/{name}\n\
             multicluster:\n  hub_cluster: {hub}\n  primary_cluster: {primary}\n"
        ))
        .unwrap();
        config.update(&overlay).unwrap();
        config
    }

    fn three_cluster_registry() -> ContextRegistry {
        ContextRegistry::register(vec![
            cluster("dr1", false, true),
            cluster("hub", true, false),
            cluster("dr2", false, false),
        ])
    }

    #[test]
    fn test_switch_and_current() {
        let mut registry = three_cluster_registry();
        for i in 0..registry.nclusters() {
            registry.switch_to(i).unwrap();
            assert_eq!(registry.current().index, i);
        }
        registry.switch_to(0).unwrap();
        assert_eq!(registry.current().name(), "dr1");
    }

    #[test]
    fn test_switch_out_of_range_leaves_cursor() {
        let mut registry = three_cluster_registry();
        registry.switch_to(2).unwrap();
        let err = registry.switch_to(3).unwrap_err();
        assert!(matches!(
            err,
            FrameworkError::IndexOutOfRange {
                index: 3,
                nclusters: 3
            }
        ));
        assert_eq!(registry.current_index(), 2);
    }

    #[test]
    fn test_default_index_is_hub() {
        let mut registry = three_cluster_registry();
        assert_eq!(registry.default_index(), 1);
        registry.switch_to(2).unwrap();
        registry.switch_to_default();
        assert_eq!(registry.current().name(), "hub");
    }

    #[test]
    fn test_default_index_without_hub() {
        let registry = ContextRegistry::register(vec![
            cluster("a", false, false),
            cluster("b", false, false),
        ]);
        assert_eq!(registry.default_index(), 0);
        assert_eq!(registry.acm_index(), None);
    }

    #[test]
    fn test_non_hub_contexts_ordering() {
        let registry = three_cluster_registry();
        let names: Vec<&str> = registry
            .non_hub_contexts(false)
            .iter()
            .map(|c| c.name())
            .collect();
        assert_eq!(names, vec!["dr1", "dr2"]);
    }

    #[test]
    fn test_non_hub_contexts_includes_primary_hub() {
        let registry = ContextRegistry::register(vec![
            cluster("hubprimary", true, true),
            cluster("dr2", false, false),
        ]);
        let names: Vec<&str> = registry
            .non_hub_contexts(true)
            .iter()
            .map(|c| c.name())
            .collect();
        assert_eq!(names, vec!["hubprimary", "dr2"]);

        let excluded: Vec<&str> = registry
            .non_hub_contexts(false)
            .iter()
            .map(|c| c.name())
            .collect();
        assert_eq!(excluded, vec!["dr2"]);
    }
}
