//! Tokenizer for the multicluster command-line form.
//!
//! `multicluster <N> --cluster1 <args…> --cluster2 <args…>` interleaves
//! per-cluster argument blocks with shared arguments. A `--cluster<i>`
//! marker opens cluster i's block; the block runs until the next marker.
//! Everything outside a block (including tokens before the first marker)
//! is shared by all clusters.
//!
//! The scan is a two-state machine (`Common` / `Cluster(i)`) over the
//! token list; markers are validated up front so a malformed invocation
//! fails before any output is produced.

use crate::error::FrameworkError;

/// Scanner state: outside any block, or inside cluster i's block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Common,
    Cluster(usize),
}

/// The result of tokenizing a multicluster argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedArgs {
    /// Arguments shared by every cluster.
    pub common: Vec<String>,
    /// Per-cluster argument slices, index 0 = cluster 1.
    pub per_cluster: Vec<Vec<String>>,
}

impl TokenizedArgs {
    /// Tokenize `args` into one common slice and `nclusters` cluster
    /// slices. Markers themselves are consumed, not emitted.
    ///
    /// # Errors
    ///
    /// Returns `MissingClusterMarker` (with no partial output) when any
    /// `--cluster<i>` for i in 1..=nclusters is absent.
    pub fn tokenize(args: &[String], nclusters: usize) -> Result<Self, FrameworkError> {
        // Validate the full marker set before producing anything.
        for i in 1..=nclusters {
            let marker = format!("--cluster{i}");
            if !args.iter().any(|a| a == &marker) {
                return Err(FrameworkError::MissingClusterMarker(i));
            }
        }

        let mut common = Vec::new();
        let mut per_cluster = vec![Vec::new(); nclusters];
        let mut state = ScanState::Common;

        for token in args {
            if let Some(i) = cluster_marker(token) {
                // A marker for a cluster beyond nclusters ends the block
                // but opens nothing; its tokens fall back to common.
                state = if (1..=nclusters).contains(&i) {
                    ScanState::Cluster(i - 1)
                } else {
                    ScanState::Common
                };
                continue;
            }
            match state {
                ScanState::Common => common.push(token.clone()),
                ScanState::Cluster(i) => per_cluster[i].push(token.clone()),
            }
        }

        Ok(Self { common, per_cluster })
    }

    /// Effective argument vector for cluster `i`: common + own slice.
    #[must_use]
    pub fn cluster_argv(&self, i: usize) -> Vec<String> {
        let mut argv = self.common.clone();
        argv.extend(self.per_cluster[i].iter().cloned());
        argv
    }

    /// Cluster `i`'s slice with every flag renamed `--flag<i+1>`, so two
    /// clusters' same-named flags survive re-flattening into one vector.
    #[must_use]
    pub fn suffixed(&self, i: usize) -> Vec<String> {
        self.per_cluster[i]
            .iter()
            .map(|token| {
                if token.starts_with("--") {
                    format!("{}{}", token, i + 1)
                } else {
                    token.clone()
                }
            })
            .collect()
    }
}

/// Parse a `--cluster<i>` marker, returning the 1-based ordinal.
fn cluster_marker(token: &str) -> Option<usize> {
    let digits = token.strip_prefix("--cluster")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_args(s: &[&str]) -> Vec<String> {
        s.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_tokenize_two_clusters() {
        let args = to_args(&[
            "--email-ids",
            "ops@example.com",
            "--cluster1",
            "--cluster-name",
            "dr1",
            "--cluster-path",
            "/tmp/dr1",
            "--cluster2",
            "--cluster-name",
            "hub",
        ]);
        let tokens = TokenizedArgs::tokenize(&args, 2).unwrap();
        assert_eq!(tokens.common, to_args(&["--email-ids", "ops@example.com"]));
        assert_eq!(
            tokens.per_cluster[0],
            to_args(&["--cluster-name", "dr1", "--cluster-path", "/tmp/dr1"])
        );
        assert_eq!(tokens.per_cluster[1], to_args(&["--cluster-name", "hub"]));
    }

    #[test]
    fn test_cluster_argv_excludes_other_clusters() {
        let args = to_args(&[
            "--log-level",
            "debug",
            "--cluster1",
            "--cluster-name",
            "dr1",
            "--cluster2",
            "--cluster-name",
            "dr2",
        ]);
        let tokens = TokenizedArgs::tokenize(&args, 2).unwrap();
        for i in 0..2 {
            let argv = tokens.cluster_argv(i);
            let own = format!("dr{}", i + 1);
            let other = format!("dr{}", 2 - i);
            assert!(argv.contains(&own));
            assert!(!argv.contains(&other));
            assert!(argv.contains(&"--log-level".to_string()));
        }
    }

    #[test]
    fn test_missing_marker_fails() {
        let args = to_args(&["--cluster1", "--cluster-name", "dr1"]);
        let err = TokenizedArgs::tokenize(&args, 2).unwrap_err();
        assert!(matches!(err, FrameworkError::MissingClusterMarker(2)));
    }

    #[test]
    fn test_empty_cluster_block_is_valid() {
        let args = to_args(&["--cluster1", "--cluster2", "--cluster-name", "dr2"]);
        let tokens = TokenizedArgs::tokenize(&args, 2).unwrap();
        assert!(tokens.per_cluster[0].is_empty());
        assert_eq!(tokens.per_cluster[1], to_args(&["--cluster-name", "dr2"]));
    }

    #[test]
    fn test_markers_out_of_order() {
        let args = to_args(&[
            "--cluster2",
            "--cluster-name",
            "dr2",
            "--cluster1",
            "--cluster-name",
            "dr1",
        ]);
        let tokens = TokenizedArgs::tokenize(&args, 2).unwrap();
        assert_eq!(tokens.per_cluster[0], to_args(&["--cluster-name", "dr1"]));
        assert_eq!(tokens.per_cluster[1], to_args(&["--cluster-name", "dr2"]));
    }

    #[test]
    fn test_suffixed_flags() {
        let args = to_args(&[
            "--cluster1",
            "--cluster-name",
            "dr1",
            "--cluster2",
            "--cluster-name",
            "dr2",
        ]);
        let tokens = TokenizedArgs::tokenize(&args, 2).unwrap();
        assert_eq!(
            tokens.suffixed(0),
            to_args(&["--cluster-name1", "dr1"])
        );
        assert_eq!(
            tokens.suffixed(1),
            to_args(&["--cluster-name2", "dr2"])
        );
    }

    #[test]
    fn test_marker_parsing() {
        let args = to_args(&["--cluster1", "--clusterx", "abc", "--cluster10x"]);
        let tokens = TokenizedArgs::tokenize(&args, 1).unwrap();
        // Non-marker lookalikes stay ordinary tokens inside the block.
        assert_eq!(
            tokens.per_cluster[0],
            to_args(&["--clusterx", "abc", "--cluster10x"])
        );
    }
}
