//! Provisioning of the external tool binaries.
//!
//! The installer and client binaries are fetched from the release mirror
//! into the configured bin directory, versions like `4.12-ga` or
//! `4.12.0-0.nightly` resolved against the release services first. The
//! mesh CLI installs through its published installer script. Existing
//! binaries are reused unless a force flag asks for a re-download, and
//! forcing is honoured only for the first cluster context so parallel
//! contexts never delete a binary in use.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::cmd::{exec_cmd, ExecOpts};
use crate::error::OpsError;

/// Installer binary name inside the release tarball.
pub const INSTALLER_BIN: &str = "openshift-install";
/// Client binary name inside the release tarball.
pub const CLIENT_BIN: &str = "oc";
/// Mesh CLI binary name.
pub const MESH_BIN: &str = "subctl";

/// Release stream endpoint resolving `*.nightly` version names.
const NIGHTLY_RELEASE_URL: &str = "https://amd64.ocp.releases.ci.openshift.org/api/v1/releasestream";
/// Upgrade graph endpoint resolving `-ga` versions.
const CHANNEL_GRAPH_URL: &str = "https://api.openshift.com/api/upgrades_info/v1/graph";
/// Default mesh CLI installer script.
const MESH_DOWNLOAD_URL: &str = "https://get.submariner.io";

/// Resolve a configured version string to a concrete build.
///
/// `X.Y.Z-0.nightly` resolves to the latest accepted nightly build,
/// `X.Y-ga` to a released version on `<channel>-X.Y` (selected by
/// `version_index`, -1 meaning latest), anything else is literal.
///
/// # Errors
///
/// Returns an error if the release service cannot be reached or the
/// response has no versions.
pub async fn resolve_version(
    version: &str,
    channel: &str,
    version_index: i64,
) -> Result<String, OpsError> {
    if version.ends_with(".nightly") {
        let url = format!("{NIGHTLY_RELEASE_URL}/{version}/latest");
        let body: serde_json::Value = reqwest::get(&url).await?.error_for_status()?.json().await?;
        return body
            .get("name")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| OpsError::DownloadFailed {
                url,
                reason: "release stream response has no name".into(),
            });
    }
    if let Some(base) = version.strip_suffix("-ga") {
        let url = format!("{CHANNEL_GRAPH_URL}?channel={channel}-{base}");
        let body: serde_json::Value = reqwest::Client::new()
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let mut versions: Vec<String> = body
            .get("nodes")
            .and_then(serde_json::Value::as_array)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|n| n.get("version").and_then(serde_json::Value::as_str))
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();
        versions.sort_by_key(|v| parse_version(v));
        return pick_indexed(&versions, version_index).ok_or_else(|| OpsError::DownloadFailed {
            url,
            reason: format!("no versions on channel {channel}-{base}"),
        });
    }
    Ok(version.to_string())
}

/// Numeric sort key for `X.Y.Z` version strings.
fn parse_version(version: &str) -> (u64, u64, u64) {
    let mut parts = version.split('.').map(|p| {
        p.chars()
            .take_while(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .unwrap_or(0)
    });
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

/// Python-style indexing into a sorted version list (-1 = last).
fn pick_indexed(versions: &[String], index: i64) -> Option<String> {
    let len = versions.len() as i64;
    let resolved = if index < 0 { len + index } else { index };
    if (0..len).contains(&resolved) {
        Some(versions[resolved as usize].clone())
    } else {
        None
    }
}

/// Tarball URL on the release mirror for one tool at one version.
///
/// # Errors
///
/// `UnsupportedHost` when this host OS has no published builds.
pub fn mirror_tarball_url(mirror: &str, file: &str, version: &str) -> Result<String, OpsError> {
    let os_segment = match std::env::consts::OS {
        "linux" => "linux",
        "macos" => "mac",
        other => return Err(OpsError::UnsupportedHost(other.to_string())),
    };
    Ok(format!(
        "{mirror}/{version}/{file}-{os_segment}-{version}.tar.gz"
    ))
}

/// Download a URL to a local file.
///
/// # Errors
///
/// `DownloadFailed` on HTTP errors, `Io` on filesystem errors.
pub async fn download_file(url: &str, dest: &Path) -> Result<(), OpsError> {
    debug!(url, dest = %dest.display(), "Downloading file");
    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        return Err(OpsError::DownloadFailed {
            url: url.to_string(),
            reason: format!("status {}", response.status()),
        });
    }
    let bytes = response.bytes().await?;
    std::fs::write(dest, &bytes)?;
    Ok(())
}

/// Settings for provisioning one mirror-hosted tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Mirror base URL.
    pub mirror_url: String,
    /// Concrete (already resolved) version to download.
    pub version: String,
    /// Directory the binary lands in.
    pub bin_dir: PathBuf,
    /// Re-download even when the binary exists.
    pub force: bool,
    /// Whether the current cluster context is the first one; forcing is
    /// only honoured there.
    pub first_context: bool,
}

/// Ensure the installer binary exists in the bin directory.
///
/// # Errors
///
/// Returns an error on download, unpack or verification failure.
pub async fn ensure_installer(spec: &ToolSpec) -> Result<PathBuf, OpsError> {
    ensure_tool(spec, INSTALLER_BIN, &[INSTALLER_BIN]).await
}

/// Ensure the client binary (plus kubectl) exists in the bin directory.
///
/// # Errors
///
/// Returns an error on download, unpack or verification failure.
pub async fn ensure_client(spec: &ToolSpec) -> Result<PathBuf, OpsError> {
    ensure_tool(spec, "openshift-client", &[CLIENT_BIN, "kubectl"]).await
}

async fn ensure_tool(
    spec: &ToolSpec,
    tarball_stem: &str,
    members: &[&str],
) -> Result<PathBuf, OpsError> {
    let binary = spec.bin_dir.join(members[0]);

    if binary.is_file() && spec.force && spec.first_context {
        info!(binary = %binary.display(), "Forcing re-download");
        std::fs::remove_file(&binary)?;
    }

    if binary.is_file() {
        debug!(binary = %binary.display(), "Binary exists, skipping download");
    } else {
        std::fs::create_dir_all(&spec.bin_dir)?;
        let url = mirror_tarball_url(&spec.mirror_url, tarball_stem, &spec.version)?;
        info!(url = %url, "Downloading {tarball_stem} ({})", spec.version);
        let tarball = spec.bin_dir.join(format!("{tarball_stem}.tar.gz"));
        download_file(&url, &tarball).await?;

        let tarball_str = tarball.display().to_string();
        let bin_dir_str = spec.bin_dir.display().to_string();
        let mut argv = vec!["tar", "xzf", &tarball_str, "-C", &bin_dir_str];
        argv.extend(members);
        exec_cmd(&argv, ExecOpts::default()).await?;
        std::fs::remove_file(&tarball)?;
    }

    let binary_str = binary.display().to_string();
    let version_out = exec_cmd(&[binary_str.as_str(), "version"], ExecOpts::default()).await?;
    info!(binary = %binary.display(), version = %version_out.stdout.trim(), "Tool ready");
    Ok(binary)
}

/// Ensure the mesh CLI exists in the bin directory, installing it via
/// the published installer script when missing.
///
/// # Errors
///
/// Returns an error on download or script failure.
pub async fn ensure_mesh_cli(bin_dir: &Path, url: Option<&str>) -> Result<PathBuf, OpsError> {
    let binary = bin_dir.join(MESH_BIN);
    if binary.is_file() {
        debug!(binary = %binary.display(), "Mesh CLI exists, skipping download");
        return Ok(binary);
    }
    std::fs::create_dir_all(bin_dir)?;

    let script_url = url.unwrap_or(MESH_DOWNLOAD_URL);
    let script = bin_dir.join("mesh-downloader.sh");
    download_file(script_url, &script).await?;

    // The installer script drops the binary in ~/.local/bin.
    let script_str = script.display().to_string();
    exec_cmd(&["bash", &script_str], ExecOpts::default()).await?;

    let installed = framework::config::expand_home(Path::new("~/.local/bin")).join(MESH_BIN);
    if installed.is_file() && !binary.exists() {
        std::os::unix::fs::symlink(&installed, &binary)?;
    }
    if !binary.is_file() {
        return Err(OpsError::DownloadFailed {
            url: script_url.to_string(),
            reason: "mesh CLI not present after installer script".into(),
        });
    }
    Ok(binary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_tarball_url() {
        let url = mirror_tarball_url(
            "https://mirror.example.com/clients/ocp",
            "openshift-install",
            "4.12.9",
        )
        .unwrap();
        let os_segment = if cfg!(target_os = "macos") { "mac" } else { "linux" };
        assert_eq!(
            url,
            format!(
                "https://mirror.example.com/clients/ocp/4.12.9/openshift-install-{os_segment}-4.12.9.tar.gz"
            )
        );
    }

    #[test]
    fn test_parse_version_ordering() {
        let mut versions = vec![
            "4.12.10".to_string(),
            "4.12.2".to_string(),
            "4.11.30".to_string(),
        ];
        versions.sort_by_key(|v| parse_version(v));
        assert_eq!(versions, vec!["4.11.30", "4.12.2", "4.12.10"]);
    }

    #[test]
    fn test_pick_indexed_negative() {
        let versions: Vec<String> = ["4.12.1", "4.12.2", "4.12.3"]
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(pick_indexed(&versions, -1).unwrap(), "4.12.3");
        assert_eq!(pick_indexed(&versions, -2).unwrap(), "4.12.2");
        assert_eq!(pick_indexed(&versions, 0).unwrap(), "4.12.1");
        assert!(pick_indexed(&versions, 3).is_none());
        assert!(pick_indexed(&versions, -4).is_none());
    }

    #[tokio::test]
    async fn test_literal_version_passthrough() {
        let resolved = resolve_version("4.12.9", "stable", -1).await.unwrap();
        assert_eq!(resolved, "4.12.9");
    }
}
