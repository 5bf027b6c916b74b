//! conda CLI adapter.
//!
//! Every environment mutation is delegated to the `conda` binary invoked
//! with `--json`. conda interleaves progress text and intermediate JSON
//! blobs, separated by NUL bytes; only the trailing JSON document is
//! authoritative. The orchestrator talks to the [`PackageManagerClient`]
//! port so tests can substitute a canned client without spawning
//! processes.

use std::process::Command;

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::{debug, warn},
};

use crate::error::{Error, Result};

/// Channel searched when the caller specifies none.
pub const DEFAULT_CHANNEL: &str = "droplab-plugins";

/// All DropLab plugin packages carry this name prefix.
pub const PACKAGE_PREFIX: &str = "droplab.";

/// Translate channel names into conda `-c` arguments, preserving order.
///
/// An empty/unset list falls back to [`DEFAULT_CHANNEL`].
pub fn channel_args(channels: Option<&[String]>) -> Vec<String> {
    let default = [DEFAULT_CHANNEL.to_string()];
    let channels = match channels {
        Some(c) if !c.is_empty() => c,
        _ => default.as_slice(),
    };
    channels
        .iter()
        .flat_map(|c| ["-c".to_string(), c.clone()])
        .collect()
}

/// One entry of `conda list --revisions --json`.
///
/// conda attaches more fields (date, install/remove lists); they are
/// carried opaquely so action-log entries archive the full record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
    pub rev: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// One entry of `conda list --json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Result of a mutating conda call: the exact argument vector used (for
/// the action log) and the parsed trailing JSON document.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub conda_args: Vec<String>,
    pub log: Value,
}

/// Typed port over the package manager CLI.
pub trait PackageManagerClient: Send + Sync {
    /// `conda search --json <pattern>`.
    fn search(&self, pattern: &str) -> Result<Value>;

    /// `conda install -y --json <channel args> <extra args> <specs>`.
    fn install(
        &self,
        specs: &[String],
        channel_args: &[String],
        extra_args: &[String],
    ) -> Result<InstallOutcome>;

    /// `conda uninstall --json -y <extra args> <specs>`.
    fn uninstall(&self, specs: &[String], extra_args: &[String]) -> Result<InstallOutcome>;

    /// `conda list --revisions --json`.
    fn list_revisions(&self) -> Result<Vec<Revision>>;

    /// `conda install --json <channel args> <extra args> --revision <N>`.
    fn install_revision(
        &self,
        revision: i64,
        channel_args: &[String],
        extra_args: &[String],
    ) -> Result<InstallOutcome>;

    /// Batched installed-package lookup: one `conda list --json` call,
    /// returning only the requested names that are actually installed.
    /// Missing names are logged, never an error.
    fn installed_versions(&self, names: &[String]) -> Result<Vec<PackageInfo>>;
}

/// [`PackageManagerClient`] backed by the real `conda` binary.
#[derive(Debug, Clone)]
pub struct CondaCli {
    program: String,
}

impl Default for CondaCli {
    fn default() -> Self {
        Self {
            program: "conda".into(),
        }
    }
}

impl CondaCli {
    /// Use a non-default binary (e.g. `mamba`, or a test shim).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run conda with `args`, blocking until exit, and return the trailing
    /// JSON document of stdout.
    fn run_json(&self, args: &[String]) -> Result<Value> {
        debug!(program = %self.program, ?args, "invoking package manager");
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| Error::package_manager(format!("failed to run {}: {e}", self.program)))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(Error::package_manager(message));
        }
        last_json_document(&stdout)
    }
}

impl PackageManagerClient for CondaCli {
    fn search(&self, pattern: &str) -> Result<Value> {
        self.run_json(&["search".into(), "--json".into(), pattern.into()])
    }

    fn install(
        &self,
        specs: &[String],
        channel_args: &[String],
        extra_args: &[String],
    ) -> Result<InstallOutcome> {
        let conda_args = install_args(specs, channel_args, extra_args);
        let log = self.run_json(&conda_args)?;
        Ok(InstallOutcome { conda_args, log })
    }

    fn uninstall(&self, specs: &[String], extra_args: &[String]) -> Result<InstallOutcome> {
        let conda_args = uninstall_args(specs, extra_args);
        let log = self.run_json(&conda_args)?;
        Ok(InstallOutcome { conda_args, log })
    }

    fn list_revisions(&self) -> Result<Vec<Revision>> {
        let value = self.run_json(&["list".into(), "--revisions".into(), "--json".into()])?;
        Ok(serde_json::from_value(value)?)
    }

    fn install_revision(
        &self,
        revision: i64,
        channel_args: &[String],
        extra_args: &[String],
    ) -> Result<InstallOutcome> {
        let conda_args = install_revision_args(revision, channel_args, extra_args);
        let log = self.run_json(&conda_args)?;
        Ok(InstallOutcome { conda_args, log })
    }

    fn installed_versions(&self, names: &[String]) -> Result<Vec<PackageInfo>> {
        let value = self.run_json(&["list".into(), "--json".into()])?;
        let installed: Vec<PackageInfo> = serde_json::from_value(value)?;
        Ok(filter_installed(installed, names))
    }
}

/// `["install", "-y", "--json", <channels>, <extra>, <specs>]`.
pub fn install_args(
    specs: &[String],
    channel_args: &[String],
    extra_args: &[String],
) -> Vec<String> {
    let mut args: Vec<String> = vec!["install".into(), "-y".into(), "--json".into()];
    args.extend(channel_args.iter().cloned());
    args.extend(extra_args.iter().cloned());
    args.extend(specs.iter().cloned());
    args
}

fn uninstall_args(specs: &[String], extra_args: &[String]) -> Vec<String> {
    let mut args: Vec<String> = vec!["uninstall".into(), "--json".into(), "-y".into()];
    args.extend(extra_args.iter().cloned());
    args.extend(specs.iter().cloned());
    args
}

fn install_revision_args(
    revision: i64,
    channel_args: &[String],
    extra_args: &[String],
) -> Vec<String> {
    let mut args: Vec<String> = vec!["install".into(), "--json".into()];
    args.extend(channel_args.iter().cloned());
    args.extend(extra_args.iter().cloned());
    args.push("--revision".into());
    args.push(revision.to_string());
    args
}

/// Keep only the requested names, preserving conda's listing order.
fn filter_installed(installed: Vec<PackageInfo>, names: &[String]) -> Vec<PackageInfo> {
    let found: Vec<PackageInfo> = installed
        .into_iter()
        .filter(|p| names.iter().any(|n| n == &p.name))
        .collect();
    for name in names {
        if !found.iter().any(|p| &p.name == name) {
            warn!(%name, "package not installed in conda environment");
        }
    }
    found
}

/// Parse the last JSON document in conda's NUL-separated output.
///
/// conda emits zero or more progress blobs followed by the final result;
/// progress text may precede the document within the last chunk.
pub fn last_json_document(raw: &str) -> Result<Value> {
    let chunk = raw
        .rsplit('\0')
        .find(|c| !c.trim().is_empty())
        .unwrap_or("")
        .trim();
    if let Ok(value) = serde_json::from_str(chunk) {
        return Ok(value);
    }
    // Progress text glued in front of the document: parse from the first
    // opening brace/bracket.
    if let Some(start) = chunk.find(['{', '[']) {
        if let Ok(value) = serde_json::from_str(&chunk[start..]) {
            return Ok(value);
        }
    }
    Err(Error::package_manager(format!(
        "no JSON document in package manager output: {}",
        chunk.chars().take(200).collect::<String>()
    )))
}

/// `true` when a conda failure message indicates an HTTP/connectivity
/// problem (offline, unreachable update server).
pub fn is_connectivity_error(message: &str) -> bool {
    message.contains("CondaHTTPError") || message.contains("ConnectionError")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_args_alternates_flag_and_name() {
        let channels = vec!["droplab-plugins".to_string(), "conda-forge".to_string()];
        let args = channel_args(Some(&channels));
        assert_eq!(args.len(), 2 * channels.len());
        assert_eq!(args, ["-c", "droplab-plugins", "-c", "conda-forge"]);
    }

    #[test]
    fn test_channel_args_default() {
        let default = vec![DEFAULT_CHANNEL.to_string()];
        assert_eq!(channel_args(None), channel_args(Some(&default)));
        assert_eq!(channel_args(Some(&[])), ["-c", DEFAULT_CHANNEL]);
    }

    #[test]
    fn test_last_json_document_plain() {
        let value = last_json_document("{\"success\": true}").unwrap();
        assert_eq!(value["success"], true);
    }

    #[test]
    fn test_last_json_document_nul_separated() {
        let raw = "{\"progress\": 1}\0{\"progress\": 2}\0{\"success\": true}\n";
        let value = last_json_document(raw).unwrap();
        assert_eq!(value["success"], true);
    }

    #[test]
    fn test_last_json_document_trailing_empty_chunk() {
        let raw = "{\"success\": true}\0\n";
        let value = last_json_document(raw).unwrap();
        assert_eq!(value["success"], true);
    }

    #[test]
    fn test_last_json_document_progress_prefix() {
        let raw = "Collecting package metadata ...\n{\"actions\": {}}";
        let value = last_json_document(raw).unwrap();
        assert!(value.get("actions").is_some());
    }

    #[test]
    fn test_last_json_document_rejects_garbage() {
        assert!(last_json_document("not json at all").is_err());
        assert!(last_json_document("").is_err());
    }

    #[test]
    fn test_install_args_ordering() {
        let args = install_args(
            &["droplab.dropgen".into()],
            &["-c".into(), "droplab-plugins".into()],
            &["--dry-run".into()],
        );
        assert_eq!(
            args,
            [
                "install",
                "-y",
                "--json",
                "-c",
                "droplab-plugins",
                "--dry-run",
                "droplab.dropgen"
            ]
        );
    }

    #[test]
    fn test_install_revision_args() {
        let args = install_revision_args(3, &["-c".into(), "droplab-plugins".into()], &[]);
        assert_eq!(
            args,
            ["install", "--json", "-c", "droplab-plugins", "--revision", "3"]
        );
    }

    #[test]
    fn test_filter_installed_returns_found_subset() {
        let installed = vec![
            PackageInfo {
                name: "droplab.dropgen".into(),
                version: "1.2.0".into(),
                extra: Default::default(),
            },
            PackageInfo {
                name: "numpy".into(),
                version: "1.26.0".into(),
                extra: Default::default(),
            },
        ];
        let names = vec!["droplab.dropgen".to_string(), "droplab.missing".to_string()];
        let found = filter_installed(installed, &names);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "droplab.dropgen");
    }

    #[test]
    fn test_is_connectivity_error() {
        assert!(is_connectivity_error(
            "CondaHTTPError: HTTP 000 CONNECTION FAILED"
        ));
        assert!(!is_connectivity_error("PackagesNotFoundError: droplab.x"));
    }

    #[test]
    fn test_revision_preserves_extra_fields() {
        let raw = r#"{"rev": 4, "date": "2026-02-11", "install": ["droplab.dropgen-1.2.0"]}"#;
        let rev: Revision = serde_json::from_str(raw).unwrap();
        assert_eq!(rev.rev, 4);
        let back = serde_json::to_value(&rev).unwrap();
        assert_eq!(back["date"], "2026-02-11");
    }
}
