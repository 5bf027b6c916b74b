//! Enumeration of installed (available) and enabled plugins.
//!
//! A plugin directory carries a `properties.yml` describing the conda
//! package it was installed from. Directories with unreadable metadata are
//! logged and skipped; a bad plugin never aborts a listing.

use std::path::{Path, PathBuf};

use {
    serde::{Deserialize, Serialize},
    tracing::warn,
};

use droplab_config::Layout;

use crate::{conda::PackageManagerClient, error::Result, links::LinkOps};

/// Metadata file inside every plugin directory.
pub const PROPERTIES_FILE: &str = "properties.yml";

/// Per-plugin metadata from `properties.yml`, plus the resolved directory
/// path (computed at read time, never stored in the file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginProperties {
    pub package_name: String,
    pub plugin_name: String,
    pub version: String,
    #[serde(skip)]
    pub path: PathBuf,
}

/// Read and resolve a plugin directory's properties.
pub fn read_properties(dir: &Path) -> Result<PluginProperties> {
    let raw = std::fs::read_to_string(dir.join(PROPERTIES_FILE))?;
    let mut props: PluginProperties = serde_yaml::from_str(&raw)?;
    props.path = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    Ok(props)
}

/// List installed plugins: real (non-link) subdirectories of each root,
/// in root order, sorted by name within a root.
pub fn list_available(roots: &[PathBuf], links: &dyn LinkOps) -> Vec<PluginProperties> {
    let mut plugins = Vec::new();
    for root in roots {
        for dir in sorted_subdirs(root) {
            if links.is_link(&dir) {
                continue;
            }
            match read_properties(&dir) {
                Ok(props) => plugins.push(props),
                Err(e) => {
                    warn!(path = %dir.display(), %e, "skipping plugin with unreadable properties");
                },
            }
        }
    }
    plugins
}

/// List enabled plugins from the enabled-links directory.
///
/// With `filter_installed` set, only link entries count (a real directory
/// directly under `enabled/` is a dev-mode convention, not an installed
/// plugin) and the results are cross-referenced against the conda
/// environment in one batched lookup; names conda does not know are
/// dropped.
pub fn list_enabled(
    layout: &Layout,
    links: &dyn LinkOps,
    client: &dyn PackageManagerClient,
    filter_installed: bool,
) -> Result<Vec<PluginProperties>> {
    let mut plugins = Vec::new();
    for dir in sorted_subdirs(&layout.enabled_dir()) {
        if filter_installed && !links.is_link(&dir) {
            continue;
        }
        match read_properties(&dir) {
            Ok(props) => plugins.push(props),
            Err(e) => {
                warn!(path = %dir.display(), %e, "skipping enabled plugin with unreadable properties");
            },
        }
    }

    if filter_installed && !plugins.is_empty() {
        let names: Vec<String> = plugins.iter().map(|p| p.package_name.clone()).collect();
        let installed = client.installed_versions(&names)?;
        plugins.retain(|p| installed.iter().any(|i| i.name == p.package_name));
    }
    Ok(plugins)
}

/// Subdirectories (including links to directories) of `root`, sorted by
/// name. A missing root is an empty listing.
fn sorted_subdirs(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        conda::{InstallOutcome, PackageInfo, Revision},
        error::Error,
        links::FsLinkOps,
    };
    use serde_json::Value;

    fn write_plugin(root: &Path, name: &str, package_name: &str) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(PROPERTIES_FILE),
            format!("package_name: {package_name}\nplugin_name: {name}\nversion: \"1.0\"\n"),
        )
        .unwrap();
        dir
    }

    struct ListClient {
        installed: Vec<String>,
    }

    impl PackageManagerClient for ListClient {
        fn search(&self, _: &str) -> Result<Value> {
            Err(Error::message("not used"))
        }

        fn install(&self, _: &[String], _: &[String], _: &[String]) -> Result<InstallOutcome> {
            Err(Error::message("not used"))
        }

        fn uninstall(&self, _: &[String], _: &[String]) -> Result<InstallOutcome> {
            Err(Error::message("not used"))
        }

        fn list_revisions(&self) -> Result<Vec<Revision>> {
            Err(Error::message("not used"))
        }

        fn install_revision(&self, _: i64, _: &[String], _: &[String]) -> Result<InstallOutcome> {
            Err(Error::message("not used"))
        }

        fn installed_versions(&self, names: &[String]) -> Result<Vec<PackageInfo>> {
            Ok(self
                .installed
                .iter()
                .filter(|n| names.contains(*n))
                .map(|n| PackageInfo {
                    name: n.clone(),
                    version: "1.0".into(),
                    extra: Default::default(),
                })
                .collect())
        }
    }

    #[test]
    fn test_read_properties_resolves_path() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_plugin(tmp.path(), "dropgen", "droplab.dropgen");
        let props = read_properties(&dir).unwrap();
        assert_eq!(props.package_name, "droplab.dropgen");
        assert_eq!(props.plugin_name, "dropgen");
        assert!(props.path.ends_with("dropgen"));
    }

    #[test]
    fn test_list_available_skips_unreadable_and_concatenates_roots() {
        let tmp = tempfile::tempdir().unwrap();
        let user = tmp.path().join("user");
        let shared = tmp.path().join("shared");
        write_plugin(&user, "alpha", "droplab.alpha");
        write_plugin(&shared, "beta", "droplab.beta");
        // Directory without properties.yml is skipped, not fatal.
        std::fs::create_dir_all(shared.join("broken")).unwrap();

        let plugins = list_available(&[user, shared], &FsLinkOps);
        let names: Vec<&str> = plugins.iter().map(|p| p.package_name.as_str()).collect();
        assert_eq!(names, ["droplab.alpha", "droplab.beta"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_list_available_excludes_links() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("available");
        let real = write_plugin(&root, "real", "droplab.real");
        std::os::unix::fs::symlink(&real, root.join("linked")).unwrap();

        let plugins = list_available(&[root], &FsLinkOps);
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].plugin_name, "real");
    }

    #[cfg(unix)]
    #[test]
    fn test_list_enabled_unfiltered_includes_dirs_and_links() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        let available = layout.shared_available_dir();
        let enabled = layout.enabled_dir();
        std::fs::create_dir_all(&enabled).unwrap();

        let target = write_plugin(&available, "linked", "droplab.linked");
        std::os::unix::fs::symlink(&target, enabled.join("linked")).unwrap();
        write_plugin(&enabled, "devmode", "droplab.devmode");

        let client = ListClient { installed: vec![] };
        let plugins = list_enabled(&layout, &FsLinkOps, &client, false).unwrap();
        let mut names: Vec<&str> = plugins.iter().map(|p| p.package_name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, ["droplab.devmode", "droplab.linked"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_list_enabled_filtered_cross_references_conda() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        let available = layout.shared_available_dir();
        let enabled = layout.enabled_dir();
        std::fs::create_dir_all(&enabled).unwrap();

        for name in ["known", "stale"] {
            let target = write_plugin(&available, name, &format!("droplab.{name}"));
            std::os::unix::fs::symlink(&target, enabled.join(name)).unwrap();
        }
        // Real dir under enabled/ is excluded when filtering.
        write_plugin(&enabled, "devmode", "droplab.devmode");

        let client = ListClient {
            installed: vec!["droplab.known".into()],
        };
        let plugins = list_enabled(&layout, &FsLinkOps, &client, true).unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].package_name, "droplab.known");
    }

    #[test]
    fn test_list_enabled_missing_dir_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        let client = ListClient { installed: vec![] };
        assert!(
            list_enabled(&layout, &FsLinkOps, &client, true)
                .unwrap()
                .is_empty()
        );
    }
}
