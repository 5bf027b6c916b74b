//! Enable/disable bookkeeping.
//!
//! A plugin is enabled iff a same-named link exists under
//! `etc/droplab/plugins/enabled/`, pointing at its real directory in one of
//! the available roots. Both operations validate the whole batch before
//! touching anything: a failed batch mutates nothing.

use std::{collections::BTreeMap, path::PathBuf};

use tracing::{debug, warn};

use droplab_config::Layout;

use crate::{
    error::{Error, Result},
    links::LinkOps,
};

/// Enable plugins by name.
///
/// Each name is searched across the available roots in priority order
/// (user-managed before conda-managed); the first real, non-link directory
/// wins. Returns `true` per name iff the link was created by this call;
/// an existing entry of the same name means already-enabled, not an error.
pub fn enable(
    layout: &Layout,
    links: &dyn LinkOps,
    names: &[String],
) -> Result<BTreeMap<String, bool>> {
    let validated = validate_available(layout, links, names)?;

    let enabled_dir = layout.enabled_dir();
    std::fs::create_dir_all(&enabled_dir)?;

    let mut enabled_now = BTreeMap::new();
    for (name, source) in validated {
        let link = enabled_dir.join(&name);
        if std::fs::symlink_metadata(&link).is_ok() {
            debug!(%name, "plugin already enabled");
            enabled_now.insert(name, false);
        } else {
            links.create_link(&source, &link)?;
            debug!(%name, source = %source.display(), "enabled plugin");
            enabled_now.insert(name, true);
        }
    }
    Ok(enabled_now)
}

/// Disable plugins by name, removing their enabled-directory entries.
///
/// Fails with [`Error::PluginNotFound`] before any removal if any name has
/// no entry (link or real dir) under `enabled/`.
pub fn disable(layout: &Layout, links: &dyn LinkOps, names: &[String]) -> Result<()> {
    let enabled_dir = layout.enabled_dir();

    // Validate all, then act.
    for name in names {
        let entry = enabled_dir.join(name);
        if !links.is_link(&entry) && !entry.is_dir() {
            return Err(Error::plugin_not_found(name, vec![enabled_dir]));
        }
    }

    for name in names {
        let entry = enabled_dir.join(name);
        if links.is_link(&entry) {
            links.remove_link(&entry)?;
        } else {
            // Dev-mode convention: a real directory placed directly under
            // enabled/.
            std::fs::remove_dir_all(&entry)?;
        }
        debug!(%name, "disabled plugin");
    }
    Ok(())
}

/// Remove enabled-directory links whose target no longer exists.
///
/// Uninstalling a package deletes its available directory and can orphan
/// its link. Removal failures are swallowed per entry so one stuck file
/// does not block the rest; only successfully removed paths are returned.
pub fn purge_broken_links(layout: &Layout, links: &dyn LinkOps) -> Vec<PathBuf> {
    let enabled_dir = layout.enabled_dir();
    let Ok(entries) = std::fs::read_dir(&enabled_dir) else {
        return Vec::new();
    };

    let mut removed = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        // exists() follows the link; a link whose target is gone reports
        // false.
        if !links.is_link(&path) || path.exists() {
            continue;
        }
        match links.remove_link(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed broken link");
                removed.push(path);
            },
            Err(e) => {
                warn!(path = %path.display(), %e, "failed to remove broken link");
            },
        }
    }
    removed
}

/// Resolve each name to its available directory, or fail for the whole
/// batch naming every searched root.
fn validate_available(
    layout: &Layout,
    links: &dyn LinkOps,
    names: &[String],
) -> Result<Vec<(String, PathBuf)>> {
    let roots = layout.available_roots();
    let mut validated = Vec::with_capacity(names.len());
    for name in names {
        let found = roots
            .iter()
            .map(|root| root.join(name))
            .find(|candidate| !links.is_link(candidate) && candidate.is_dir());
        match found {
            Some(source) => validated.push((name.clone(), source)),
            None => return Err(Error::plugin_not_found(name, roots)),
        }
    }
    Ok(validated)
}
