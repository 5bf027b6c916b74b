//! Install/rollback orchestration over the conda port.
//!
//! [`PluginManager`] is the public surface consumed by the CLI: it wires
//! the directory layout, the link operations, the conda client, and the
//! action log together. Every call blocks until the underlying conda
//! process exits.

use std::{collections::BTreeMap, path::PathBuf};

use {
    serde_json::Value,
    tracing::{debug, warn},
};

use droplab_config::Layout;

use crate::{
    actions::ActionLog,
    conda::{self, CondaCli, PackageManagerClient, channel_args},
    enablement,
    error::{Error, Result},
    links::{FsLinkOps, LinkOps},
    registry::{self, PluginProperties},
};

pub struct PluginManager {
    layout: Layout,
    links: Box<dyn LinkOps>,
    client: Box<dyn PackageManagerClient>,
    actions: ActionLog,
}

impl PluginManager {
    /// Production wiring: real filesystem links, real `conda` binary.
    pub fn new(layout: Layout) -> Self {
        Self::with_parts(layout, Box::new(FsLinkOps), Box::new(CondaCli::default()))
    }

    /// Explicit wiring, used by tests to substitute fakes.
    pub fn with_parts(
        layout: Layout,
        links: Box<dyn LinkOps>,
        client: Box<dyn PackageManagerClient>,
    ) -> Self {
        let actions = ActionLog::new(layout.actions_dir());
        Self {
            layout,
            links,
            client,
            actions,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Query the configured channels for all DropLab plugin packages.
    ///
    /// Query failures are logged and reported as an empty map; an offline
    /// machine can still manage what it has installed.
    pub fn available_packages(&self) -> Value {
        let pattern = format!("^{}", conda::PACKAGE_PREFIX.replace('.', "\\."));
        match self.client.search(&pattern) {
            Ok(value) => value,
            Err(e) => {
                if conda::is_connectivity_error(&e.to_string()) {
                    warn!("could not connect to package server");
                } else {
                    warn!(%e, "error querying available plugin packages");
                }
                Value::Object(Default::default())
            },
        }
    }

    /// Install plugin packages (version specs allowed, e.g.
    /// `droplab.dropgen >=1.0.5`), recording an action-log entry when the
    /// environment was actually mutated.
    ///
    /// Returns the parsed conda install log unconditionally, including
    /// when the environment was already up to date.
    pub fn install(
        &self,
        specs: &[String],
        channels: Option<&[String]>,
        extra_args: &[String],
    ) -> Result<Value> {
        let channel_args = channel_args(channels);
        let outcome = self.client.install(specs, &channel_args, extra_args)?;
        if mutated_environment(&outcome.log) {
            self.actions
                .record(self.client.as_ref(), outcome.conda_args, outcome.log.clone())?;
            debug!(?specs, "installed plugin packages");
        }
        Ok(outcome.log)
    }

    /// Uninstall plugin packages.
    ///
    /// Every package must have a real directory under the conda-managed
    /// available root, named either after the package or after its module
    /// form (suffix after the last `.`, `-` mapped to `_`). Validation
    /// happens before conda is invoked; afterwards any orphaned enabled
    /// links are purged.
    pub fn uninstall(&self, names: &[String], extra_args: &[String]) -> Result<Value> {
        let available = self.layout.shared_available_dir();
        for name in names {
            let candidates = [available.join(name), available.join(module_name(name))];
            let found = candidates
                .iter()
                .any(|c| !self.links.is_link(c) && c.is_dir());
            if !found {
                return Err(Error::plugin_not_found(name, vec![available]));
            }
        }

        let outcome = self.client.uninstall(names, extra_args)?;
        // Uninstalling may have orphaned enabled links.
        self.purge_broken_links();
        debug!(?names, "uninstalled plugin packages");
        Ok(outcome.log)
    }

    /// Update installed plugins, or the named subset.
    ///
    /// Only real plugin directories under the conda-managed root are
    /// considered, so a plugin linked in during development is never
    /// overwritten. An empty resolved set returns an empty log without
    /// touching conda.
    pub fn update(
        &self,
        package_names: Option<&[String]>,
        channels: Option<&[String]>,
        extra_args: &[String],
    ) -> Result<Value> {
        let resolved: Vec<String> = match package_names {
            Some(names) if !names.is_empty() => names.to_vec(),
            _ => self
                .installed_plugins()
                .iter()
                .map(|p| p.package_name.clone())
                .collect(),
        };
        if resolved.is_empty() {
            debug!("no installed plugins to update");
            return Ok(Value::Object(Default::default()));
        }

        debug!(packages = ?resolved, "checking for plugin updates");
        match self.install(&resolved, channels, extra_args) {
            Ok(log) => Ok(log),
            Err(Error::PackageManager { message }) if conda::is_connectivity_error(&message) => {
                Err(Error::UpdateServerUnreachable { message })
            },
            Err(e) => Err(e),
        }
    }

    /// Roll the environment back to the revision preceding the most
    /// recently logged action.
    ///
    /// With an empty action log there is nothing to undo; the current
    /// latest revision is returned with no install log.
    pub fn rollback(
        &self,
        channels: Option<&[String]>,
        extra_args: &[String],
    ) -> Result<(i64, Option<Value>)> {
        let Some(entry) = self.actions.latest()? else {
            debug!("no rollback actions recorded");
            let revisions = self.client.list_revisions()?;
            let current = revisions
                .last()
                .map(|r| r.rev)
                .ok_or_else(|| Error::environment_query("revision history is empty"))?;
            return Ok((current, None));
        };

        // The last recorded revision is the logged mutation itself; the
        // one before it is the rollback target.
        let target = entry
            .revisions
            .iter()
            .rev()
            .nth(1)
            .ok_or_else(|| {
                Error::package_manager("logged action has no prior revision to roll back to")
            })?
            .rev;
        let channel_args = channel_args(channels);
        let outcome = self
            .client
            .install_revision(target, &channel_args, extra_args)?;
        debug!(revision = target, "rolled back environment");
        Ok((target, Some(outcome.log)))
    }

    /// Enable plugins; `true` per name iff newly linked.
    pub fn enable(&self, names: &[String]) -> Result<BTreeMap<String, bool>> {
        enablement::enable(&self.layout, self.links.as_ref(), names)
    }

    /// Disable plugins.
    pub fn disable(&self, names: &[String]) -> Result<()> {
        enablement::disable(&self.layout, self.links.as_ref(), names)
    }

    /// Remove enabled links whose targets are gone.
    pub fn purge_broken_links(&self) -> Vec<PathBuf> {
        enablement::purge_broken_links(&self.layout, self.links.as_ref())
    }

    /// Installed plugins: real directories under the conda-managed
    /// available root.
    pub fn installed_plugins(&self) -> Vec<PluginProperties> {
        registry::list_available(
            &[self.layout.shared_available_dir()],
            self.links.as_ref(),
        )
    }

    /// Installed plugins across every available root (user-managed first).
    pub fn all_available_plugins(&self) -> Vec<PluginProperties> {
        registry::list_available(&self.layout.available_roots(), self.links.as_ref())
    }

    /// Enabled plugins; see [`registry::list_enabled`] for the
    /// `filter_installed` semantics.
    pub fn enabled_plugins(&self, filter_installed: bool) -> Result<Vec<PluginProperties>> {
        registry::list_enabled(
            &self.layout,
            self.links.as_ref(),
            self.client.as_ref(),
            filter_installed,
        )
    }
}

/// A log with an `actions` key describes a real mutation, unless it was a
/// dry run.
fn mutated_environment(log: &Value) -> bool {
    log.get("actions").is_some() && !log.get("dry_run").and_then(Value::as_bool).unwrap_or(false)
}

/// Module form of a package name: `droplab.mr-box-plugin` →
/// `mr_box_plugin`.
fn module_name(package_name: &str) -> String {
    package_name
        .rsplit('.')
        .next()
        .unwrap_or(package_name)
        .replace('-', "_")
}
