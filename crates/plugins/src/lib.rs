//! Plugin management for the DropLab suite.
//!
//! Plugins are conda packages (name prefix `droplab.`) whose content
//! lands under the active prefix. This crate wraps the conda CLI for
//! install/uninstall/update/rollback and keeps the enable/disable
//! bookkeeping: a plugin is *available* when its real directory exists
//! under an available root, and *enabled* when a same-named link to it
//! exists under `etc/droplab/plugins/enabled/`. Every successful mutating
//! conda call is archived in an action log so it can be rolled back.

pub mod actions;
pub mod conda;
pub mod enablement;
pub mod error;
pub mod links;
pub mod manager;
pub mod registry;

pub use {
    actions::{ActionEntry, ActionLog},
    conda::{CondaCli, PackageManagerClient, channel_args},
    error::{Error, Result},
    links::{FsLinkOps, LinkOps},
    manager::PluginManager,
    registry::PluginProperties,
};
