//! Directory layout for the DropLab plugin manager.
//!
//! Everything lives under the active conda prefix:
//!
//! ```text
//! etc/droplab/plugins/enabled/<name>        link marking a plugin enabled
//! etc/droplab/plugins/available/<name>/     user-managed plugin dir
//! etc/droplab/actions/rev<N>.json[.gz]      action log
//! share/droplab/plugins/available/<name>/   conda-managed plugin dir
//! ```
//!
//! The prefix is resolved once (`DROPLAB_PREFIX` override, else
//! `CONDA_PREFIX`) and carried as a [`Layout`] value; nothing downstream
//! reads the environment again.

use std::path::{Path, PathBuf};

/// Application directory name under `etc/` and `share/`.
pub const APP_DIR: &str = "droplab";

/// Environment variable overriding the conda prefix.
pub const PREFIX_ENV: &str = "DROPLAB_PREFIX";

/// Directory layout rooted at a conda prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    prefix: PathBuf,
}

impl Layout {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Resolve the layout from the environment.
    ///
    /// `DROPLAB_PREFIX` wins over `CONDA_PREFIX`; errors when neither is
    /// set, since there is no meaningful fallback outside a conda
    /// environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let prefix = std::env::var_os(PREFIX_ENV)
            .or_else(|| std::env::var_os("CONDA_PREFIX"))
            .ok_or_else(|| {
                anyhow::anyhow!("neither {PREFIX_ENV} nor CONDA_PREFIX is set; activate a conda environment or pass --prefix")
            })?;
        tracing::debug!(prefix = %Path::new(&prefix).display(), "resolved conda prefix");
        Ok(Self::new(PathBuf::from(prefix)))
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// `<prefix>/etc/droplab`.
    pub fn etc_dir(&self) -> PathBuf {
        self.prefix.join("etc").join(APP_DIR)
    }

    /// `<prefix>/share/droplab`.
    pub fn share_dir(&self) -> PathBuf {
        self.prefix.join("share").join(APP_DIR)
    }

    /// Action log directory: `<prefix>/etc/droplab/actions`.
    pub fn actions_dir(&self) -> PathBuf {
        self.etc_dir().join("actions")
    }

    /// Enabled-links directory: `<prefix>/etc/droplab/plugins/enabled`.
    pub fn enabled_dir(&self) -> PathBuf {
        self.etc_dir().join("plugins").join("enabled")
    }

    /// User-managed available dir: `<prefix>/etc/droplab/plugins/available`.
    pub fn user_available_dir(&self) -> PathBuf {
        self.etc_dir().join("plugins").join("available")
    }

    /// Conda-managed available dir: `<prefix>/share/droplab/plugins/available`.
    pub fn shared_available_dir(&self) -> PathBuf {
        self.share_dir().join("plugins").join("available")
    }

    /// Available roots in enable-search priority order: user-managed
    /// plugins shadow conda-managed ones of the same name.
    pub fn available_roots(&self) -> Vec<PathBuf> {
        vec![self.user_available_dir(), self.shared_available_dir()]
    }
}
