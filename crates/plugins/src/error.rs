use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// A requested plugin is absent from every searched location.
    #[error("plugin `{name}` not found in {}", fmt_paths(searched))]
    PluginNotFound { name: String, searched: Vec<PathBuf> },

    /// conda exited with failure or produced unparseable output.
    #[error("package manager error: {message}")]
    PackageManager { message: String },

    /// conda reported an HTTP/connectivity failure while updating.
    #[error("could not reach update server: {message}")]
    UpdateServerUnreachable { message: String },

    /// The revision history needed for an action-log entry could not be
    /// fetched. The enclosing install may already have succeeded; failing
    /// loudly beats silently losing rollback capability.
    #[error("failed to query environment revisions: {message}")]
    EnvironmentQuery { message: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn plugin_not_found(name: impl Into<String>, searched: Vec<PathBuf>) -> Self {
        Self::PluginNotFound {
            name: name.into(),
            searched,
        }
    }

    #[must_use]
    pub fn package_manager(message: impl Into<String>) -> Self {
        Self::PackageManager {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn environment_query(message: impl Into<String>) -> Self {
        Self::EnvironmentQuery {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

fn fmt_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| format!("`{}`", p.display()))
        .collect::<Vec<_>>()
        .join(" or ")
}

pub type Result<T> = std::result::Result<T, Error>;
