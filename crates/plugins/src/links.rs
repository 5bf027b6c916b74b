//! Platform link operations behind a single capability trait.
//!
//! Enablement is marked by a directory symlink on unix and a directory
//! symlink/junction on Windows. The rest of the crate never branches on
//! platform; it talks to [`LinkOps`].

use std::path::Path;

use crate::error::Result;

/// Link inspection and mutation for the enabled-plugins directory.
pub trait LinkOps: Send + Sync {
    /// `true` iff `path` is a symlink (or junction on Windows).
    ///
    /// Never errors: a nonexistent path is simply not a link.
    fn is_link(&self, path: &Path) -> bool;

    /// Create a directory link at `at` pointing to `target`.
    fn create_link(&self, target: &Path, at: &Path) -> Result<()>;

    /// Remove the link entry at `at`.
    fn remove_link(&self, at: &Path) -> Result<()>;
}

/// Real-filesystem [`LinkOps`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FsLinkOps;

impl LinkOps for FsLinkOps {
    fn is_link(&self, path: &Path) -> bool {
        // symlink_metadata does not follow the link, and on Windows it
        // reports junction reparse points as symlinks too.
        std::fs::symlink_metadata(path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }

    #[cfg(unix)]
    fn create_link(&self, target: &Path, at: &Path) -> Result<()> {
        std::os::unix::fs::symlink(target, at)?;
        Ok(())
    }

    #[cfg(windows)]
    fn create_link(&self, target: &Path, at: &Path) -> Result<()> {
        std::os::windows::fs::symlink_dir(target, at)?;
        Ok(())
    }

    fn remove_link(&self, at: &Path) -> Result<()> {
        // A symlink is a file-like directory entry on unix; on Windows a
        // directory link must be removed as a directory.
        #[cfg(unix)]
        std::fs::remove_file(at)?;
        #[cfg(windows)]
        std::fs::remove_dir(at)?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonexistent_path_is_not_a_link() {
        assert!(!FsLinkOps.is_link(Path::new("/nonexistent/path/xyz")));
    }

    #[test]
    fn test_real_dir_is_not_a_link() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!FsLinkOps.is_link(tmp.path()));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("plugin");
        let link = tmp.path().join("enabled-plugin");
        std::fs::create_dir(&target).unwrap();

        FsLinkOps.create_link(&target, &link).unwrap();
        assert!(FsLinkOps.is_link(&link));
        assert!(!FsLinkOps.is_link(&target));

        FsLinkOps.remove_link(&link).unwrap();
        assert!(!link.exists());
        // Removing the link leaves the target alone.
        assert!(target.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_symlink_is_still_a_link() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("gone");
        let link = tmp.path().join("dangling");
        std::fs::create_dir(&target).unwrap();
        FsLinkOps.create_link(&target, &link).unwrap();
        std::fs::remove_dir(&target).unwrap();

        assert!(FsLinkOps.is_link(&link));
    }
}
