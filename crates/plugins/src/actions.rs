//! Action log: one immutable entry per successful mutating conda call.
//!
//! Entries snapshot the environment's full revision history plus the
//! arguments and install log of the mutation, written to
//! `etc/droplab/actions/rev<N>.json.gz` where `N` is the newest revision
//! at write time. Rollback reads the entry with the highest `N`.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use {
    flate2::{Compression, read::GzDecoder, write::GzEncoder},
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::debug,
};

use crate::{
    conda::{PackageManagerClient, Revision},
    error::{Error, Result},
};

/// Persisted record of one mutating package-manager call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEntry {
    pub conda_args: Vec<String>,
    pub install_log: Value,
    pub revisions: Vec<Revision>,
}

/// Append-only action log directory.
pub struct ActionLog {
    dir: PathBuf,
}

impl ActionLog {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record an action: fetch the environment's revision history and
    /// persist it with the mutation context.
    ///
    /// Revision numbers are monotonic, so each successful mutation gets a
    /// fresh file; nothing is ever overwritten. A failed history fetch is
    /// an [`Error::EnvironmentQuery`] — the caller's install may already
    /// have succeeded, but losing rollback capability silently is worse.
    pub fn record(
        &self,
        client: &dyn PackageManagerClient,
        conda_args: Vec<String>,
        install_log: Value,
    ) -> Result<(PathBuf, ActionEntry)> {
        let revisions = client
            .list_revisions()
            .map_err(|e| Error::environment_query(e.to_string()))?;
        let last_rev = revisions
            .last()
            .ok_or_else(|| Error::environment_query("revision history is empty"))?
            .rev;

        let entry = ActionEntry {
            conda_args,
            install_log,
            revisions,
        };
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("rev{last_rev}.json.gz"));
        let file = std::fs::File::create(&path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        serde_json::to_writer_pretty(&mut encoder, &entry)?;
        encoder.finish()?.flush()?;
        debug!(path = %path.display(), rev = last_rev, "recorded action");
        Ok((path, entry))
    }

    /// Load the entry with the highest revision number.
    ///
    /// `Ok(None)` means no action has ever been recorded (missing or empty
    /// directory) — callers treat that as "nothing to roll back", not an
    /// error.
    pub fn latest(&self) -> Result<Option<ActionEntry>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut newest: Option<(i64, PathBuf)> = None;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(rev) = parse_rev_file_name(&name.to_string_lossy()) else {
                continue;
            };
            if newest.as_ref().is_none_or(|(max, _)| rev > *max) {
                newest = Some((rev, entry.path()));
            }
        }

        let Some((rev, path)) = newest else {
            return Ok(None);
        };
        debug!(path = %path.display(), rev, "loading latest action");
        Ok(Some(read_entry(&path)?))
    }
}

/// Parse `rev<N>.json` / `rev<N>.json.gz` filenames; anything else is
/// ignored.
fn parse_rev_file_name(name: &str) -> Option<i64> {
    let rest = name.strip_prefix("rev")?;
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    let rev: i64 = rest[..digits_end].parse().ok()?;
    match &rest[digits_end..] {
        ".json" | ".json.gz" => Some(rev),
        _ => None,
    }
}

/// Deserialize an entry, decompressing when the extension says so.
fn read_entry(path: &Path) -> Result<ActionEntry> {
    let file = std::fs::File::open(path)?;
    let entry = if path.extension().is_some_and(|e| e == "gz") {
        serde_json::from_reader(GzDecoder::new(file))?
    } else {
        serde_json::from_reader(file)?
    };
    Ok(entry)
}
