//! Local baseline (known database) storage.
//!
//! A fresh database is fetched into a staging file next to the baseline and
//! only renamed over it once the fetch has fully succeeded, so a failed or
//! interrupted fetch never leaves a half-written baseline behind.

use base64::Engine;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum BaselineError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Fetched database is empty; keeping previous baseline {}", .0.display())]
    EmptyDatabase(PathBuf),
}

fn io_error(e: std::io::Error, path: &Path) -> BaselineError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        BaselineError::PermissionDenied(path.to_path_buf())
    } else {
        BaselineError::Io(e)
    }
}

/// SHA-256 of a database file, base64 encoded.
pub fn fingerprint(path: &Path) -> Result<String, BaselineError> {
    let mut file = File::open(path).map_err(|e| io_error(e, path))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(BaselineError::Io)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    let fingerprint = base64::engine::general_purpose::STANDARD.encode(hasher.finalize());
    debug!("Fingerprint of {} is {}", path.display(), fingerprint);
    Ok(fingerprint)
}

/// A staging file for a database being fetched. Removed on drop unless installed.
pub struct StagedBaseline {
    path: TempPath,
}

impl StagedBaseline {
    /// Creates an empty staging file in the same directory as `baseline`.
    pub fn new_for(baseline: &Path) -> Result<Self, BaselineError> {
        let parent = baseline.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| io_error(e, parent))?;

        let prefix = format!(
            ".{}.",
            baseline
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        );

        let temp_file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".partial")
            .tempfile_in(parent)
            .map_err(|e| io_error(e, parent))?;

        Ok(StagedBaseline {
            path: temp_file.into_temp_path(),
        })
    }

    /// Where the fetched database should be written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replaces `baseline` with the staged database.
    ///
    /// Returns the fingerprint of the installed baseline.
    pub fn install(self, baseline: &Path) -> Result<String, BaselineError> {
        let staged: &Path = &self.path;
        let metadata = std::fs::metadata(staged).map_err(|e| io_error(e, staged))?;
        if metadata.len() == 0 {
            return Err(BaselineError::EmptyDatabase(baseline.to_path_buf()));
        }

        File::open(staged)
            .and_then(|f| f.sync_all())
            .map_err(|e| io_error(e, staged))?;

        let fingerprint = fingerprint(staged)?;

        self.path.persist(baseline).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::PermissionDenied {
                BaselineError::PermissionDenied(baseline.to_path_buf())
            } else {
                BaselineError::Io(e.error)
            }
        })?;

        Ok(fingerprint)
    }
}
