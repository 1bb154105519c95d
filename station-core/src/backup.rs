use anyhow::Context;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::{Store, error::Result};

pub const BACKUP_FILE_NAME: &str = "backup.db";
pub const BACKUP_MEDIA_TYPE: &str = "application/vnd.sqlite3";

/// A database snapshot on disk. The file is removed when this is dropped.
#[derive(Debug)]
pub struct Backup {
    file: NamedTempFile,
    pub file_name: &'static str,
    pub media_type: &'static str,
}

impl Backup {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Keep the snapshot at `dest` instead of deleting it.
    pub fn persist(self, dest: &Path) -> Result<PathBuf> {
        self.file
            .persist(dest)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to move backup to {}", dest.display()))?;
        Ok(dest.to_path_buf())
    }
}

/// Snapshot the live database into a temporary file under `dir`.
pub fn create_backup(store: &Store, dir: &Path) -> Result<Backup> {
    let prefix = format!("station-{}-", Utc::now().format("%Y%m%dT%H%M%S"));
    let file = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".db")
        .tempfile_in(dir)
        .with_context(|| format!("Failed to create backup file in {}", dir.display()))?;

    store.backup_to(file.path())?;

    Ok(Backup {
        file,
        file_name: BACKUP_FILE_NAME,
        media_type: BACKUP_MEDIA_TYPE,
    })
}
