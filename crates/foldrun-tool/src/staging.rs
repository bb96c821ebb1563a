//! Staging documents into the tool's upload area.

use std::fs;
use std::path::{Path, PathBuf};

use foldrun_core::fsutil::remove_path;
use foldrun_core::{copy_tree, Result};
use tracing::{debug, warn};

/// Remove everything inside `upload_dir`. Removal failures are logged and
/// otherwise ignored; a missing directory is created.
pub fn clear_upload_area(upload_dir: &Path) -> Result<()> {
    if !upload_dir.exists() {
        fs::create_dir_all(upload_dir)?;
        return Ok(());
    }

    let entries = match fs::read_dir(upload_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %upload_dir.display(), error = %e, "Could not list upload area");
            return Ok(());
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if let Err(e) = remove_path(&path) {
            warn!(path = %path.display(), error = %e, "Could not remove staged entry");
        }
    }
    Ok(())
}

/// Summary of one staging pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedSet {
    /// Label directories created in the upload area.
    pub labels: Vec<PathBuf>,
    pub files: usize,
}

/// Clear the upload area, then copy every class folder into
/// `upload_dir/<folder name>`. Folders sharing a label name merge.
pub fn stage(folders: &[PathBuf], upload_dir: &Path) -> Result<StagedSet> {
    clear_upload_area(upload_dir)?;

    let mut staged = StagedSet::default();
    for folder in folders {
        let Some(label) = folder.file_name() else {
            continue;
        };
        let target = upload_dir.join(label);
        let copied = copy_tree(folder, &target)?;
        debug!(from = %folder.display(), to = %target.display(), files = copied, "Staged folder");

        if !staged.labels.contains(&target) {
            staged.labels.push(target);
        }
        staged.files += copied;
    }

    Ok(staged)
}
