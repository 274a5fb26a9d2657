//! Workspace packaging (`<dest>/<name>.tar.gz`)

use agentbox_foundation::{Error, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Archive extension
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

fn storage_err(context: &str, err: impl std::fmt::Display) -> Error {
    Error::Storage(format!("{}: {}", context, err))
}

fn write_archive(root: &Path, tmp: &Path) -> Result<()> {
    let file = File::create(tmp).map_err(|e| storage_err("Failed to create archive", e))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", root)
        .map_err(|e| storage_err("Failed to archive workspace", e))?;
    let encoder = builder
        .into_inner()
        .map_err(|e| storage_err("Failed to finish archive", e))?;
    encoder
        .finish()
        .map_err(|e| storage_err("Failed to compress archive", e))?;
    Ok(())
}

fn package_blocking(root: &Path, dest_dir: &Path, name: &str) -> Result<PathBuf> {
    if !root.is_dir() {
        return Err(Error::NotFound(format!(
            "Workspace not found: {}",
            root.display()
        )));
    }
    fs::create_dir_all(dest_dir).map_err(|e| storage_err("Failed to create downloads dir", e))?;

    // 아카이브가 자기 자신을 포함하면 안 된다
    let canonical_root = fs::canonicalize(root)?;
    let canonical_dest = fs::canonicalize(dest_dir)?;
    if canonical_dest.starts_with(&canonical_root) {
        return Err(Error::Validation(format!(
            "Archive destination {} is inside the workspace",
            dest_dir.display()
        )));
    }

    let target = dest_dir.join(format!("{}.{}", name, ARCHIVE_EXTENSION));
    let tmp = dest_dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()));

    if let Err(e) = write_archive(root, &tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp, &target) {
        let _ = fs::remove_file(&tmp);
        return Err(storage_err("Failed to move archive into place", e));
    }

    info!("Packaged {} -> {}", root.display(), target.display());
    Ok(target)
}

/// Archive `root` into `<dest_dir>/<name>.tar.gz`, replacing any previous archive.
///
/// Entries are stored relative to the workspace (`./app/page.tsx`). Symlinks are
/// stored as links, never followed.
pub async fn package_directory(
    root: impl Into<PathBuf>,
    dest_dir: impl Into<PathBuf>,
    name: &str,
) -> Result<PathBuf> {
    let root = root.into();
    let dest_dir = dest_dir.into();
    let name = name.to_string();
    tokio::task::spawn_blocking(move || package_blocking(&root, &dest_dir, &name))
        .await
        .map_err(|e| Error::Internal(format!("Packaging task failed: {}", e)))?
}
