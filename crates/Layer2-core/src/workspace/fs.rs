//! Confined filesystem - every path stays under the workspace root
//!
//! 모든 작업은 작업 공간 상대 경로를 받는다. 검증에 실패하면
//! `Error::Security`를 돌려주고 아무것도 변경하지 않는다.

use super::path::{normalize_relative, PathViolation};
use agentbox_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// File or directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

/// Immediate child returned by `list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntryInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
}

/// Path-confined file operations rooted at one workspace directory
#[derive(Debug, Clone)]
pub struct ConfinedFilesystem {
    root: PathBuf,
}

fn map_io(err: std::io::Error, relative: &str) -> Error {
    if err.kind() == IoErrorKind::NotFound {
        Error::NotFound(format!("File not found: {}", relative))
    } else {
        Error::Io(err)
    }
}

impl ConfinedFilesystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if missing
    pub async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Lexical resolution only (no filesystem access)
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let normalized = normalize_relative(relative)?;
        Ok(self.root.join(normalized))
    }

    /// Lexical resolution plus symlink containment check
    async fn resolve_checked(&self, relative: &str) -> Result<PathBuf> {
        let candidate = self.resolve(relative)?;
        let canonical_root = fs::canonicalize(&self.root)
            .await
            .map_err(|e| map_io(e, "workspace root"))?;

        for ancestor in candidate.ancestors() {
            // symlink_metadata: 끊어진 링크도 "존재"로 취급해야 따라가서 쓰는 일을 막는다
            if fs::symlink_metadata(ancestor).await.is_err() {
                continue;
            }
            let real = fs::canonicalize(ancestor).await.map_err(|_| {
                Error::from(PathViolation::SymlinkEscape {
                    path: relative.to_string(),
                    target: ancestor.to_path_buf(),
                })
            })?;
            if !real.starts_with(&canonical_root) {
                return Err(PathViolation::SymlinkEscape {
                    path: relative.to_string(),
                    target: real,
                }
                .into());
            }
            break;
        }
        Ok(candidate)
    }

    fn require_non_root(&self, path: &Path, relative: &str, action: &str) -> Result<()> {
        if path == self.root {
            return Err(Error::Security(format!(
                "Cannot {} the workspace root ('{}')",
                action, relative
            )));
        }
        Ok(())
    }

    /// Write `content`, creating parent directories. Overwrites atomically.
    pub async fn write(&self, relative: &str, content: impl AsRef<[u8]>) -> Result<()> {
        self.ensure_root().await?;
        let path = self.resolve_checked(relative).await?;
        self.require_non_root(&path, relative, "write to")?;

        let parent = path
            .parent()
            .ok_or_else(|| Error::Internal(format!("No parent for {}", relative)))?;
        fs::create_dir_all(parent).await?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));
        if let Err(e) = fs::write(&tmp, content.as_ref()).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!("Wrote {}", path.display());
        Ok(())
    }

    /// Same as `write`
    pub async fn create(&self, relative: &str, content: impl AsRef<[u8]>) -> Result<()> {
        self.write(relative, content).await
    }

    pub async fn read(&self, relative: &str) -> Result<String> {
        let path = self.resolve_checked(relative).await?;
        fs::read_to_string(&path)
            .await
            .map_err(|e| map_io(e, relative))
    }

    /// Delete a file or a directory tree. Symlinks are removed, not followed.
    pub async fn delete(&self, relative: &str) -> Result<()> {
        let path = self.resolve_checked(relative).await?;
        self.require_non_root(&path, relative, "delete")?;

        let meta = fs::symlink_metadata(&path)
            .await
            .map_err(|e| map_io(e, relative))?;
        if meta.is_dir() {
            fs::remove_dir_all(&path).await?;
        } else {
            fs::remove_file(&path).await?;
        }
        debug!("Deleted {}", path.display());
        Ok(())
    }

    /// Move `from` to `to`; both are checked independently
    pub async fn move_path(&self, from: &str, to: &str) -> Result<()> {
        let source = self.resolve_checked(from).await?;
        let destination = self.resolve_checked(to).await?;
        self.require_non_root(&source, from, "move")?;
        self.require_non_root(&destination, to, "replace")?;

        fs::symlink_metadata(&source)
            .await
            .map_err(|e| map_io(e, from))?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&source, &destination).await?;
        Ok(())
    }

    /// Immediate children, sorted by name
    pub async fn list(&self, relative: &str) -> Result<Vec<DirEntryInfo>> {
        let path = self.resolve_checked(relative).await?;
        let mut dir = fs::read_dir(&path)
            .await
            .map_err(|e| map_io(e, relative))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let kind = if entry.file_type().await?.is_dir() {
                FileKind::Directory
            } else {
                FileKind::File
            };
            entries.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    pub async fn exists(&self, relative: &str) -> Result<bool> {
        let path = self.resolve_checked(relative).await?;
        Ok(fs::symlink_metadata(&path).await.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, ConfinedFilesystem) {
        let dir = tempfile::tempdir().unwrap();
        let fs = ConfinedFilesystem::new(dir.path().join("ws"));
        (dir, fs)
    }

    fn snapshot(root: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .collect();
        paths.sort();
        paths
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let (_dir, fs) = setup();
        fs.write("src/app/page.tsx", "X").await.unwrap();
        assert_eq!(fs.read("src/app/page.tsx").await.unwrap(), "X");

        fs.write("src/app/page.tsx", "Y").await.unwrap();
        assert_eq!(fs.read("src/app/page.tsx").await.unwrap(), "Y");
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let (_dir, fs) = setup();
        fs.ensure_root().await.unwrap();
        assert!(matches!(fs.read("nope.txt").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_traversal_is_rejected_without_mutation() {
        let (dir, fs) = setup();
        fs.write("keep.txt", "k").await.unwrap();
        let before = snapshot(dir.path());

        for bad in ["../../etc/passwd", "../escape.txt", "/tmp/abs.txt", "a/../../b", "C:\\x"] {
            assert!(matches!(fs.write(bad, "x").await, Err(Error::Security(_))), "{}", bad);
            assert!(matches!(fs.read(bad).await, Err(Error::Security(_))));
            assert!(matches!(fs.delete(bad).await, Err(Error::Security(_))));
            assert!(matches!(fs.list(bad).await, Err(Error::Security(_))));
            assert!(matches!(fs.move_path("keep.txt", bad).await, Err(Error::Security(_))));
            assert!(matches!(fs.move_path(bad, "keep2.txt").await, Err(Error::Security(_))));
        }

        assert_eq!(snapshot(dir.path()), before);
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_is_rejected() {
        let (dir, fs) = setup();
        fs.ensure_root().await.unwrap();
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, fs.root().join("link")).unwrap();
        std::os::unix::fs::symlink(outside.join("ghost.txt"), fs.root().join("dangling")).unwrap();

        assert!(matches!(fs.write("link/pwn.txt", "x").await, Err(Error::Security(_))));
        assert!(matches!(fs.write("dangling", "x").await, Err(Error::Security(_))));
        assert!(!outside.join("pwn.txt").exists());
        assert!(!outside.join("ghost.txt").exists());
    }

    #[tokio::test]
    async fn test_delete_file_and_directory() {
        let (_dir, fs) = setup();
        fs.write("a/b/c.txt", "1").await.unwrap();
        fs.write("d.txt", "2").await.unwrap();

        fs.delete("d.txt").await.unwrap();
        fs.delete("a").await.unwrap();
        assert!(!fs.exists("a/b/c.txt").await.unwrap());
        assert!(matches!(fs.delete("a").await, Err(Error::NotFound(_))));
        assert!(matches!(fs.delete("").await, Err(Error::Security(_))));
    }

    #[tokio::test]
    async fn test_move_creates_destination_parent() {
        let (_dir, fs) = setup();
        fs.write("old.txt", "payload").await.unwrap();
        fs.move_path("old.txt", "nested/new.txt").await.unwrap();

        assert!(!fs.exists("old.txt").await.unwrap());
        assert_eq!(fs.read("nested/new.txt").await.unwrap(), "payload");
    }

    #[tokio::test]
    async fn test_list_children_with_kind() {
        let (_dir, fs) = setup();
        fs.write("b.txt", "").await.unwrap();
        fs.write("a/inner.txt", "").await.unwrap();

        let entries = fs.list("").await.unwrap();
        assert_eq!(
            entries,
            vec![
                DirEntryInfo { name: "a".into(), kind: FileKind::Directory },
                DirEntryInfo { name: "b.txt".into(), kind: FileKind::File },
            ]
        );
    }
}
