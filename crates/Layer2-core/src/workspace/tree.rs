//! Workspace file tree snapshot

use agentbox_foundation::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use super::fs::FileKind;
use super::path::relative_display;

/// 트리에서 제외하는 디렉토리
const SKIPPED_DIRS: &[&str] = &["node_modules", "__pycache__", "bower_components"];

/// One node of the file tree. `children` is set for directories only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub name: String,
    /// 작업 공간 상대 경로 (`/` 구분)
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
}

impl FileNode {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Depth-first iterator over this node and its descendants
    pub fn walk(&self) -> Vec<&FileNode> {
        let mut out = vec![self];
        if let Some(children) = &self.children {
            for child in children {
                out.extend(child.walk());
            }
        }
        out
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref())
}

fn order_entries(a: &DirEntry, b: &DirEntry) -> Ordering {
    let a_dir = a.file_type().is_dir();
    let b_dir = b.file_type().is_dir();
    b_dir
        .cmp(&a_dir)
        .then_with(|| a.file_name().cmp(b.file_name()))
}

fn node_for(root: &Path, entry: &DirEntry) -> FileNode {
    let meta = entry.metadata().ok();
    let is_dir = entry.file_type().is_dir();
    FileNode {
        name: entry.file_name().to_string_lossy().into_owned(),
        path: relative_display(root, entry.path()),
        kind: if is_dir { FileKind::Directory } else { FileKind::File },
        size: if is_dir { None } else { meta.as_ref().map(|m| m.len()) },
        last_modified: meta
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from),
        children: if is_dir { Some(Vec::new()) } else { None },
    }
}

/// Build the tree under `root` (blocking). Directories first, then by name.
///
/// Dotfiles and dependency caches are skipped. Symlinks are listed but not followed.
pub fn build_file_tree(root: &Path) -> Result<Vec<FileNode>> {
    if !root.is_dir() {
        return Err(Error::NotFound(format!(
            "Workspace not found: {}",
            root.display()
        )));
    }

    // stack[i] = 깊이 i+1 디렉토리에서 아직 닫히지 않은 노드
    let mut top: Vec<FileNode> = Vec::new();
    let mut stack: Vec<FileNode> = Vec::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by(order_entries)
        .into_iter()
        .filter_entry(|e| !is_hidden(e));

    for entry in walker {
        let entry = entry.map_err(|e| Error::Storage(format!("Failed to read workspace: {}", e)))?;
        let depth = entry.depth();

        while stack.len() >= depth {
            close_top(&mut stack, &mut top);
        }

        let node = node_for(root, &entry);
        if node.is_dir() {
            stack.push(node);
        } else {
            attach(node, &mut stack, &mut top);
        }
    }
    while !stack.is_empty() {
        close_top(&mut stack, &mut top);
    }
    Ok(top)
}

fn close_top(stack: &mut Vec<FileNode>, top: &mut Vec<FileNode>) {
    if let Some(done) = stack.pop() {
        attach(done, stack, top);
    }
}

fn attach(node: FileNode, stack: &mut [FileNode], top: &mut Vec<FileNode>) {
    match stack.last_mut().and_then(|parent| parent.children.as_mut()) {
        Some(children) => children.push(node),
        None => top.push(node),
    }
}

/// Async wrapper around [`build_file_tree`]
pub async fn file_tree(root: impl Into<PathBuf>) -> Result<Vec<FileNode>> {
    let root = root.into();
    tokio::task::spawn_blocking(move || build_file_tree(&root))
        .await
        .map_err(|e| Error::Internal(format!("File tree task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn names(nodes: &[FileNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.name.as_str()).collect()
    }

    #[test]
    fn test_tree_order_and_filtering() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("app")).unwrap();
        fs::create_dir_all(root.join("node_modules/react")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("app/page.tsx"), "x").unwrap();
        fs::write(root.join("app/layout.tsx"), "y").unwrap();
        fs::write(root.join("README.md"), "readme").unwrap();
        fs::write(root.join(".env"), "SECRET=1").unwrap();
        fs::write(root.join("a.txt"), "").unwrap();

        let tree = build_file_tree(root).unwrap();
        assert_eq!(names(&tree), vec!["app", "README.md", "a.txt"]);

        let app = &tree[0];
        assert!(app.is_dir());
        assert_eq!(app.size, None);
        let children = app.children.as_ref().unwrap();
        assert_eq!(names(children), vec!["layout.tsx", "page.tsx"]);
        assert_eq!(children[1].path, "app/page.tsx");
        assert_eq!(children[1].size, Some(1));
        assert!(children[1].last_modified.is_some());
    }

    #[test]
    fn test_nested_directories_close_correctly() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("a/b/c/deep.txt"), "").unwrap();
        fs::write(root.join("a/top.txt"), "").unwrap();
        fs::write(root.join("z.txt"), "").unwrap();

        let tree = build_file_tree(root).unwrap();
        assert_eq!(names(&tree), vec!["a", "z.txt"]);

        let paths: Vec<&str> = tree.iter().flat_map(|n| n.walk()).map(|n| n.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["a", "a/b", "a/b/c", "a/b/c/deep.txt", "a/top.txt", "z.txt"]
        );
    }

    #[test]
    fn test_serialized_shape() {
        let node = FileNode {
            name: "page.tsx".into(),
            path: "app/page.tsx".into(),
            kind: FileKind::File,
            size: Some(3),
            last_modified: None,
            children: None,
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "file");
        assert!(json.get("children").is_none());
        assert!(json.get("lastModified").is_none());
    }

    #[tokio::test]
    async fn test_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = file_tree(dir.path().join("missing")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
