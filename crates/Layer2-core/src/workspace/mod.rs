//! Workspace - 작업별 디렉토리 관리
//!
//! - `path.rs` - 상대 경로 검증
//! - `fs.rs` - 루트에 갇힌 파일 작업 (ConfinedFilesystem)
//! - `tree.rs` - 파일 트리 스냅샷
//! - `archive.rs` - tar.gz 패키징

mod archive;
mod fs;
mod path;
mod tree;

pub use archive::{package_directory, ARCHIVE_EXTENSION};
pub use fs::{ConfinedFilesystem, DirEntryInfo, FileKind};
pub use path::{normalize_relative, relative_display, PathViolation};
pub use tree::{build_file_tree, file_tree, FileNode};
