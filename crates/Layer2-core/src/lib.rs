//! agentbox-core: Workspace layer
//!
//! Layer2 - 작업별 워크스페이스와 에이전트 기록
//!
//! # 주요 모듈
//!
//! - `workspace`: 루트에 갇힌 파일 작업, 파일 트리, tar.gz 패키징
//! - `context`: 토큰 예산 기반 에이전트 기록 (ContextManager)
//!
//! # 사용 예시
//!
//! ```ignore
//! use agentbox_core::{ConfinedFilesystem, ContextEntry, ContextManager};
//!
//! let fs = ConfinedFilesystem::new("workspaces/job_123");
//! fs.write("app/page.tsx", "export default function Page() {}").await?;
//!
//! let mut context = ContextManager::new(fs.clone(), &config.context);
//! context.initialize().await?;
//! context.add_entry(ContextEntry::file_change("Created file: app/page.tsx")).await?;
//! ```

pub mod context;
pub mod workspace;

// Re-exports: Context
pub use context::{estimate_tokens, ContextEntry, ContextEntryKind, ContextManager, ContextState};

// Re-exports: Workspace
pub use workspace::{
    build_file_tree, file_tree, normalize_relative, package_directory, relative_display,
    ConfinedFilesystem, DirEntryInfo, FileKind, FileNode, PathViolation, ARCHIVE_EXTENSION,
};
