//! Workspace path validation
//!
//! 작업 공간 상대 경로만 받는다. 검사는 두 단계다.
//! 1. 문자열 검사 (절대 경로, 드라이브 접두사, `..`, NUL)
//! 2. 심볼릭 링크 검사 (가장 깊은 기존 조상을 canonicalize해서 루트 아래인지 확인)

use agentbox_foundation::Error;
use std::path::{Path, PathBuf};

/// 경로 검증 실패 사유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathViolation {
    /// 절대 경로 또는 드라이브 접두사
    Absolute { path: String },

    /// `..` 세그먼트
    PathTraversal { path: String },

    /// NUL 바이트
    NulByte,

    /// 심볼릭 링크가 루트 밖을 가리킴
    SymlinkEscape { path: String, target: PathBuf },
}

impl PathViolation {
    pub fn error_message(&self) -> String {
        match self {
            PathViolation::Absolute { path } => {
                format!("Absolute paths are not allowed: '{}'", path)
            }
            PathViolation::PathTraversal { path } => {
                format!("Path traversal detected: '{}'", path)
            }
            PathViolation::NulByte => "Path contains a NUL byte".to_string(),
            PathViolation::SymlinkEscape { path, target } => format!(
                "Symlink escape detected: '{}' points to '{}'",
                path,
                target.display()
            ),
        }
    }
}

impl From<PathViolation> for Error {
    fn from(v: PathViolation) -> Self {
        Error::Security(v.error_message())
    }
}

fn has_drive_prefix(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Lexically normalize a workspace-relative path.
///
/// `""` and `"."` normalize to the empty path (the root itself).
/// Both `/` and `\` separate segments.
pub fn normalize_relative(raw: &str) -> Result<PathBuf, PathViolation> {
    if raw.contains('\0') {
        return Err(PathViolation::NulByte);
    }
    if raw.starts_with('/')
        || raw.starts_with('\\')
        || has_drive_prefix(raw)
        || Path::new(raw).is_absolute()
    {
        return Err(PathViolation::Absolute {
            path: raw.to_string(),
        });
    }

    let mut normalized = PathBuf::new();
    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(PathViolation::PathTraversal {
                    path: raw.to_string(),
                })
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}

/// `path` relative to `root`, `/`-separated
pub fn relative_display(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plain() {
        assert_eq!(normalize_relative("src/app.ts").unwrap(), PathBuf::from("src/app.ts"));
        assert_eq!(normalize_relative("./a//b/").unwrap(), PathBuf::from("a/b"));
        assert_eq!(normalize_relative("a\\b.txt").unwrap(), PathBuf::from("a/b.txt"));
        assert_eq!(normalize_relative("").unwrap(), PathBuf::new());
        assert_eq!(normalize_relative(".").unwrap(), PathBuf::new());
    }

    #[test]
    fn test_rejects_escapes() {
        for raw in [
            "../../etc/passwd",
            "a/../../b",
            "a/..",
            "..\\windows",
            "/etc/passwd",
            "\\server\\share",
            "C:\\Windows",
            "c:relative",
        ] {
            assert!(normalize_relative(raw).is_err(), "expected reject: {}", raw);
        }
        assert_eq!(normalize_relative("a\0b"), Err(PathViolation::NulByte));
    }

    #[test]
    fn test_dotted_names_are_not_traversal() {
        assert!(normalize_relative("..hidden").is_ok());
        assert!(normalize_relative("a/b..c").is_ok());
    }

    #[test]
    fn test_violation_maps_to_security() {
        let err: Error = normalize_relative("../x").unwrap_err().into();
        assert!(matches!(err, Error::Security(_)));
    }

    #[test]
    fn test_relative_display() {
        let root = Path::new("/w");
        assert_eq!(relative_display(root, Path::new("/w/a/b.txt")), "a/b.txt");
    }
}
