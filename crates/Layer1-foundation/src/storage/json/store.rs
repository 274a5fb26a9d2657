//! JSON document store
//!
//! 디렉토리 하나에 레코드 하나당 `.json` 파일 하나.
//! 설정 파일(`config.json`)과 작업 레코드(`<job_id>.json`)가 같은 형식을 쓴다.
//! 쓰기는 숨김 임시 파일을 거쳐 rename 하므로, 읽는 쪽은 반쯤 쓴 레코드를 보지 않는다.

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// 글로벌/프로젝트 설정 디렉토리 이름
const APP_DIR: &str = "agentbox";
const PROJECT_DIR: &str = ".agentbox";

fn storage_error(action: &str, path: &Path, cause: impl std::fmt::Display) -> Error {
    Error::Storage(format!("Failed to {} {}: {}", action, path.display(), cause))
}

/// Directory-backed collection of JSON documents
#[derive(Debug, Clone)]
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// 사용자 단위 설정 위치 (`<config_dir>/agentbox`)
    pub fn global() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("No user config directory on this platform".to_string()))?
            .join(APP_DIR);
        Ok(Self::new(dir))
    }

    /// `root/.agentbox`
    pub fn project(root: impl Into<PathBuf>) -> Self {
        Self::new(root.into().join(PROJECT_DIR))
    }

    pub fn current_project() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::Config(format!("Working directory unavailable: {}", e)))?;
        Ok(Self::project(cwd))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }

    /// Parse one document. A missing file is a `Storage` error.
    pub fn load<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        let path = self.file_path(filename);
        let raw = std::fs::read_to_string(&path).map_err(|e| storage_error("read", &path, e))?;
        serde_json::from_str(&raw).map_err(|e| storage_error("parse", &path, e))
    }

    /// `None` when the document does not exist; a corrupt one is still an error
    pub fn load_optional<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        if !self.file_path(filename).is_file() {
            return Ok(None);
        }
        self.load(filename).map(Some)
    }

    /// Replace a document atomically
    pub fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| storage_error("create", &self.base_dir, e))?;

        let path = self.file_path(filename);
        let staging = self.file_path(&format!(".{}.tmp", filename));
        let body = serde_json::to_vec_pretty(data).map_err(|e| storage_error("encode", &path, e))?;

        std::fs::write(&staging, body).map_err(|e| storage_error("write", &staging, e))?;
        std::fs::rename(&staging, &path).map_err(|e| {
            let _ = std::fs::remove_file(&staging);
            storage_error("replace", &path, e)
        })?;
        trace!("Saved {}", path.display());
        Ok(())
    }

    /// Document names (without `.json`), sorted. Staging files are skipped.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error("list", &self.base_dir, e)),
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .filter(|stem| !stem.starts_with('.'))
            .collect();
        names.sort();
        debug!("{} documents in {}", names.len(), self.base_dir.display());
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    #[test]
    fn test_save_load_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("records"));

        assert!(store.list().unwrap().is_empty());
        assert!(store.load_optional::<Record>("a.json").unwrap().is_none());

        let record = Record {
            name: "a".into(),
            count: 2,
        };
        store.save("b.json", &record).unwrap();
        store.save("a.json", &record).unwrap();

        assert_eq!(store.load::<Record>("a.json").unwrap(), record);
        assert_eq!(store.list().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert!(!store.file_path(".a.json.tmp").exists());
    }

    #[test]
    fn test_load_corrupt_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        std::fs::write(store.file_path("bad.json"), "{not json").unwrap();

        let err = store.load::<Record>("bad.json").unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(store.load_optional::<Record>("bad.json").is_err());
    }
}
