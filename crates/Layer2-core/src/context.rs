//! Context Manager - 에이전트 작업 기록 (토큰 예산 기반)
//!
//! 워크스페이스의 `.agent_context.json`에 저장되는 추가 전용 기록이다.
//! 예산을 넘으면 세 단계로 정리한다.
//!
//! 1. 최근 10개 + 모든 `task`/`file_change` 항목만 남긴다
//! 2. 그래도 넘으면 고정되지 않은 항목을 오래된 순으로 제거
//! 3. 그래도 넘으면 경고 후 남은 항목을 오래된 순으로 제거
//!
//! 남은 항목의 시간 순서는 유지된다.

use crate::workspace::ConfinedFilesystem;
use agentbox_foundation::{ContextSettings, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

/// 최근 항목 보존 개수
const RECENT_KEEP: usize = 10;

/// 메타데이터 키 최대 길이
const MAX_METADATA_KEY_LEN: usize = 64;

// ============================================================================
// Entry
// ============================================================================

/// Context entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextEntryKind {
    Task,
    ToolResult,
    FileChange,
    Thought,
}

impl ContextEntryKind {
    /// 정리 단계 1, 2에서 보존되는 종류
    pub fn is_pinned(&self) -> bool {
        matches!(self, ContextEntryKind::Task | ContextEntryKind::FileChange)
    }
}

/// One unit of the agent's rolling memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    id: String,
    timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    kind: ContextEntryKind,
    content: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

impl ContextEntry {
    pub fn new(kind: ContextEntryKind, content: impl Into<String>) -> Self {
        let timestamp = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{}_{}", timestamp.timestamp_millis(), &suffix[..9]),
            timestamp,
            kind,
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn task(content: impl Into<String>) -> Self {
        Self::new(ContextEntryKind::Task, content)
    }

    pub fn tool_result(content: impl Into<String>) -> Self {
        Self::new(ContextEntryKind::ToolResult, content)
    }

    pub fn file_change(content: impl Into<String>) -> Self {
        Self::new(ContextEntryKind::FileChange, content)
    }

    pub fn thought(content: impl Into<String>) -> Self {
        Self::new(ContextEntryKind::Thought, content)
    }

    /// Attach a metadata pair. Keys must be non-empty, at most 64 chars, without control characters.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::Validation("Metadata key must not be empty".to_string()));
        }
        if key.chars().count() > MAX_METADATA_KEY_LEN {
            return Err(Error::Validation(format!(
                "Metadata key exceeds {} characters",
                MAX_METADATA_KEY_LEN
            )));
        }
        if key.chars().any(char::is_control) {
            return Err(Error::Validation(
                "Metadata key contains control characters".to_string(),
            ));
        }
        self.metadata.insert(key, value.into());
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn kind(&self) -> ContextEntryKind {
        self.kind
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn token_estimate(&self) -> usize {
        estimate_tokens(&self.content)
    }
}

/// `ceil(chars / 4)`
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

// ============================================================================
// State
// ============================================================================

/// Persisted context state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextState {
    pub entries: Vec<ContextEntry>,
    pub total_tokens: usize,
    pub max_tokens: usize,
}

impl ContextState {
    fn empty(max_tokens: usize) -> Self {
        Self {
            entries: Vec::new(),
            total_tokens: 0,
            max_tokens,
        }
    }

    fn recompute(&mut self) {
        self.total_tokens = self.entries.iter().map(ContextEntry::token_estimate).sum();
    }

    fn over_budget(&self) -> bool {
        self.total_tokens > self.max_tokens
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Token-budgeted rolling memory for one workspace
pub struct ContextManager {
    fs: ConfinedFilesystem,
    file_name: String,
    state: ContextState,
    dirty: bool,
}

impl ContextManager {
    pub fn new(fs: ConfinedFilesystem, settings: &ContextSettings) -> Self {
        Self {
            fs,
            file_name: settings.file_name.clone(),
            state: ContextState::empty(settings.max_tokens),
            dirty: false,
        }
    }

    /// Load the context file, or start empty and persist
    pub async fn initialize(&mut self) -> Result<()> {
        let max_tokens = self.state.max_tokens;

        match self.fs.read(&self.file_name).await {
            Ok(raw) => match serde_json::from_str::<ContextState>(&raw) {
                Ok(mut loaded) => {
                    loaded.max_tokens = max_tokens;
                    loaded.recompute();
                    self.state = loaded;
                    if self.state.over_budget() {
                        self.prune();
                        self.save().await?;
                    }
                    debug!("Loaded {} context entries", self.state.entries.len());
                }
                Err(e) => {
                    warn!("Corrupt context file {}, starting empty: {}", self.file_name, e);
                    self.state = ContextState::empty(max_tokens);
                    self.save().await?;
                }
            },
            Err(Error::NotFound(_)) => {
                self.state = ContextState::empty(max_tokens);
                self.save().await?;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Append an entry, prune if over budget, then persist.
    ///
    /// On a persistence failure the entry stays in memory and the next save retries.
    pub async fn add_entry(&mut self, entry: ContextEntry) -> Result<()> {
        self.state.total_tokens += entry.token_estimate();
        self.state.entries.push(entry);

        if self.state.over_budget() {
            self.prune();
        }
        self.save().await
    }

    /// Persist if a previous save failed
    pub async fn flush(&mut self) -> Result<()> {
        if self.dirty {
            self.save().await?;
        }
        Ok(())
    }

    async fn save(&mut self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.state)?;
        match self.fs.write(&self.file_name, json).await {
            Ok(()) => {
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                self.dirty = true;
                warn!("Failed to persist context: {}", e);
                Err(Error::Storage(format!("Failed to persist context: {}", e)))
            }
        }
    }

    fn prune(&mut self) {
        let before = self.state.entries.len();

        // 1단계: 최근 10개 + 고정 항목
        let mut by_recency: Vec<usize> = (0..self.state.entries.len()).collect();
        by_recency.sort_by_key(|&i| Reverse((self.state.entries[i].timestamp, i)));
        let recent: HashSet<usize> = by_recency.into_iter().take(RECENT_KEEP).collect();

        let mut index = 0;
        self.state.entries.retain(|entry| {
            let keep = recent.contains(&index) || entry.kind.is_pinned();
            index += 1;
            keep
        });
        self.state.recompute();

        // 2단계: 고정되지 않은 항목을 오래된 순으로
        while self.state.over_budget() {
            match self.state.entries.iter().position(|e| !e.kind.is_pinned()) {
                Some(pos) => {
                    let removed = self.state.entries.remove(pos);
                    self.state.total_tokens -= removed.token_estimate();
                }
                None => break,
            }
        }

        // 3단계: 여기까지 오면 남은 것은 고정 항목뿐이다. 고정 항목만으로
        // max_tokens를 넘을 때에만 task/file_change도 오래된 순으로 버린다.
        if self.state.over_budget() {
            warn!(
                "Pinned context entries exceed budget ({} > {}), evicting oldest",
                self.state.total_tokens, self.state.max_tokens
            );
            while self.state.over_budget() && !self.state.entries.is_empty() {
                let removed = self.state.entries.remove(0);
                self.state.total_tokens -= removed.token_estimate();
            }
        }

        debug!(
            "Pruned context: {} -> {} entries ({} tokens)",
            before,
            self.state.entries.len(),
            self.state.total_tokens
        );
    }

    /// Top `max` entries by keyword occurrences, ties broken by recency
    pub fn get_relevant_context(&self, query: &str, max: usize) -> Vec<ContextEntry> {
        let keywords: Vec<String> = query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();

        let mut scored: Vec<(usize, usize, &ContextEntry)> = self
            .state
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let content = entry.content.to_lowercase();
                let score = keywords
                    .iter()
                    .map(|k| content.matches(k.as_str()).count())
                    .sum();
                (score, i, entry)
            })
            .collect();

        scored.sort_by_key(|(score, i, entry)| Reverse((*score, entry.timestamp, *i)));
        scored
            .into_iter()
            .take(max)
            .map(|(_, _, entry)| entry.clone())
            .collect()
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.state.entries
    }

    pub fn total_tokens(&self) -> usize {
        self.state.total_tokens
    }

    pub fn max_tokens(&self) -> usize {
        self.state.max_tokens
    }

    pub fn state(&self) -> &ContextState {
        &self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}
