//! Per-key async locks
//!
//! 작업(job) 단위로 read-modify-write 구간을 직렬화한다.
//! 서로 다른 키는 서로를 막지 않는다. 마지막 guard가 풀리면 키 항목도 사라진다.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// 키별 비동기 뮤텍스 맵
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 키에 대한 락 획득 (guard가 drop될 때까지 유지)
    pub async fn lock(&self, key: &str) -> KeyedGuard<'_> {
        let slot = {
            let mut locks = self.locks.lock();
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        KeyedGuard {
            locks: self,
            key: key.to_string(),
            guard: Some(slot.lock_owned().await),
        }
    }

    /// 대기자도 보유자도 없으면 항목 제거. 복제는 맵 락 안에서만 일어나므로
    /// strong count 1은 아무도 이 슬롯을 쓰지 않는다는 뜻이다.
    fn release(&self, key: &str) {
        let mut locks = self.locks.lock();
        if locks.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            locks.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 키 락 guard. drop 시 락을 풀고 쓰이지 않는 항목을 정리한다.
#[derive(Debug)]
pub struct KeyedGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = Arc::new(KeyedLocks::new());
        let counter = Arc::new(Mutex::new(Vec::new()));

        let guard = locks.lock("job_a").await;
        let task = {
            let locks = locks.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let _g = locks.lock("job_a").await;
                counter.lock().push("second");
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        counter.lock().push("first");
        drop(guard);
        task.await.unwrap();

        assert_eq!(*counter.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("job_a").await;
        let b = tokio::time::timeout(Duration::from_millis(200), locks.lock("job_b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_idle_entries_are_dropped() {
        let locks = KeyedLocks::new();
        for i in 0..100 {
            let _g = locks.lock(&format!("job_{}", i)).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_waiter_keeps_entry_alive() {
        let locks = Arc::new(KeyedLocks::new());
        let guard = locks.lock("job_a").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock("job_a").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
