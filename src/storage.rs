use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use thiserror::Error;
use tracing::info;

/// 存储键：历史记录集合 (HistoryItem 数组)
pub const HISTORY_KEY: &str = "history";
/// 存储键：最近一次检测结果
pub const LAST_RESULT_KEY: &str = "lastResult";
/// 存储键：模拟登录用户
pub const MOCK_USER_KEY: &str = "mock_user";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("stored value for '{0}' is not valid UTF-8")]
    Encoding(String),

    #[error("storage quota exceeded while writing '{0}'")]
    QuotaExceeded(String),

    #[error("storage lock poisoned")]
    Poisoned,
}

/// 客户端存储 (Client Storage)
///
/// **职责**: 扮演浏览器 localStorage 的角色。
/// 以字符串为键、字符串为值，每个键存一整块序列化后的数据 (blob)，读改写由调用方负责。
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// 刷盘。内存实现无需任何动作。
    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

// ==========================================
// 1. Sled 持久化后端
// ==========================================

/// 基于 sled 的嵌入式 KV 存储，进程重启后数据仍在。
pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        info!("Opened client storage at {:?}", path);
        Ok(Self { db })
    }
}

impl Storage for SledStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.db.get(key)? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|_| StorageError::Encoding(key.to_string())),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.db.insert(key, value.as_bytes())?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.db.remove(key)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

// ==========================================
// 2. 内存后端 (--ephemeral 与测试)
// ==========================================

#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
    // 打开后所有写操作都返回 QuotaExceeded，用来模拟配额耗尽
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::QuotaExceeded(key.to_string()));
        }
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::QuotaExceeded(key.to_string()));
        }
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_roundtrip_and_remove() {
        let storage = MemoryStorage::new();
        assert!(storage.get(HISTORY_KEY).unwrap().is_none());

        storage.set(HISTORY_KEY, "[]").unwrap();
        assert_eq!(storage.get(HISTORY_KEY).unwrap().as_deref(), Some("[]"));

        storage.remove(HISTORY_KEY).unwrap();
        assert!(storage.get(HISTORY_KEY).unwrap().is_none());
    }

    #[test]
    fn test_memory_fail_writes_keeps_old_value() {
        let storage = MemoryStorage::new();
        storage.set(LAST_RESULT_KEY, "old").unwrap();

        storage.set_fail_writes(true);
        let err = storage.set(LAST_RESULT_KEY, "new").unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded(_)));
        assert_eq!(storage.get(LAST_RESULT_KEY).unwrap().as_deref(), Some("old"));
    }

    #[test]
    fn test_sled_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        {
            let storage = SledStorage::open(&path).unwrap();
            storage.set(MOCK_USER_KEY, r#"{"username":"amy"}"#).unwrap();
            storage.flush().unwrap();
        }
        let storage = SledStorage::open(&path).unwrap();
        assert_eq!(
            storage.get(MOCK_USER_KEY).unwrap().as_deref(),
            Some(r#"{"username":"amy"}"#)
        );
    }
}
