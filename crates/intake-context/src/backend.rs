//! Key-value backing capability of the context store
//!
//! A key holds either a single value (`get`/`set`) or an ordered list of
//! values (`append`/`list`). The store never needs anything else.

use async_trait::async_trait;
use intake_core::StoreError;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::io::AsyncWriteExt;

/// External key-value capability.
#[async_trait]
pub trait KvBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Push `value` at the end of the list under `key`; returns the new length.
    async fn append(&self, key: &str, value: Value) -> Result<usize, StoreError>;

    /// Values under `key` in append order; empty when the key is unknown.
    async fn list(&self, key: &str) -> Result<Vec<Value>, StoreError>;

    /// Remove the value and the list under `key`. True if anything existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn len(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.list(key).await?.len())
    }
}

/// Process-local backend. Data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    values: RwLock<HashMap<String, Value>>,
    lists: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys holding a value or a list.
    pub fn key_count(&self) -> usize {
        let values = self.values.read().map(|v| v.len()).unwrap_or(0);
        let lists = self.lists.read().map(|l| l.len()).unwrap_or(0);
        values + lists
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("memory backend lock poisoned".into())
}

#[async_trait]
impl KvBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values.read().map_err(poisoned)?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.write().map_err(poisoned)?.insert(key.to_string(), value);
        Ok(())
    }

    async fn append(&self, key: &str, value: Value) -> Result<usize, StoreError> {
        let mut lists = self.lists.write().map_err(poisoned)?;
        let list = lists.entry(key.to_string()).or_default();
        list.push(value);
        Ok(list.len())
    }

    async fn list(&self, key: &str) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .lists
            .read()
            .map_err(poisoned)?
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let value = self.values.write().map_err(poisoned)?.remove(key).is_some();
        let list = self.lists.write().map_err(poisoned)?.remove(key).is_some();
        Ok(value || list)
    }

    async fn len(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self
            .lists
            .read()
            .map_err(poisoned)?
            .get(key)
            .map_or(0, Vec::len))
    }
}

/// Durable backend: one file per key under a directory.
///
/// Values live in `<key>.json`, lists in `<key>.jsonl` (one JSON document
/// per line). Keys are escaped into file names, so any key is allowed.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Backend rooted at `root`, created if missing.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| io_error(&root, e))?;
        tracing::debug!(target: "intake::store", root = %root.display(), "file backend opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", file_stem(key)))
    }

    fn list_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.jsonl", file_stem(key)))
    }
}

/// `:` becomes `.`, other bytes outside `[A-Za-z0-9_-]` become `%XX`.
fn file_stem(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'-' => stem.push(byte as char),
            b':' => stem.push('.'),
            other => stem.push_str(&format!("%{:02X}", other)),
        }
    }
    stem
}

fn io_error(path: &Path, err: std::io::Error) -> StoreError {
    StoreError::Unavailable(format!("{}: {}", path.display(), err))
}

async fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path, e)),
    }
}

async fn remove_optional(path: &Path) -> Result<bool, StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error(path, e)),
    }
}

#[async_trait]
impl KvBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let Some(text) = read_optional(&self.value_path(key)).await? else {
            return Ok(None);
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let path = self.value_path(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value.to_string())
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, e))
    }

    async fn append(&self, key: &str, value: Value) -> Result<usize, StoreError> {
        let path = self.list_path(key);
        let mut line = value.to_string();
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| io_error(&path, e))?;
        file.flush().await.map_err(|e| io_error(&path, e))?;

        self.len(key).await
    }

    async fn list(&self, key: &str) -> Result<Vec<Value>, StoreError> {
        let Some(text) = read_optional(&self.list_path(key)).await? else {
            return Ok(Vec::new());
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| StoreError::Corrupt {
                    key: key.to_string(),
                    reason: format!("line {}: {}", n + 1, e),
                })
            })
            .collect()
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let value = remove_optional(&self.value_path(key)).await?;
        let list = remove_optional(&self.list_path(key)).await?;
        Ok(value || list)
    }

    async fn len(&self, key: &str) -> Result<usize, StoreError> {
        let text = read_optional(&self.list_path(key)).await?;
        Ok(text.map_or(0, |t| t.lines().filter(|l| !l.trim().is_empty()).count()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_file_stem_is_injective_for_separators() {
        assert_eq!(file_stem("conversation:conv-1:entries"), "conversation.conv-1.entries");
        assert_eq!(file_stem("a.b"), "a%2Eb");
        assert_ne!(file_stem("a:b"), file_stem("a.b"));
        assert_eq!(file_stem("../etc"), "%2E%2E%2Fetc");
    }

    #[tokio::test]
    async fn test_memory_values_and_lists() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("k").await.unwrap(), None);

        backend.set("k", json!({"a": 1})).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(json!({"a": 1})));

        assert_eq!(backend.append("l", json!(1)).await.unwrap(), 1);
        assert_eq!(backend.append("l", json!(1)).await.unwrap(), 2);
        assert_eq!(backend.list("l").await.unwrap(), vec![json!(1), json!(1)]);
        assert_eq!(backend.key_count(), 2);

        assert!(backend.delete("l").await.unwrap());
        assert!(!backend.delete("l").await.unwrap());
        assert!(backend.list("l").await.unwrap().is_empty());
    }
}
