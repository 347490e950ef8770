//! Test doubles for the key-value capability.

use async_trait::async_trait;
use intake_core::StoreError;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::backend::{KvBackend, MemoryBackend};

/// Backend that can be switched off. While down every call fails with
/// [`StoreError::Unavailable`]; while up it behaves like [`MemoryBackend`].
#[derive(Debug, Default)]
pub struct FailingBackend {
    inner: MemoryBackend,
    down: AtomicBool,
    rejected: AtomicUsize,
}

impl FailingBackend {
    /// Backend that starts down.
    pub fn new() -> Self {
        let backend = Self::default();
        backend.set_down(true);
        backend
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Calls refused so far.
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("backend is down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn append(&self, key: &str, value: Value) -> Result<usize, StoreError> {
        self.check()?;
        self.inner.append(key, value).await
    }

    async fn list(&self, key: &str) -> Result<Vec<Value>, StoreError> {
        self.check()?;
        self.inner.list(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.delete(key).await
    }
}
