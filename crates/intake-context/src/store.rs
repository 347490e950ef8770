//! Shared Context Store: append-only conversation history
//!
//! Layout on the backend, per conversation id:
//!
//! - `conversation:<id>` - metadata (value)
//! - `conversation:<id>:entries` - [`ContextEntry`] list
//! - `conversation:<id>:events` - [`StageEvent`] list
//!
//! Appends to one conversation are serialized by a per-conversation lock;
//! different conversations never wait on each other. A lock lives only
//! while some call holds or awaits it.

use chrono::{DateTime, Utc};
use intake_core::{
    ClassificationResult, ContextEntry, ExtractionRecord, Origin, StageEvent, StoreError,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::backend::KvBackend;

/// Prefix of every conversation id
pub const CONVERSATION_PREFIX: &str = "conv-";

/// Hex characters of the hint hash kept in a derived id
const HINT_HASH_CHARS: usize = 32;

/// Metadata written when a conversation is first seen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMeta {
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
    /// Whether the id was derived from a caller hint
    pub from_hint: bool,
}

/// Conversation id for a hint: derived from the hint when one is given,
/// fresh otherwise.
pub fn conversation_id_for(hint: Option<&str>) -> String {
    match hint.map(str::trim).filter(|h| !h.is_empty()) {
        Some(hint) => {
            let hash = blake3::hash(hint.as_bytes());
            format!("{}{}", CONVERSATION_PREFIX, &hash.to_hex()[..HINT_HASH_CHARS])
        }
        None => format!("{}{}", CONVERSATION_PREFIX, Uuid::new_v4()),
    }
}

fn meta_key(id: &str) -> String {
    format!("conversation:{}", id)
}

fn entries_key(id: &str) -> String {
    format!("conversation:{}:entries", id)
}

fn events_key(id: &str) -> String {
    format!("conversation:{}:events", id)
}

type LockMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Held (or awaited) lock on one conversation. Dropping the last handle
/// removes the conversation's entry from the lock map.
struct ConversationLock<'a> {
    locks: &'a Mutex<LockMap>,
    id: String,
    lock: Option<Arc<tokio::sync::Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ConversationLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        self.guard.take();
        self.lock.take();
        if locks.get(&self.id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.id);
        }
    }
}

/// Read/append API over a [`KvBackend`].
pub struct ContextStore {
    backend: Arc<dyn KvBackend>,
    locks: Mutex<LockMap>,
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl ContextStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    async fn lock_conversation(&self, id: &str) -> ConversationLock<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.entry(id.to_string()).or_default().clone()
        };
        let mut held = ConversationLock {
            locks: &self.locks,
            id: id.to_string(),
            lock: Some(lock.clone()),
            guard: None,
        };
        held.guard = Some(lock.lock_owned().await);
        held
    }

    /// Conversations with a live lock.
    pub fn active_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Id for `hint`, registering the conversation if it is new.
    ///
    /// The same hint always yields the same id; no hint yields a fresh one.
    pub async fn get_or_create_conversation(&self, hint: Option<&str>) -> Result<String, StoreError> {
        let id = conversation_id_for(hint);
        let _lock = self.lock_conversation(&id).await;
        self.ensure_meta(&id, hint.is_some_and(|h| !h.trim().is_empty()))
            .await?;
        Ok(id)
    }

    async fn ensure_meta(&self, id: &str, from_hint: bool) -> Result<(), StoreError> {
        let key = meta_key(id);
        if self.backend.get(&key).await?.is_some() {
            return Ok(());
        }
        let meta = ConversationMeta {
            conversation_id: id.to_string(),
            created_at: Utc::now(),
            from_hint,
        };
        self.backend.set(&key, encode(&key, &meta)?).await?;
        tracing::info!(target: "intake::store", conversation_id = %id, from_hint, "conversation created");
        Ok(())
    }

    /// Metadata of a conversation, if it exists.
    pub async fn conversation(&self, id: &str) -> Result<Option<ConversationMeta>, StoreError> {
        let key = meta_key(id);
        match self.backend.get(&key).await? {
            Some(value) => decode(&key, value).map(Some),
            None => Ok(None),
        }
    }

    /// Append one entry. Never overwrites and never deduplicates: two
    /// identical appends are two entries.
    pub async fn append(
        &self,
        conversation_id: &str,
        classification: ClassificationResult,
        extraction: ExtractionRecord,
        origin: Origin,
    ) -> Result<ContextEntry, StoreError> {
        let _lock = self.lock_conversation(conversation_id).await;

        self.ensure_meta(conversation_id, false).await?;

        let key = entries_key(conversation_id);
        let sequence = self.backend.len(&key).await? as u64;
        let entry = ContextEntry {
            conversation_id: conversation_id.to_string(),
            sequence,
            classification,
            extraction,
            origin,
            appended_at: Utc::now(),
        };
        self.backend.append(&key, encode(&key, &entry)?).await?;

        tracing::debug!(
            target: "intake::store",
            conversation_id = %conversation_id,
            sequence,
            intent = %entry.classification.intent,
            "entry appended"
        );
        Ok(entry)
    }

    /// Entries of a conversation in append order; empty for unknown ids.
    pub async fn read(&self, conversation_id: &str) -> Result<Vec<ContextEntry>, StoreError> {
        let key = entries_key(conversation_id);
        self.backend
            .list(&key)
            .await?
            .into_iter()
            .map(|value| decode(&key, value))
            .collect()
    }

    pub async fn record_event(&self, conversation_id: &str, event: &StageEvent) -> Result<(), StoreError> {
        let key = events_key(conversation_id);
        self.backend.append(&key, encode(&key, event)?).await?;
        Ok(())
    }

    pub async fn events(&self, conversation_id: &str) -> Result<Vec<StageEvent>, StoreError> {
        let key = events_key(conversation_id);
        self.backend
            .list(&key)
            .await?
            .into_iter()
            .map(|value| decode(&key, value))
            .collect()
    }

    /// Drop a conversation's metadata, entries and events.
    pub async fn forget(&self, conversation_id: &str) -> Result<bool, StoreError> {
        let _lock = self.lock_conversation(conversation_id).await;

        let mut removed = false;
        for key in [
            meta_key(conversation_id),
            entries_key(conversation_id),
            events_key(conversation_id),
        ] {
            removed |= self.backend.delete(&key).await?;
        }
        if removed {
            tracing::info!(target: "intake::store", conversation_id = %conversation_id, "conversation forgotten");
        }
        Ok(removed)
    }
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
