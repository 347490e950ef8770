//! Intake Context: shared conversation state across invocations
//!
//! [`ContextStore`] owns the id policy and the append/read API;
//! persistence is delegated to a [`KvBackend`] (in memory or on disk).

pub mod backend;
pub mod store;
pub mod testing;

pub use backend::{FileBackend, KvBackend, MemoryBackend};
pub use store::{conversation_id_for, ContextStore, ConversationMeta, CONVERSATION_PREFIX};
