//! Memory module for Convo Memory
//!
//! Provides the persisted state model, storage backends, per-user locking,
//! keyword search, the store itself and periodic autosave.

mod autosave;
mod backend;
mod locks;
mod search;
mod state;
mod store;

pub use autosave::{Autosaver, SharedState};
pub use backend::{FileBackend, InMemoryBackend, StorageBackend};
pub use locks::KeyedLocks;
pub use search::{SearchMatch, INTERACTION_RELEVANCE, TOPIC_RELEVANCE};
pub use state::{
    Interaction, InteractionContext, KnowledgeItem, KnowledgeMap, MemoryContext, MemoryState,
    RelationshipMetrics, UserProfile, METRIC_MAX,
};
pub use store::ConversationMemoryStore;
