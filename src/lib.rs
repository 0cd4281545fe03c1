//! Convo Memory - local conversation memory store
//!
//! Keeps one durable record per user identifier:
//! - A bounded, insertion-ordered interaction log (oldest evicted first)
//! - A topic-keyed knowledge map
//! - Clamped relationship metrics and session bookkeeping
//!
//! Every storage-touching operation runs inside a per-user critical section,
//! and persistence is either synchronous or deferred to an explicit flush or
//! the periodic [`Autosaver`].

pub mod config;
pub mod memory;

pub use config::{resolve_home, Durability, MemoryConfig};
pub use memory::{
    Autosaver, ConversationMemoryStore, FileBackend, InMemoryBackend, Interaction,
    InteractionContext, KnowledgeItem, KnowledgeMap, MemoryContext, MemoryState,
    RelationshipMetrics, SearchMatch, SharedState, StorageBackend, UserProfile,
};

/// Result type for memory store operations
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Errors that can occur in the memory store
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Backing medium could not be opened or read. Absence is not an error.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A write could not be committed; in-memory state is not durable.
    #[error("Storage write failed: {0}")]
    StorageWriteError(String),

    /// Stored or imported data does not have the expected shape.
    #[error("Malformed state: {0}")]
    MalformedState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl MemoryError {
    pub(crate) fn unavailable(path: &std::path::Path, err: std::io::Error) -> Self {
        Self::StorageUnavailable(format!("{}: {}", path.display(), err))
    }

    pub(crate) fn write_failed(path: &std::path::Path, err: std::io::Error) -> Self {
        Self::StorageWriteError(format!("{}: {}", path.display(), err))
    }
}
