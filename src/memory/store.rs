//! Conversation memory store.
//!
//! Owns load/save/prune/search of a user's [`MemoryState`]. Every operation
//! that touches storage holds the user's critical section for its whole
//! duration. Mutations persist according to the configured [`Durability`].

use crate::config::{Durability, MemoryConfig};
use crate::{MemoryError, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use super::backend::{file_stem, FileBackend, InMemoryBackend, StorageBackend};
use super::locks::KeyedLocks;
use super::search::{self, SearchMatch};
use super::state::{Interaction, InteractionContext, MemoryContext, MemoryState};

/// Durable, bounded, queryable record of each user's conversation memory
#[derive(Debug, Clone)]
pub struct ConversationMemoryStore {
    config: MemoryConfig,
    backend: Arc<dyn StorageBackend>,
    locks: Arc<KeyedLocks>,
}

impl ConversationMemoryStore {
    /// File-backed store rooted at `config.data_dir`
    pub fn new(config: MemoryConfig) -> Self {
        let backend = FileBackend::new(config.data_dir.clone());
        Self::with_backend(config, Arc::new(backend))
    }

    pub fn with_backend(config: MemoryConfig, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            config,
            backend,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    /// Volatile store; `config` still drives caps and durability.
    pub fn in_memory(config: MemoryConfig) -> Self {
        Self::with_backend(config, Arc::new(InMemoryBackend::new()))
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Read the stored state for `user_id`, or a fresh one if none exists.
    pub async fn load(&self, user_id: &str) -> Result<MemoryState> {
        validate_user_id(user_id)?;
        let _guard = self.locks.lock(user_id).await;

        let Some(payload) = self.backend.read(user_id).await? else {
            debug!(user = user_id, "No stored memory, starting fresh");
            return Ok(MemoryState::new(user_id));
        };

        let mut state = MemoryState::from_json(&payload)?;
        if state.user_id() != user_id {
            return Err(MemoryError::MalformedState(format!(
                "stored record belongs to '{}', not '{}'",
                state.user_id(),
                user_id
            )));
        }

        // A record written under a larger cap is brought within the current one
        let evicted = state.truncate_interactions(self.config.max_interactions);
        if evicted > 0 {
            warn!(user = user_id, evicted, "Stored interactions exceeded cap");
            state.mark_dirty();
        }

        info!(
            user = user_id,
            interactions = state.interactions.len(),
            total_sessions = state.total_sessions,
            "Loaded memory"
        );
        Ok(state)
    }

    /// End-of-session checkpoint: stamp `lastSession`, bump `totalSessions`
    /// and write the whole state.
    ///
    /// On failure both fields are restored and the state stays dirty.
    pub async fn save(&self, state: &mut MemoryState) -> Result<()> {
        let _guard = self.locks.lock(state.user_id()).await;

        let previous = (state.last_session, state.total_sessions);
        state.last_session = Some(Utc::now());
        state.total_sessions += 1;
        state.mark_dirty();

        if let Err(e) = self.persist(state).await {
            (state.last_session, state.total_sessions) = previous;
            return Err(e);
        }

        info!(
            user = state.user_id(),
            total_sessions = state.total_sessions,
            "Saved memory"
        );
        Ok(())
    }

    /// Write the state if it has unpersisted changes. Returns whether a write
    /// happened. Session bookkeeping is left alone.
    pub async fn flush(&self, state: &mut MemoryState) -> Result<bool> {
        let _guard = self.locks.lock(state.user_id()).await;
        if !state.is_dirty() {
            return Ok(false);
        }
        self.persist(state).await?;
        Ok(true)
    }

    /// Append an interaction, evicting the oldest beyond the cap.
    pub async fn record_interaction(
        &self,
        state: &mut MemoryState,
        input_text: impl Into<String>,
        output_text: impl Into<String>,
        context: InteractionContext,
    ) -> Result<Interaction> {
        let _guard = self.locks.lock(state.user_id()).await;

        let len_before = state.interactions.len();
        let interaction = state.push_interaction(
            input_text.into(),
            output_text.into(),
            context,
            self.config.max_interactions,
        );
        if state.interactions.len() <= len_before {
            debug!(user = state.user_id(), "Evicted oldest interaction");
        }

        self.commit(state).await?;
        Ok(interaction)
    }

    /// File `information` under `topic` with confidence 1.0.
    pub async fn add_knowledge(
        &self,
        state: &mut MemoryState,
        topic: &str,
        information: impl Into<String>,
    ) -> Result<()> {
        if topic.trim().is_empty() {
            return Err(MemoryError::InvalidArgument(
                "knowledge topic must not be empty".to_string(),
            ));
        }
        let _guard = self.locks.lock(state.user_id()).await;

        state.push_knowledge(topic, information.into());
        self.commit(state).await
    }

    /// Add deltas to each metric and clamp them to [0, 100].
    pub async fn update_relationship(
        &self,
        state: &mut MemoryState,
        delta_trust: f64,
        delta_rapport: f64,
        delta_understanding: f64,
    ) -> Result<()> {
        if ![delta_trust, delta_rapport, delta_understanding]
            .iter()
            .all(|d| d.is_finite())
        {
            return Err(MemoryError::InvalidArgument(
                "relationship deltas must be finite".to_string(),
            ));
        }
        let _guard = self.locks.lock(state.user_id()).await;

        state
            .relationship
            .apply(delta_trust, delta_rapport, delta_understanding);
        self.commit(state).await
    }

    /// Set the display name (when given) and merge preferences.
    pub async fn set_user_profile(
        &self,
        state: &mut MemoryState,
        name: Option<String>,
        preferences: BTreeMap<String, String>,
    ) -> Result<()> {
        let _guard = self.locks.lock(state.user_id()).await;

        if let Some(name) = name {
            state.user.name = Some(name);
        }
        state.user.preferences.extend(preferences);
        self.commit(state).await
    }

    /// Evict the oldest interactions until at most `max` remain (never more
    /// than the configured cap). Returns the number evicted.
    pub async fn prune(&self, state: &mut MemoryState, max: usize) -> Result<usize> {
        let _guard = self.locks.lock(state.user_id()).await;

        let evicted = state.truncate_interactions(max.min(self.config.max_interactions));
        if evicted > 0 {
            info!(user = state.user_id(), evicted, "Pruned interactions");
            self.commit(state).await?;
        }
        Ok(evicted)
    }

    /// Recent interactions plus knowledge, metrics and session count.
    /// `None` uses the configured default limit.
    pub fn get_context(&self, state: &MemoryState, limit: Option<usize>) -> MemoryContext {
        state.context(limit.unwrap_or(self.config.default_context_limit))
    }

    pub fn search(&self, state: &MemoryState, query: &str) -> Vec<SearchMatch> {
        search::search(state, query)
    }

    /// Lossless serialized form of the state.
    pub fn export_state(&self, state: &MemoryState) -> Result<String> {
        state.to_json()
    }

    /// Replace `state` wholesale with a serialized record of the same user.
    ///
    /// A malformed payload or one belonging to another user leaves `state`
    /// untouched.
    pub async fn import_state(&self, state: &mut MemoryState, payload: &str) -> Result<()> {
        let mut imported = MemoryState::from_json(payload)?;
        if imported.user_id() != state.user_id() {
            return Err(MemoryError::InvalidArgument(format!(
                "record belongs to '{}', not '{}'",
                imported.user_id(),
                state.user_id()
            )));
        }

        let evicted = imported.truncate_interactions(self.config.max_interactions);
        if evicted > 0 {
            warn!(
                user = imported.user_id(),
                evicted, "Imported interactions exceeded cap"
            );
        }

        let _guard = self.locks.lock(state.user_id()).await;
        *state = imported;
        info!(
            user = state.user_id(),
            interactions = state.interactions.len(),
            "Imported memory"
        );
        self.commit(state).await
    }

    /// Permanently delete the stored state. Succeeds if already absent.
    pub async fn wipe(&self, user_id: &str) -> Result<()> {
        validate_user_id(user_id)?;
        let _guard = self.locks.lock(user_id).await;

        self.backend.remove(user_id).await?;
        info!(user = user_id, "Wiped memory");
        Ok(())
    }

    /// Write a timestamped snapshot into the backup directory.
    pub async fn backup(&self, state: &MemoryState) -> Result<PathBuf> {
        let _guard = self.locks.lock(state.user_id()).await;

        let dir = &self.config.backup_dir;
        fs::create_dir_all(dir)
            .await
            .map_err(|e| MemoryError::write_failed(dir, e))?;

        let path = dir.join(format!(
            "{}_{}.json",
            file_stem(state.user_id()),
            Utc::now().format("%Y%m%dT%H%M%S%.3f")
        ));
        fs::write(&path, state.to_json()?)
            .await
            .map_err(|e| MemoryError::write_failed(&path, e))?;

        info!(user = state.user_id(), path = %path.display(), "Wrote backup");
        Ok(path)
    }

    /// User identifiers with stored state
    pub async fn list_users(&self) -> Result<Vec<String>> {
        self.backend.list().await
    }

    /// Mark dirty and persist if the durability mode asks for it.
    async fn commit(&self, state: &mut MemoryState) -> Result<()> {
        state.mark_dirty();
        match self.config.durability {
            Durability::Synchronous => self.persist(state).await,
            Durability::Deferred => Ok(()),
        }
    }

    /// Whole-state write. Callers hold the user's lock.
    async fn persist(&self, state: &mut MemoryState) -> Result<()> {
        let payload = state.to_json()?;
        self.backend.write(state.user_id(), &payload).await?;
        state.mark_clean();
        debug!(user = state.user_id(), "Persisted memory");
        Ok(())
    }
}

fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(MemoryError::InvalidArgument(
            "user identifier must not be empty".to_string(),
        ));
    }
    Ok(())
}
