//! Periodic background flush of a shared memory state.

use crate::{MemoryError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::MemoryState;
use super::store::ConversationMemoryStore;

/// State shared between a front-end and the autosaver
pub type SharedState = Arc<Mutex<MemoryState>>;

/// Handle to a running autosave task
#[derive(Debug)]
pub struct Autosaver {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Autosaver {
    /// Spawn a task that flushes `state` every `interval` while it is dirty.
    ///
    /// Each tick goes through the same per-user critical section as any
    /// other store operation. Flush failures are logged and retried on the
    /// next tick.
    pub fn spawn(
        store: ConversationMemoryStore,
        state: SharedState,
        interval: Duration,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(MemoryError::InvalidArgument(
                "autosave interval must be non-zero".to_string(),
            ));
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        flush_once(&store, &state).await;
                        break;
                    }
                    _ = ticker.tick() => {
                        flush_once(&store, &state).await;
                    }
                }
            }
            debug!("Autosave task stopped");
        });

        info!(interval_secs = interval.as_secs_f64(), "Autosave started");
        Ok(Self { cancel, handle })
    }

    /// Spawn with the store's configured interval.
    pub fn spawn_default(store: ConversationMemoryStore, state: SharedState) -> Result<Self> {
        let interval = store.config().autosave_interval;
        Self::spawn(store, state, interval)
    }

    /// Stop the task after one final flush.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("Autosave task ended abnormally: {}", e);
        }
    }
}

async fn flush_once(store: &ConversationMemoryStore, state: &SharedState) {
    let mut state = state.lock().await;
    match store.flush(&mut state).await {
        Ok(true) => debug!(user = state.user_id(), "Autosaved memory"),
        Ok(false) => {}
        Err(e) => warn!(user = state.user_id(), "Autosave failed: {}", e),
    }
}
