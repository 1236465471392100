//! Process-wide session registry and shutdown orchestration.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use super::Session;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::repository::{MemoryRepository, Repository};

/// How long `cancel_session` waits for in-flight items before releasing
/// resources anyway.
const DRAIN_GRACE: Duration = Duration::from_secs(10);
/// Poll interval while waiting for a session to drain.
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Thread-safe registry of live sessions.
pub struct SessionManager {
    sessions: DashMap<Uuid, Arc<Session>>,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Creates and registers a session over the store the configuration
    /// selects: `memory://` keeps everything in RAM, anything else opens
    /// the durable SQL store at the resolved DSN.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Fatal`] when the store cannot be opened or
    /// session resources cannot be created.
    pub async fn new_session(&self, config: EngineConfig) -> Result<Arc<Session>> {
        let dsn = config.resolved_store_dsn();
        let store: Arc<dyn Repository> = if dsn.starts_with("memory://") {
            Arc::new(MemoryRepository::new())
        } else {
            open_durable_store(&dsn).await?
        };

        let session = Session::new(config, store)?;
        info!(session = %session.id(), "session created");
        self.sessions.insert(session.id(), Arc::clone(&session));
        Ok(session)
    }

    /// Registers an externally built session (tests, embedders).
    pub fn adopt(&self, session: Arc<Session>) {
        self.sessions.insert(session.id(), session);
    }

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|s| Arc::clone(s.value()))
    }

    /// Snapshot of all live sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|s| Arc::clone(s.value())).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Cancels one session: waits (bounded) for in-flight work items to
    /// complete, then releases resources deterministically and removes the
    /// session from the registry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown id.
    pub async fn cancel_session(&self, id: Uuid) -> Result<()> {
        let Some((_, session)) = self.sessions.remove(&id) else {
            return Err(EngineError::NotFound(format!("session {id}")));
        };

        session.kill();
        let deadline = tokio::time::Instant::now() + DRAIN_GRACE;
        while !session.stats().is_drained() {
            if tokio::time::Instant::now() >= deadline {
                session.log("warn", "drain grace expired with in-flight work items");
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }

        session.finish().await;
        info!(session = %id, "session cancelled");
        Ok(())
    }

    /// Cancels every session in parallel.
    pub async fn shutdown(self: &Arc<Self>) {
        let ids: Vec<Uuid> = self.sessions.iter().map(|s| *s.key()).collect();
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            let manager = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let _ = manager.cancel_session(id).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "sqlite")]
async fn open_durable_store(dsn: &str) -> Result<Arc<dyn Repository>> {
    let store = crate::repository::SqlRepository::open(dsn)
        .await
        .map_err(|e| EngineError::Fatal(format!("store open: {e}")))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_durable_store(dsn: &str) -> Result<Arc<dyn Repository>> {
    Err(EngineError::Fatal(format!(
        "no durable store backend compiled in for DSN {dsn}"
    )))
}
