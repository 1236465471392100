//! Per-run session state and lifecycle.
//!
//! One session per enumeration run. The session owns the scope, the
//! write-back cache in front of its durable store handle, the CIDR ranger,
//! the per-type work queue (durable under the session directory), the
//! work-item counters the dispatcher reports into, and the structured log
//! bus. `kill()` flips the done channel; every engine loop observes it at
//! its next suspension point.

mod manager;
mod queue;
mod ranger;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tracing::warn;
use uuid::Uuid;

pub use manager::SessionManager;
pub use queue::WorkQueue;
pub use ranger::{CidrRanger, RangerEntry};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::logging::{LogBus, LogRecord};
use crate::repository::{CacheRepository, MemoryRepository, Repository};
use crate::scope::Scope;

/// Session lifecycle state, transitioned lock-free.
///
/// State machine: Running -> Draining -> Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting and processing events.
    Running,
    /// Kill observed; in-flight events drain, nothing new is admitted.
    Draining,
    /// Resources released.
    Stopped,
}

/// Work-item accounting the dispatcher and API read.
#[derive(Debug, Default)]
pub struct SessionStats {
    total: AtomicU64,
    completed: AtomicU64,
}

impl SessionStats {
    pub fn add_work_item(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn complete_work_item(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn work_items_total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn work_items_completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Whether everything admitted has been completed.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.work_items_completed() >= self.work_items_total()
    }
}

/// One enumeration run.
pub struct Session {
    id: Uuid,
    config: Arc<EngineConfig>,
    scope: Scope,
    store: Arc<dyn Repository>,
    cache: Arc<CacheRepository>,
    ranger: CidrRanger,
    queue: WorkQueue,
    dir: Option<PathBuf>,
    stats: SessionStats,
    log: LogBus,
    done: watch::Sender<bool>,
    state: ArcSwap<SessionState>,
}

impl Session {
    /// Creates a session: session directory, durable work queue, scope
    /// from the seed, cache in front of the given store handle.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Fatal`] when the session directory or the
    /// work queue cannot be created.
    pub fn new(config: EngineConfig, store: Arc<dyn Repository>) -> crate::error::Result<Arc<Self>> {
        let id = Uuid::new_v4();
        let dir = PathBuf::from(&config.output_dir).join(format!("session-{id}"));
        std::fs::create_dir_all(&dir)
            .map_err(|e| EngineError::Fatal(format!("session dir {}: {e}", dir.display())))?;
        let queue = WorkQueue::open(&dir.join("queue.db"))
            .map_err(|e| EngineError::Fatal(format!("work queue: {e}")))?;

        let scope = Scope::from_seed(&config.scope);
        let cache = Arc::new(CacheRepository::new(Arc::clone(&store)));
        let (done, _) = watch::channel(false);

        let session = Arc::new(Self {
            id,
            config: Arc::new(config),
            scope,
            store,
            cache,
            ranger: CidrRanger::new(),
            queue,
            dir: Some(dir),
            stats: SessionStats::default(),
            log: LogBus::new(),
            done,
            state: ArcSwap::from_pointee(SessionState::Running),
        });
        session.arm_timeout();
        Ok(session)
    }

    /// In-memory session for tests and embedders: memory store, memory
    /// queue, no session directory.
    #[must_use]
    pub fn ephemeral(config: EngineConfig) -> Arc<Self> {
        let store: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
        let scope = Scope::from_seed(&config.scope);
        let cache = Arc::new(CacheRepository::new(Arc::clone(&store)));
        let (done, _) = watch::channel(false);
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            config: Arc::new(config),
            scope,
            store,
            cache,
            ranger: CidrRanger::new(),
            queue: WorkQueue::in_memory(),
            dir: None,
            stats: SessionStats::default(),
            log: LogBus::new(),
            done,
            state: ArcSwap::from_pointee(SessionState::Running),
        });
        session.arm_timeout();
        session
    }

    /// Starts the wall-clock budget timer when one is configured.
    fn arm_timeout(self: &Arc<Self>) {
        let minutes = self.config.timeout_minutes;
        if minutes == 0 {
            return;
        }
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(minutes * 60)).await;
            if let Some(session) = weak.upgrade() {
                warn!(session = %session.id, "wall-clock budget expired, killing session");
                session.kill();
            }
        });
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The write-back cache; the repository plugins read and write.
    #[must_use]
    pub fn cache(&self) -> &Arc<CacheRepository> {
        &self.cache
    }

    /// The durable store underneath the cache.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Repository> {
        &self.store
    }

    #[must_use]
    pub fn ranger(&self) -> &CidrRanger {
        &self.ranger
    }

    #[must_use]
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    #[must_use]
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Publishes a structured record on the session bus (and the process
    /// sink).
    pub fn log(&self, level: &str, message: impl Into<String>) {
        self.log
            .publish(LogRecord::new(level, message, &self.id.to_string()));
    }

    /// Subscribes to this session's structured log stream.
    #[must_use]
    pub fn subscribe_logs(&self) -> tokio::sync::broadcast::Receiver<LogRecord> {
        self.log.subscribe()
    }

    /// Signals cancellation. Loops observe it at their next suspension
    /// point; resource release happens in [`Session::finish`].
    pub fn kill(&self) {
        self.state.store(Arc::new(SessionState::Draining));
        let _ = self.done.send(true);
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        **self.state.load()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// A receiver for the done channel, for `select!` arms.
    #[must_use]
    pub fn done_receiver(&self) -> watch::Receiver<bool> {
        self.done.subscribe()
    }

    /// Releases session resources deterministically: cache drained and
    /// closed, store closed, session directory (with `queue.db`) removed.
    pub async fn finish(&self) {
        self.kill();
        if let Err(err) = self.cache.close().await {
            self.log("warn", format!("cache close: {err}"));
        }
        if let Err(err) = self.store.close().await {
            self.log("warn", format!("store close: {err}"));
        }
        if let Some(dir) = &self.dir {
            if let Err(err) = std::fs::remove_dir_all(dir) {
                self.log("warn", format!("session dir removal: {err}"));
            }
        }
        self.state.store(Arc::new(SessionState::Stopped));
    }
}

#[cfg(test)]
mod tests {
    use surveyor_core::{Asset, Fqdn};

    use super::*;
    use crate::config::ScopeSeed;

    fn test_config(dir: &std::path::Path) -> EngineConfig {
        EngineConfig {
            scope: ScopeSeed {
                domains: vec!["example.com".to_string()],
                ..ScopeSeed::default()
            },
            output_dir: dir.display().to_string(),
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn session_creates_and_removes_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
        let session = Session::new(test_config(dir.path()), store).expect("session");

        let session_dir = dir.path().join(format!("session-{}", session.id()));
        assert!(session_dir.join("queue.db").exists());

        session.finish().await;
        assert!(!session_dir.exists());
    }

    #[tokio::test]
    async fn kill_flips_done() {
        let session = Session::ephemeral(EngineConfig::default());
        assert!(!session.is_done());
        session.kill();
        assert!(session.is_done());
    }

    #[tokio::test]
    async fn lifecycle_state_transitions() {
        let session = Session::ephemeral(EngineConfig::default());
        assert_eq!(session.state(), SessionState::Running);
        session.kill();
        assert_eq!(session.state(), SessionState::Draining);
        session.finish().await;
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn scope_seeded_from_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
        let session = Session::new(test_config(dir.path()), store).expect("session");

        let asset = Asset::Fqdn(Fqdn::new("www.example.com").expect("valid"));
        assert!(session.scope().is_asset_in_scope(&asset, 0.0).matched);
        session.finish().await;
    }

    #[tokio::test]
    async fn stats_accounting() {
        let session = Session::ephemeral(EngineConfig::default());
        assert!(session.stats().is_drained());
        session.stats().add_work_item();
        assert!(!session.stats().is_drained());
        session.stats().complete_work_item();
        assert!(session.stats().is_drained());
        assert_eq!(session.stats().work_items_total(), 1);
    }

    #[tokio::test]
    async fn finish_flushes_cache_to_store() {
        let store: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
        let dir = tempfile::tempdir().expect("tempdir");
        let session =
            Session::new(test_config(dir.path()), Arc::clone(&store)).expect("session");

        session
            .cache()
            .create_entity(Asset::Fqdn(Fqdn::new("persist.example.com").expect("valid")))
            .await
            .expect("create");
        session.finish().await;

        let found = store
            .find_entities_by_content(
                &Asset::Fqdn(Fqdn::new("persist.example.com").expect("valid")),
                0,
            )
            .await
            .expect("query");
        assert_eq!(found.len(), 1);
    }
}
