//! Event admission and pipeline feeding.
//!
//! The dispatcher owns two channels: `dispatch` (events submitted by
//! plugins and seeders) and `complete` (elements that finished their
//! pipeline). Its loop:
//!
//! 1. every second, refills per-type pipelines from session work queues,
//!    giving each session a fair share of the high watermark;
//! 2. every ten seconds, samples process memory and relieves pressure by
//!    flushing session caches when growth exceeds the guard threshold;
//! 3. drains `dispatch`: admission checks, dedup, accounting, and either
//!    direct pipeline entry (metadata events, shallow pipelines) or the
//!    session work queue;
//! 4. drains `complete`: completion accounting and per-event error
//!    logging.
//!
//! Per-event errors never stop the loop; only `shutdown()` does.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::counter;
use surveyor_core::AssetType;
use sysinfo::{ProcessesToUpdate, System};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::event::{DispatchHandle, Event, EventDataElement};
use super::pipeline::Pipeline;
use super::registry::HandlerRegistry;
use crate::repository::Repository;
use crate::session::SessionManager;

/// Interval between pipeline refills.
const FILL_INTERVAL: Duration = Duration::from_secs(1);
/// Interval between memory samples.
const MEMORY_INTERVAL: Duration = Duration::from_secs(10);
/// Process growth beyond which the guard flushes session caches.
const MEMORY_GUARD_BYTES: u64 = 500 * 1024 * 1024;

/// Watermarks and defaults the dispatcher operates with.
#[derive(Debug, Clone)]
pub struct DispatcherParams {
    /// Refill triggers for pipelines below this depth.
    pub min_pipeline_queue_size: usize,
    /// Fair-share numerator for refill batches; also the logical pipeline
    /// bound the watermarks enforce.
    pub max_pipeline_queue_size: usize,
    /// Stage width for handlers that do not set their own cap.
    pub default_max_instances: usize,
}

impl Default for DispatcherParams {
    fn default() -> Self {
        Self {
            min_pipeline_queue_size: 100,
            max_pipeline_queue_size: 500,
            default_max_instances: 4,
        }
    }
}

/// The engine-wide event dispatcher.
pub struct Dispatcher {
    handle: DispatchHandle,
    done: watch::Sender<bool>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

struct Loop {
    manager: Arc<SessionManager>,
    pipelines: DashMap<AssetType, Pipeline>,
    params: DispatcherParams,
    handle: DispatchHandle,
}

impl Dispatcher {
    /// Builds every per-type pipeline from the registry and starts the
    /// dispatcher loop.
    #[must_use]
    pub fn new(
        registry: &HandlerRegistry,
        manager: Arc<SessionManager>,
        params: DispatcherParams,
    ) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (complete_tx, complete_rx) = mpsc::unbounded_channel();
        let handle = DispatchHandle::new(dispatch_tx);

        let pipelines = DashMap::new();
        for asset_type in AssetType::ALL {
            pipelines.insert(
                asset_type,
                Pipeline::new(
                    registry.handlers_for(asset_type),
                    params.default_max_instances,
                    complete_tx.clone(),
                ),
            );
        }

        let (done, done_rx) = watch::channel(false);
        let state = Loop {
            manager,
            pipelines,
            params,
            handle: handle.clone(),
        };
        let worker = tokio::spawn(state.run(dispatch_rx, complete_rx, done_rx));

        Self {
            handle,
            done,
            worker: parking_lot::Mutex::new(Some(worker)),
        }
    }

    /// A cloneable handle for submitting events.
    #[must_use]
    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// Stops the loop. Remaining completions are handled by the session
    /// manager's cancellation path.
    pub async fn shutdown(&self) {
        let _ = self.done.send(true);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Loop {
    async fn run(
        self,
        mut dispatch_rx: mpsc::UnboundedReceiver<Event>,
        mut complete_rx: mpsc::UnboundedReceiver<EventDataElement>,
        mut done_rx: watch::Receiver<bool>,
    ) {
        let mut fill = tokio::time::interval(FILL_INTERVAL);
        let mut memory = tokio::time::interval(MEMORY_INTERVAL);
        let mut system = System::new();
        let mut memory_mark: u64 = 0;

        loop {
            tokio::select! {
                _ = done_rx.changed() => {
                    if *done_rx.borrow() {
                        return;
                    }
                }
                Some(event) = dispatch_rx.recv() => {
                    self.admit(event);
                }
                Some(element) = complete_rx.recv() => {
                    Self::complete(&element);
                }
                _ = fill.tick() => {
                    self.fill_pipelines().await;
                }
                _ = memory.tick() => {
                    memory_mark = self.memory_guard(&mut system, memory_mark).await;
                }
            }
        }
    }

    /// Admission: reject dead sessions and duplicates, account the work
    /// item, choose direct pipeline entry or the session queue.
    fn admit(&self, event: Event) {
        if event.session.is_done() {
            debug!(event = %event.name, "rejected: session finished");
            return;
        }
        if event.session.queue().has(&event.entity.id) {
            debug!(event = %event.name, "rejected: already queued");
            return;
        }

        let asset_type = event.entity.asset.asset_type();
        event.session.stats().add_work_item();
        counter!("surveyor_events_admitted").increment(1);

        let Some(pipeline) = self.pipelines.get(&asset_type) else {
            event.session.stats().complete_work_item();
            return;
        };

        if event.meta.is_some() || pipeline.depth() < self.params.min_pipeline_queue_size {
            pipeline.append(EventDataElement::new(event));
        } else if let Err(err) = event
            .session
            .queue()
            .append(asset_type, &event.entity.id)
        {
            event.session.log("warn", format!("work queue append: {err}"));
            event.session.stats().complete_work_item();
        }
    }

    /// Completion accounting; per-event errors are logged on the session.
    fn complete(element: &EventDataElement) {
        element.event.session.stats().complete_work_item();
        counter!("surveyor_events_completed").increment(1);
        if let Some(error) = &element.error {
            element
                .event
                .session
                .log("warn", format!("{}: {error}", element.event.name));
        }
    }

    /// Moves queued entities into shallow pipelines, a fair share per
    /// session.
    async fn fill_pipelines(&self) {
        let sessions = self.manager.sessions();
        if sessions.is_empty() {
            return;
        }
        let share = (self.params.max_pipeline_queue_size / sessions.len()).max(1);

        for session in sessions {
            if session.is_done() {
                continue;
            }
            for asset_type in AssetType::ALL {
                let Some(pipeline) = self.pipelines.get(&asset_type) else {
                    continue;
                };
                if pipeline.depth() >= self.params.min_pipeline_queue_size {
                    continue;
                }
                let ids = match session.queue().next(asset_type, share) {
                    Ok(ids) => ids,
                    Err(err) => {
                        session.log("warn", format!("work queue read: {err}"));
                        continue;
                    }
                };
                for id in ids {
                    match session.cache().find_entity_by_id(&id).await {
                        Ok(Some(entity)) => {
                            pipeline.append(EventDataElement::new(Event::for_entity(
                                entity,
                                Arc::clone(&session),
                                self.handle.clone(),
                            )));
                        }
                        // The entity vanished between queueing and refill:
                        // account it as completed so the session drains.
                        _ => session.stats().complete_work_item(),
                    }
                }
            }
        }
    }

    /// Samples process memory; on growth beyond the guard threshold,
    /// flushes session caches to shed deferred state.
    async fn memory_guard(&self, system: &mut System, mark: u64) -> u64 {
        let Ok(pid) = sysinfo::get_current_pid() else {
            return mark;
        };
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let Some(process) = system.process(pid) else {
            return mark;
        };
        let rss = process.memory();

        if mark == 0 {
            return rss;
        }
        if rss > mark.saturating_add(MEMORY_GUARD_BYTES) {
            warn!(rss, mark, "memory guard tripped, flushing session caches");
            for session in self.manager.sessions() {
                session.cache().flush().await;
            }
            return rss;
        }
        mark
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use surveyor_core::{Asset, Fqdn};

    use super::*;
    use crate::config::EngineConfig;
    use crate::dispatch::registry::{callback, Handler};
    use crate::error::EngineError;
    use crate::session::Session;

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn idle_dispatcher_has_no_work_items_and_stops() {
        let registry = HandlerRegistry::new();
        let manager = Arc::new(SessionManager::new());
        let session = Session::ephemeral(EngineConfig::default());
        manager.adopt(Arc::clone(&session));

        let dispatcher = Dispatcher::new(&registry, manager, DispatcherParams::default());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(session.stats().work_items_total(), 0);
        assert_eq!(session.stats().work_items_completed(), 0);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn dispatched_event_reaches_handler_and_completes() {
        let registry = HandlerRegistry::new();
        let hits = Arc::new(AtomicU32::new(0));
        let hits_in_handler = Arc::clone(&hits);
        registry.register(Handler {
            plugin: "test".to_string(),
            name: "count".to_string(),
            priority: 1,
            max_instances: 1,
            transforms: Vec::new(),
            event_type: surveyor_core::AssetType::Fqdn,
            callback: callback(move |_event| {
                let hits = Arc::clone(&hits_in_handler);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        });

        let manager = Arc::new(SessionManager::new());
        let session = Session::ephemeral(EngineConfig::default());
        manager.adopt(Arc::clone(&session));
        let dispatcher = Dispatcher::new(&registry, Arc::clone(&manager), DispatcherParams::default());

        let entity = session
            .cache()
            .create_entity(Asset::Fqdn(Fqdn::new("example.com").expect("valid")))
            .await
            .expect("create");
        let event = Event::for_entity(entity, Arc::clone(&session), dispatcher.handle());
        assert!(dispatcher.handle().dispatch(event));

        wait_for(|| session.stats().work_items_completed() == 1).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(session.stats().work_items_total(), 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_queued_entity_is_rejected() {
        let registry = HandlerRegistry::new();
        let manager = Arc::new(SessionManager::new());
        let session = Session::ephemeral(EngineConfig::default());
        manager.adopt(Arc::clone(&session));

        // Tiny watermark forces the queue path so dedup is observable.
        let params = DispatcherParams {
            min_pipeline_queue_size: 0,
            ..DispatcherParams::default()
        };
        let dispatcher = Dispatcher::new(&registry, Arc::clone(&manager), params);

        let entity = session
            .cache()
            .create_entity(Asset::Fqdn(Fqdn::new("dup.example.com").expect("valid")))
            .await
            .expect("create");

        let first = Event::for_entity(entity.clone(), Arc::clone(&session), dispatcher.handle());
        let second = Event::for_entity(entity, Arc::clone(&session), dispatcher.handle());
        dispatcher.handle().dispatch(first);
        wait_for(|| session.queue().len() == 1).await;
        dispatcher.handle().dispatch(second);

        // Only one admission was counted.
        wait_for(|| session.stats().work_items_total() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.stats().work_items_total(), 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn events_for_dead_sessions_are_dropped() {
        let registry = HandlerRegistry::new();
        let manager = Arc::new(SessionManager::new());
        let session = Session::ephemeral(EngineConfig::default());
        manager.adopt(Arc::clone(&session));
        let dispatcher = Dispatcher::new(&registry, manager, DispatcherParams::default());

        let entity = session
            .cache()
            .create_entity(Asset::Fqdn(Fqdn::new("late.example.com").expect("valid")))
            .await
            .expect("create");
        session.kill();
        dispatcher
            .handle()
            .dispatch(Event::for_entity(entity, Arc::clone(&session), dispatcher.handle()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.stats().work_items_total(), 0);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_terminates_promptly() {
        let registry = HandlerRegistry::new();
        let manager = Arc::new(SessionManager::new());
        let dispatcher = Dispatcher::new(&registry, manager, DispatcherParams::default());

        tokio::time::timeout(Duration::from_secs(2), dispatcher.shutdown())
            .await
            .expect("shutdown finished in bounded time");
    }
}
