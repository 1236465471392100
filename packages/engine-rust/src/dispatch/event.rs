//! Events flowing between plugins, the dispatcher and the pipelines.

use std::sync::Arc;

use surveyor_core::Entity;
use tokio::sync::mpsc;

use crate::session::Session;

/// A unit of work: one entity observed in the context of one session.
#[derive(Clone)]
pub struct Event {
    /// Human-readable event name, conventionally `<type>:<key>`.
    pub name: String,
    /// The entity to process.
    pub entity: Entity,
    /// Plugin-supplied metadata. Events carrying metadata bypass the
    /// queue-fill path and enter their pipeline directly.
    pub meta: Option<serde_json::Value>,
    /// The session this event belongs to.
    pub session: Arc<Session>,
    /// Handle for dispatching follow-up events.
    pub dispatcher: DispatchHandle,
}

impl Event {
    /// Builds an event named after the entity.
    #[must_use]
    pub fn for_entity(entity: Entity, session: Arc<Session>, dispatcher: DispatchHandle) -> Self {
        let name = format!("{}:{}", entity.asset.asset_type(), entity.asset.key());
        Self {
            name,
            entity,
            meta: None,
            session,
            dispatcher,
        }
    }

    /// Attaches metadata, marking the event for direct pipeline entry.
    #[must_use]
    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("session", &self.session.id())
            .field("has_meta", &self.meta.is_some())
            .finish()
    }
}

/// An event wrapped with its processing outcome, passed along pipeline
/// stages and finally to the dispatcher's completion channel.
#[derive(Debug)]
pub struct EventDataElement {
    pub event: Event,
    /// The last handler error, if any. Errors never halt the pipeline.
    pub error: Option<String>,
}

impl EventDataElement {
    #[must_use]
    pub fn new(event: Event) -> Self {
        Self { event, error: None }
    }
}

/// Cloneable handle plugins use to submit events for admission.
///
/// Directly dispatched events are always admitted (subject to dedup); the
/// admission cost is paid by the session work queue, not the pipeline.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl DispatchHandle {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    /// Submits an event to the dispatcher. Returns `false` when the
    /// dispatcher has shut down.
    pub fn dispatch(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }

    /// A handle wired to nowhere, for tests that never dispatch.
    #[must_use]
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }
}
