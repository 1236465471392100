//! Handler registration, keyed by asset type.
//!
//! A handler is a single record with a boxed async closure; plugins
//! register as many as they need. Per type, handlers run as ordered
//! pipeline stages, lower priority first.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use std::collections::HashMap;
use surveyor_core::AssetType;

use super::event::Event;
use crate::error::EngineError;

/// The future a handler callback returns.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send>>;

/// Type-erased async handler callback.
pub type HandlerCallback = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

/// One registered handler.
#[derive(Clone)]
pub struct Handler {
    /// Owning plugin name.
    pub plugin: String,
    /// Handler name, unique within the plugin.
    pub name: String,
    /// Stage ordering; lower runs earlier.
    pub priority: u8,
    /// Concurrent invocations allowed inside this handler's stage.
    /// 0 selects the engine default.
    pub max_instances: usize,
    /// Transform names this handler implements (`from->to`), for TTL
    /// resolution and reporting.
    pub transforms: Vec<String>,
    /// The asset type whose pipeline this handler joins.
    pub event_type: AssetType,
    pub callback: HandlerCallback,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("plugin", &self.plugin)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("event_type", &self.event_type)
            .finish()
    }
}

/// Registry of handlers, grouped per asset type and priority-sorted.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<AssetType, Vec<Handler>>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a handler, keeping its type's stage list priority-sorted.
    /// Registration order breaks ties.
    pub fn register(&self, handler: Handler) {
        let mut handlers = self.handlers.write();
        let stages = handlers.entry(handler.event_type).or_default();
        let position = stages
            .iter()
            .position(|existing| existing.priority > handler.priority)
            .unwrap_or(stages.len());
        stages.insert(position, handler);
    }

    /// The priority-sorted handler stages for one asset type.
    #[must_use]
    pub fn handlers_for(&self, asset_type: AssetType) -> Vec<Handler> {
        self.handlers
            .read()
            .get(&asset_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Asset types with at least one handler registered.
    #[must_use]
    pub fn registered_types(&self) -> Vec<AssetType> {
        self.handlers.read().keys().copied().collect()
    }

    /// Total number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a handler callback from an async closure without the
/// boxing noise at call sites.
pub fn callback<F, Fut>(f: F) -> HandlerCallback
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), EngineError>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler(plugin: &str, name: &str, priority: u8, event_type: AssetType) -> Handler {
        Handler {
            plugin: plugin.to_string(),
            name: name.to_string(),
            priority,
            max_instances: 0,
            transforms: Vec::new(),
            event_type,
            callback: callback(|_event| async { Ok(()) }),
        }
    }

    #[test]
    fn handlers_sorted_by_priority() {
        let registry = HandlerRegistry::new();
        registry.register(noop_handler("p", "late", 9, AssetType::Fqdn));
        registry.register(noop_handler("p", "early", 1, AssetType::Fqdn));
        registry.register(noop_handler("p", "middle", 5, AssetType::Fqdn));

        let names: Vec<String> = registry
            .handlers_for(AssetType::Fqdn)
            .into_iter()
            .map(|h| h.name)
            .collect();
        assert_eq!(names, vec!["early", "middle", "late"]);
    }

    #[test]
    fn equal_priority_keeps_registration_order() {
        let registry = HandlerRegistry::new();
        registry.register(noop_handler("p", "first", 3, AssetType::IpAddress));
        registry.register(noop_handler("p", "second", 3, AssetType::IpAddress));

        let names: Vec<String> = registry
            .handlers_for(AssetType::IpAddress)
            .into_iter()
            .map(|h| h.name)
            .collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn types_partition_handlers() {
        let registry = HandlerRegistry::new();
        registry.register(noop_handler("p", "a", 1, AssetType::Fqdn));
        registry.register(noop_handler("p", "b", 1, AssetType::Netblock));

        assert_eq!(registry.handlers_for(AssetType::Fqdn).len(), 1);
        assert_eq!(registry.handlers_for(AssetType::Netblock).len(), 1);
        assert!(registry.handlers_for(AssetType::Url).is_empty());
        assert_eq!(registry.len(), 2);
    }
}
