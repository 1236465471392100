//! The engine facade: plugins, registry, dispatcher and sessions wired
//! together with one startup and one shutdown path.

use std::sync::Arc;

use surveyor_core::{Asset, AutonomousSystem, Fqdn, IpAddress, Netblock};
use tracing::info;

use crate::config::EngineConfig;
use crate::dispatch::{DispatchHandle, Dispatcher, DispatcherParams, Event, HandlerRegistry};
use crate::error::Result;
use crate::plugins::Plugin;
use crate::repository::Repository;
use crate::session::{Session, SessionManager};

/// A running engine instance.
pub struct Engine {
    manager: Arc<SessionManager>,
    registry: Arc<HandlerRegistry>,
    dispatcher: Dispatcher,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl Engine {
    /// Starts the engine: every plugin registers its handlers, then the
    /// dispatcher comes up with one pipeline per asset type.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::EngineError::Fatal`] when a plugin fails to
    /// start.
    pub fn start(plugins: Vec<Arc<dyn Plugin>>, params: DispatcherParams) -> Result<Self> {
        let registry = Arc::new(HandlerRegistry::new());
        for plugin in &plugins {
            plugin
                .start(registry.as_ref())
                .map_err(|e| crate::error::EngineError::Fatal(format!(
                    "plugin {}: {e}",
                    plugin.name()
                )))?;
            info!(plugin = plugin.name(), "plugin started");
        }

        let manager = Arc::new(SessionManager::new());
        let dispatcher = Dispatcher::new(registry.as_ref(), Arc::clone(&manager), params);
        Ok(Self {
            manager,
            registry,
            dispatcher,
            plugins,
        })
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn dispatch_handle(&self) -> DispatchHandle {
        self.dispatcher.handle()
    }

    /// Creates a session from `config` and dispatches its seed assets.
    ///
    /// # Errors
    ///
    /// Propagates session-creation failures.
    pub async fn launch_session(&self, config: EngineConfig) -> Result<Arc<Session>> {
        let session = self.manager.new_session(config).await?;
        let seeded = self.seed_session(&session).await;
        session.log("info", format!("session seeded with {seeded} assets"));
        Ok(session)
    }

    /// Creates entities for the session's configured seed scope and
    /// dispatches one event per seed. Returns the number dispatched.
    pub async fn seed_session(&self, session: &Arc<Session>) -> usize {
        let seed = session.config().scope.clone();
        let mut assets: Vec<Asset> = Vec::new();

        for domain in &seed.domains {
            if let Ok(fqdn) = Fqdn::new(domain) {
                assets.push(Asset::Fqdn(fqdn));
            }
        }
        for cidr in &seed.cidrs {
            if let Ok(netblock) = Netblock::parse(cidr) {
                assets.push(Asset::Netblock(netblock));
            }
        }
        for address in &seed.addresses {
            if let Ok(ip) = IpAddress::parse(address) {
                assets.push(Asset::IpAddress(ip));
            }
        }
        for asn in &seed.asns {
            assets.push(Asset::AutonomousSystem(AutonomousSystem::new(*asn)));
        }

        let handle = self.dispatcher.handle();
        let mut dispatched = 0;
        for asset in assets {
            match session.cache().create_entity(asset).await {
                Ok(entity) => {
                    if handle.dispatch(Event::for_entity(
                        entity,
                        Arc::clone(session),
                        handle.clone(),
                    )) {
                        dispatched += 1;
                    }
                }
                Err(err) => session.log("warn", format!("seed entity: {err}")),
            }
        }
        dispatched
    }

    /// Stops the dispatcher, cancels every session in parallel, and stops
    /// the plugins, in that order.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        self.manager.shutdown().await;
        for plugin in &self.plugins {
            plugin.stop().await;
        }
        info!("engine stopped");
    }
}

/// Convenience for embedders: a repository handle usable outside any
/// session (exports, offline queries).
///
/// # Errors
///
/// Returns an error when the store cannot be opened or no backend is
/// compiled in for the DSN.
pub async fn open_store(config: &EngineConfig) -> anyhow::Result<Arc<dyn Repository>> {
    let dsn = config.resolved_store_dsn();
    if dsn.starts_with("memory://") {
        return Ok(Arc::new(crate::repository::MemoryRepository::new()));
    }
    open_durable_store(&dsn).await
}

#[cfg(feature = "sqlite")]
async fn open_durable_store(dsn: &str) -> anyhow::Result<Arc<dyn Repository>> {
    let store = crate::repository::SqlRepository::open(dsn).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_durable_store(dsn: &str) -> anyhow::Result<Arc<dyn Repository>> {
    anyhow::bail!("no durable store backend compiled in for DSN {dsn}")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use surveyor_core::AssetType;

    use super::*;
    use crate::config::ScopeSeed;

    fn memory_config(domains: &[&str]) -> EngineConfig {
        EngineConfig {
            scope: ScopeSeed {
                domains: domains.iter().map(ToString::to_string).collect(),
                ..ScopeSeed::default()
            },
            store_dsn: "memory://".to_string(),
            output_dir: std::env::temp_dir().display().to_string(),
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn engine_with_no_plugins_idles_and_stops() {
        let engine = Engine::start(Vec::new(), DispatcherParams::default()).expect("start");
        let session = engine
            .launch_session(memory_config(&[]))
            .await
            .expect("session");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.stats().work_items_total(), 0);
        assert_eq!(session.stats().work_items_completed(), 0);

        tokio::time::timeout(Duration::from_secs(5), engine.shutdown())
            .await
            .expect("bounded shutdown");
    }

    #[tokio::test]
    async fn seeds_become_entities_and_events() {
        let engine = Engine::start(Vec::new(), DispatcherParams::default()).expect("start");
        let session = engine
            .launch_session(memory_config(&["example.com"]))
            .await
            .expect("session");

        let fqdns = session
            .cache()
            .find_entities_by_type(AssetType::Fqdn, 0)
            .await
            .expect("query");
        assert_eq!(fqdns.len(), 1);
        assert_eq!(fqdns[0].asset.key(), "example.com");

        // The empty pipeline completes the seed event.
        for _ in 0..100 {
            if session.stats().is_drained() && session.stats().work_items_total() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(session.stats().work_items_total(), 1);
        engine.shutdown().await;
    }
}
