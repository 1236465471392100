//! BGP/netblock plugin.
//!
//! For an address outside the session's CIDR ranger, queries the
//! BGP-WHOIS collaborator (rate-limited to one request per second),
//! upserts the announced `Netblock` and its `AutonomousSystem`, links
//! `announces` (AS -> netblock) and `contains` (netblock -> address),
//! inserts the prefix into the ranger, and sweeps the neighbourhood.

use std::sync::Arc;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use surveyor_core::{label, Asset, AssetType, AutonomousSystem, Netblock, Property, Relation};
use tracing::debug;

use super::clients::BgpClient;
use super::support::{
    asset_monitored_within_ttl, ip_address_sweep, mark_asset_monitored, ttl_start_time,
    SWEEP_MAX_DEFAULT,
};
use super::Plugin;
use crate::dispatch::{callback, Event, Handler, HandlerRegistry};
use crate::error::EngineError;
use crate::repository::{Link, Repository};
use crate::session::RangerEntry;

/// Outbound BGP-WHOIS requests per second.
const REQUESTS_PER_SECOND: u32 = 1;

/// The BGP/netblock plugin.
pub struct NetblockPlugin {
    client: Arc<dyn BgpClient>,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl NetblockPlugin {
    #[must_use]
    pub fn new(client: Arc<dyn BgpClient>) -> Self {
        let quota = Quota::per_second(
            std::num::NonZeroU32::new(REQUESTS_PER_SECOND).expect("nonzero quota"),
        );
        Self {
            client,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }
}

impl Plugin for NetblockPlugin {
    fn name(&self) -> &'static str {
        "netblock"
    }

    fn start(&self, registry: &HandlerRegistry) -> anyhow::Result<()> {
        let client = Arc::clone(&self.client);
        let limiter = Arc::clone(&self.limiter);
        registry.register(Handler {
            plugin: "netblock".to_string(),
            name: "netblock-announce".to_string(),
            priority: 2,
            max_instances: 1,
            transforms: vec![
                "ip_address->netblock".to_string(),
                "ip_address->autonomous_system".to_string(),
            ],
            event_type: AssetType::IpAddress,
            callback: callback(move |event| {
                let client = Arc::clone(&client);
                let limiter = Arc::clone(&limiter);
                async move { handle_address(client.as_ref(), &limiter, &event).await }
            }),
        });
        Ok(())
    }
}

async fn handle_address(
    client: &dyn BgpClient,
    limiter: &DefaultDirectRateLimiter,
    event: &Event,
) -> Result<(), EngineError> {
    let Asset::IpAddress(ip) = &event.entity.asset else {
        return Ok(());
    };
    let session = &event.session;
    let config = session.config();

    // Already covered: the announcement is known, nothing to query.
    if session.ranger().contains(ip.address) {
        return Ok(());
    }

    let since = ttl_start_time(config, AssetType::IpAddress, AssetType::Netblock, "netblock");
    if asset_monitored_within_ttl(session, &event.entity.id, "netblock", since).await {
        return Ok(());
    }

    limiter.until_ready().await;
    let announcement = match client.announcement(ip.address).await {
        Ok(announcement) => announcement,
        Err(err) => {
            mark_asset_monitored(session, &event.entity.id, "netblock").await;
            return Err(EngineError::TransientIo(err.to_string()));
        }
    };
    mark_asset_monitored(session, &event.entity.id, "netblock").await;

    let Some(announcement) = announcement else {
        debug!(address = %ip.address, "no visible announcement");
        return Ok(());
    };

    let cache = session.cache();
    let netblock = cache
        .create_entity(Asset::Netblock(Netblock::new(announcement.prefix)))
        .await
        .map_err(EngineError::Other)?;
    let autonomous_system = cache
        .create_entity(Asset::AutonomousSystem(AutonomousSystem::new(
            announcement.asn,
        )))
        .await
        .map_err(EngineError::Other)?;

    for (from, to, name) in [
        (&autonomous_system.id, &netblock.id, label::ANNOUNCES),
        (&netblock.id, &event.entity.id, label::CONTAINS),
    ] {
        let edge = cache
            .link(Link {
                relation: Relation::simple(name),
                from_entity: from.clone(),
                to_entity: to.clone(),
            })
            .await
            .map_err(EngineError::Other)?;
        let _ = cache
            .create_edge_tag(&edge.id, Property::source("netblock", 100))
            .await;
    }
    let _ = cache
        .create_entity_tag(
            &autonomous_system.id,
            Property::simple("as_name", announcement.as_name.clone()),
        )
        .await;

    // Idempotent: re-announcing an existing prefix replaces its entry.
    session.ranger().insert(RangerEntry {
        cidr: announcement.prefix,
        asn: announcement.asn,
        source: "netblock".to_string(),
    });

    // Dispatch the announcement entities, then walk the neighbourhood.
    for entity in [netblock, autonomous_system] {
        event.dispatcher.dispatch(Event::for_entity(
            entity,
            Arc::clone(session),
            event.dispatcher.clone(),
        ));
    }
    ip_address_sweep(event, ip.address, "netblock", SWEEP_MAX_DEFAULT).await;
    Ok(())
}
