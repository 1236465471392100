//! Framework helpers every plugin leans on: TTL windows, monitor tags,
//! the standard finding-emission path, and neighbour sweeps.

use std::net::IpAddr;
use std::sync::Arc;

use surveyor_core::{
    neighbors, now_millis, Asset, AssetType, Cidr, Entity, IpAddress, Property, Relation,
    UnixMillis,
};
use tracing::debug;

use crate::config::EngineConfig;
use crate::dispatch::Event;
use crate::repository::{Link, Repository};
use crate::session::Session;

/// Neighbour-sweep cap for passive collection.
pub const SWEEP_MAX_DEFAULT: usize = 100;
/// Neighbour-sweep cap when active probing is enabled.
pub const SWEEP_MAX_ACTIVE: usize = 250;

/// Fallback prefix length when no announcement covers a swept address.
const SWEEP_FALLBACK_V4_PREFIX: u8 = 24;
const SWEEP_FALLBACK_V6_PREFIX: u8 = 120;

/// The earliest `last_seen` that still counts as fresh for the transform
/// `from -> to` as executed by `plugin`.
#[must_use]
pub fn ttl_start_time(
    config: &EngineConfig,
    from: AssetType,
    to: AssetType,
    plugin: &str,
) -> UnixMillis {
    let minutes = config.ttl_minutes(from.as_str(), to.as_str(), plugin);
    let window = i64::try_from(minutes).unwrap_or(i64::MAX / 60_000) * 60_000;
    now_millis().saturating_sub(window)
}

fn monitor_tag(source: &str) -> String {
    format!("monitor:{source}")
}

/// Whether `source` already processed this entity within the TTL window.
/// Plugins MUST consult this before external I/O.
pub async fn asset_monitored_within_ttl(
    session: &Session,
    entity_id: &str,
    source: &str,
    since: UnixMillis,
) -> bool {
    let name = monitor_tag(source);
    match session
        .cache()
        .get_entity_tags(entity_id, since, &[&name])
        .await
    {
        Ok(tags) => !tags.is_empty(),
        // A failed lookup counts as "not monitored": the worst case is
        // one redundant query.
        Err(_) => false,
    }
}

/// Records that `source` processed this entity now. Also called after
/// external failures so broken targets do not hot-loop.
///
/// The tag value is constant; freshness lives in the tag's `last_seen`,
/// which the repository refreshes on every re-mark.
pub async fn mark_asset_monitored(session: &Session, entity_id: &str, source: &str) {
    let property = Property::simple(monitor_tag(source), "monitored");
    if let Err(err) = session.cache().create_entity_tag(entity_id, property).await {
        debug!(entity = %entity_id, source, error = %err, "monitor tag write failed");
    }
}

/// One discovered relation to emit: an existing `from` entity, the asset
/// observed behind it, and the relation between the two.
#[derive(Debug, Clone)]
pub struct Finding {
    pub from_entity: String,
    pub from_name: String,
    pub to: Asset,
    pub to_name: String,
    pub relation: Relation,
}

impl Finding {
    /// Shapes a finding rooted at the event's entity.
    #[must_use]
    pub fn from_event(event: &Event, to: Asset, relation: Relation) -> Self {
        Self {
            from_entity: event.entity.id.clone(),
            from_name: event.entity.asset.key(),
            to_name: to.key(),
            to,
            relation,
        }
    }
}

/// The standard emission path: for each finding, upsert the target
/// entity, link the edge, attach the source property to both, and
/// dispatch a follow-up event for the target.
///
/// Returns the created/refreshed target entities. Individual failures are
/// logged and skipped; one bad finding never voids the batch.
pub async fn process_assets_with_source(
    event: &Event,
    findings: Vec<Finding>,
    source: &str,
    confidence: u8,
) -> Vec<Entity> {
    let cache = event.session.cache();
    let mut created = Vec::with_capacity(findings.len());

    for finding in findings {
        let to_entity = match cache.create_entity(finding.to.clone()).await {
            Ok(entity) => entity,
            Err(err) => {
                event
                    .session
                    .log("warn", format!("finding target {}: {err}", finding.to_name));
                continue;
            }
        };

        let edge = cache
            .link(Link {
                relation: finding.relation.clone(),
                from_entity: finding.from_entity.clone(),
                to_entity: to_entity.id.clone(),
            })
            .await;
        match edge {
            Ok(edge) => {
                let _ = cache
                    .create_edge_tag(&edge.id, Property::source(source, confidence))
                    .await;
            }
            Err(err) => {
                event.session.log(
                    "warn",
                    format!("finding edge {} -> {}: {err}", finding.from_name, finding.to_name),
                );
                continue;
            }
        }
        let _ = cache
            .create_entity_tag(&to_entity.id, Property::source(source, confidence))
            .await;

        let child = Event::for_entity(
            to_entity.clone(),
            Arc::clone(&event.session),
            event.dispatcher.clone(),
        );
        event.dispatcher.dispatch(child);
        created.push(to_entity);
    }
    created
}

/// Enumerates neighbour addresses of `ip` inside its hosting netblock
/// (the ranger's longest match, or a fallback prefix when nothing
/// announces it), creating and dispatching an `IpAddress` entity per
/// neighbour. `size` is clamped to [`SWEEP_MAX_ACTIVE`].
///
/// Returns the number of addresses submitted.
pub async fn ip_address_sweep(event: &Event, ip: IpAddr, source: &str, size: usize) -> usize {
    let cidr = match event.session.ranger().longest_match(ip) {
        Some(entry) => entry.cidr,
        None => {
            let fallback = if ip.is_ipv4() {
                SWEEP_FALLBACK_V4_PREFIX
            } else {
                SWEEP_FALLBACK_V6_PREFIX
            };
            match Cidr::new(ip, fallback) {
                Ok(cidr) => cidr,
                Err(_) => return 0,
            }
        }
    };

    let capped = size.min(SWEEP_MAX_ACTIVE);
    let mut submitted = 0;
    for neighbour in neighbors(ip, &cidr, capped) {
        let finding = Finding {
            from_entity: event.entity.id.clone(),
            from_name: event.entity.asset.key(),
            to: Asset::IpAddress(IpAddress::new(neighbour)),
            to_name: neighbour.to_string(),
            relation: Relation::simple(surveyor_core::label::CONTAINS),
        };
        // Sweep neighbours hang off the netblock when the trigger was one;
        // for IP triggers the contains edge still records adjacency via
        // the shared block entity created by the netblock plugin.
        submitted += usize::from(
            !process_assets_with_source(event, vec![finding], source, 30)
                .await
                .is_empty(),
        );
    }
    submitted
}
