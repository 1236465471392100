//! DNS discovery plugin: forward resolution and record-to-graph mapping.
//!
//! For each in-scope FQDN event the plugin resolves CNAME, A and AAAA
//! records into edges (`cname_record`, `a_record`, `aaaa_record`), stores
//! TXT data as `dns_record` properties on the name, and dispatches the
//! discovered assets. Out-of-scope names are left to the horizontal
//! plugin.

use std::net::IpAddr;
use std::sync::Arc;

use surveyor_core::{
    rr_type, Asset, AssetType, DnsHeader, Fqdn, IpAddress, Property, Relation,
};
use tracing::debug;

use super::clients::DnsResolver;
use super::support::{
    asset_monitored_within_ttl, mark_asset_monitored, process_assets_with_source, ttl_start_time,
    Finding,
};
use super::Plugin;
use crate::dispatch::{callback, Event, Handler, HandlerRegistry};
use crate::error::EngineError;
use crate::repository::Repository;

/// Longest CNAME chain the resolver walk follows.
const MAX_CNAME_CHAIN: usize = 10;

/// The DNS discovery plugin.
pub struct DnsPlugin {
    resolver: Arc<dyn DnsResolver>,
}

impl DnsPlugin {
    #[must_use]
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self { resolver }
    }
}

impl Plugin for DnsPlugin {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn start(&self, registry: &HandlerRegistry) -> anyhow::Result<()> {
        let resolver = Arc::clone(&self.resolver);
        registry.register(Handler {
            plugin: "dns".to_string(),
            name: "dns-resolve".to_string(),
            priority: 1,
            max_instances: 0,
            transforms: vec![
                "fqdn->fqdn".to_string(),
                "fqdn->ip_address".to_string(),
            ],
            event_type: AssetType::Fqdn,
            callback: callback(move |event| {
                let resolver = Arc::clone(&resolver);
                async move { handle_fqdn(resolver.as_ref(), &event).await }
            }),
        });
        Ok(())
    }
}

/// Resolves one in-scope FQDN event into graph findings.
async fn handle_fqdn(resolver: &dyn DnsResolver, event: &Event) -> Result<(), EngineError> {
    let Asset::Fqdn(fqdn) = &event.entity.asset else {
        return Ok(());
    };
    let session = &event.session;
    let config = session.config();

    if !session
        .scope()
        .is_asset_in_scope(&event.entity.asset, config.default_confidence)
        .matched
    {
        return Ok(());
    }

    let since = ttl_start_time(config, AssetType::Fqdn, AssetType::IpAddress, "dns");
    if asset_monitored_within_ttl(session, &event.entity.id, "dns", since).await {
        debug!(name = %fqdn.name(), "dns results still fresh");
        return Ok(());
    }

    let mut findings = Vec::new();
    let mut failure: Option<String> = None;

    // CNAME first: the chain target carries the address records.
    match resolver.lookup(fqdn.name(), rr_type::CNAME).await {
        Ok(records) => {
            for record in records {
                if let Ok(target) = Fqdn::new(&record.data) {
                    findings.push(Finding::from_event(
                        event,
                        Asset::Fqdn(target),
                        Relation::basic_dns("cname_record", rr_type::CNAME, record.ttl),
                    ));
                }
            }
        }
        Err(err) => failure = Some(err.to_string()),
    }

    for (query, label) in [(rr_type::A, "a_record"), (rr_type::AAAA, "aaaa_record")] {
        match resolver.lookup(fqdn.name(), query).await {
            Ok(records) => {
                for record in records {
                    if let Ok(address) = record.data.parse::<IpAddr>() {
                        findings.push(Finding::from_event(
                            event,
                            Asset::IpAddress(IpAddress::new(address)),
                            Relation::basic_dns(label, query, record.ttl),
                        ));
                    }
                }
            }
            Err(err) => failure = Some(err.to_string()),
        }
    }

    // TXT data lands as properties on the name itself; the service
    // discovery plugin consumes them from the cache.
    match resolver.lookup(fqdn.name(), rr_type::TXT).await {
        Ok(records) => {
            for record in records {
                let property = Property::DnsRecord {
                    header: DnsHeader::new(rr_type::TXT, record.ttl),
                    data: record.data,
                };
                let _ = session
                    .cache()
                    .create_entity_tag(&event.entity.id, property)
                    .await;
            }
        }
        Err(err) => failure = Some(err.to_string()),
    }

    process_assets_with_source(event, findings, "dns", 100).await;
    // Monitored regardless of outcome: broken names must not hot-loop.
    mark_asset_monitored(session, &event.entity.id, "dns").await;

    match failure {
        Some(message) => Err(EngineError::TransientIo(message)),
        None => Ok(()),
    }
}

/// Resolves names to addresses: the union of A, AAAA and transitively
/// resolved CNAME chains per input name, plus SRV/NS/MX targets resolved
/// one extra hop (attributed to the target name).
///
/// # Errors
///
/// Propagates resolver transport failures; NXDOMAIN is an empty answer,
/// not an error.
pub async fn names_to_addrs(
    resolver: &dyn DnsResolver,
    names: &[&str],
) -> anyhow::Result<Vec<(String, IpAddr)>> {
    let mut pairs = Vec::new();

    for &name in names {
        // Walk the CNAME chain, unioning address records at every link.
        let mut current = name.to_string();
        for _ in 0..MAX_CNAME_CHAIN {
            collect_addrs(resolver, &current, name, &mut pairs).await?;
            let cnames = resolver.lookup(&current, rr_type::CNAME).await?;
            match cnames.first() {
                Some(record) if record.data != current => {
                    current = record.data.clone();
                }
                _ => break,
            }
        }

        // One extra hop for service-pointing records.
        for query in [rr_type::SRV, rr_type::NS, rr_type::MX] {
            for record in resolver.lookup(name, query).await? {
                let target = record.data.clone();
                collect_addrs(resolver, &target, &target, &mut pairs).await?;
            }
        }
    }

    pairs.dedup();
    Ok(pairs)
}

/// Collects A/AAAA answers for `query_name`, attributing them to
/// `owner_name`.
async fn collect_addrs(
    resolver: &dyn DnsResolver,
    query_name: &str,
    owner_name: &str,
    pairs: &mut Vec<(String, IpAddr)>,
) -> anyhow::Result<()> {
    for query in [rr_type::A, rr_type::AAAA] {
        for record in resolver.lookup(query_name, query).await? {
            if let Ok(address) = record.data.parse::<IpAddr>() {
                let pair = (owner_name.to_string(), address);
                if !pairs.contains(&pair) {
                    pairs.push(pair);
                }
            }
        }
    }
    Ok(())
}
