//! WHOIS/RDAP plugin: registration records and their contacts.
//!
//! Creates `DomainRecord` / `AutnumRecord` / `IpNetRecord` entities, links
//! them back to the triggering FQDN / AS / netblock with a `registration`
//! edge, materializes contact sub-trees (`registrant_contact`,
//! `admin_contact`, `technical_contact`, `billing_contact`), and waits,
//! polling with a bounded timeout, for those contact edges to be visible
//! before dispatching the record onward.

use std::sync::Arc;
use std::time::Duration;

use surveyor_core::{
    label, Asset, AssetType, ContactRecord, Entity, Identifier, Organization, Phone, Property,
    Relation,
};
use tracing::debug;

use super::clients::{ContactDetails, ContactKind, RegistryClient, RegistryRecord};
use super::support::{asset_monitored_within_ttl, mark_asset_monitored, ttl_start_time};
use super::Plugin;
use crate::dispatch::{callback, Event, Handler, HandlerRegistry};
use crate::error::EngineError;
use crate::repository::{Link, Repository};

/// How long the plugin waits for contact edges before dispatching anyway.
const CONTACT_WAIT: Duration = Duration::from_secs(5);
/// Poll interval while waiting for contact edges.
const CONTACT_POLL: Duration = Duration::from_millis(100);

/// Contact edge labels the wait checks for.
const CONTACT_LABELS: &[&str] = &[
    label::REGISTRANT_CONTACT,
    label::ADMIN_CONTACT,
    label::TECHNICAL_CONTACT,
    label::BILLING_CONTACT,
    label::ABUSE_CONTACT,
];

/// The WHOIS/RDAP registration plugin.
pub struct RegistrationPlugin {
    client: Arc<dyn RegistryClient>,
}

impl RegistrationPlugin {
    #[must_use]
    pub fn new(client: Arc<dyn RegistryClient>) -> Self {
        Self { client }
    }
}

impl Plugin for RegistrationPlugin {
    fn name(&self) -> &'static str {
        "rdap"
    }

    fn start(&self, registry: &HandlerRegistry) -> anyhow::Result<()> {
        for (event_type, handler_name, transform) in [
            (AssetType::Fqdn, "rdap-domain", "fqdn->domain_record"),
            (
                AssetType::AutonomousSystem,
                "rdap-autnum",
                "autonomous_system->autnum_record",
            ),
            (AssetType::Netblock, "rdap-ipnet", "netblock->ipnet_record"),
        ] {
            let client = Arc::clone(&self.client);
            registry.register(Handler {
                plugin: "rdap".to_string(),
                name: handler_name.to_string(),
                priority: 3,
                max_instances: 1,
                transforms: vec![transform.to_string()],
                event_type,
                callback: callback(move |event| {
                    let client = Arc::clone(&client);
                    async move { handle_registration(client.as_ref(), &event).await }
                }),
            });
        }
        Ok(())
    }
}

/// Fetches and materializes the registration record for one trigger.
async fn handle_registration(
    client: &dyn RegistryClient,
    event: &Event,
) -> Result<(), EngineError> {
    let session = &event.session;
    let config = session.config();

    let record_type = match &event.entity.asset {
        Asset::Fqdn(fqdn) => {
            // Only registered domains carry WHOIS records.
            if !fqdn.is_registered_domain() {
                return Ok(());
            }
            AssetType::DomainRecord
        }
        Asset::AutonomousSystem(_) => AssetType::AutnumRecord,
        Asset::Netblock(_) => AssetType::IpNetRecord,
        _ => return Ok(()),
    };

    // The monitor tag gates the external query, never the other way round.
    let since = ttl_start_time(
        config,
        event.entity.asset.asset_type(),
        record_type,
        "rdap",
    );
    if asset_monitored_within_ttl(session, &event.entity.id, "rdap", since).await {
        return Ok(());
    }

    let query = match &event.entity.asset {
        Asset::Fqdn(fqdn) => client.domain(fqdn.name()).await,
        Asset::AutonomousSystem(asn) => client.autnum(asn.number).await,
        Asset::Netblock(nb) => client.ipnet(&nb.cidr).await,
        _ => return Ok(()),
    };

    let answer = match query {
        Ok(answer) => answer,
        Err(err) => {
            // Registry unreachable: remember the attempt, emit nothing.
            mark_asset_monitored(session, &event.entity.id, "rdap").await;
            return Err(EngineError::TransientIo(err.to_string()));
        }
    };
    mark_asset_monitored(session, &event.entity.id, "rdap").await;

    let Some(answer) = answer else {
        debug!(event = %event.name, "registry has no record");
        return Ok(());
    };

    let (record_asset, contacts) = match answer {
        RegistryRecord::Domain { record, contacts } => (Asset::DomainRecord(record), contacts),
        RegistryRecord::Autnum { record, contacts } => (Asset::AutnumRecord(record), contacts),
        RegistryRecord::IpNet { record, contacts } => (Asset::IpNetRecord(record), contacts),
    };

    let cache = session.cache();
    let record_entity = cache
        .create_entity(record_asset)
        .await
        .map_err(EngineError::Other)?;
    let edge = cache
        .link(Link {
            relation: Relation::simple(label::REGISTRATION),
            from_entity: event.entity.id.clone(),
            to_entity: record_entity.id.clone(),
        })
        .await
        .map_err(EngineError::Other)?;
    let _ = cache.create_edge_tag(&edge.id, Property::source("rdap", 100)).await;

    for (kind, details) in contacts {
        if let Err(err) = materialize_contact(cache.as_ref(), &record_entity, kind, &details).await
        {
            session.log("warn", format!("contact materialization: {err}"));
        }
    }

    // Contacts may also arrive from concurrent handlers on other stores;
    // hold the record until its sub-edges are visible, bounded.
    wait_for_contact_edges(cache.as_ref(), &record_entity.id).await;

    event.dispatcher.dispatch(Event::for_entity(
        record_entity,
        Arc::clone(session),
        event.dispatcher.clone(),
    ));
    Ok(())
}

/// Builds the contact sub-tree under a registration record.
async fn materialize_contact(
    repo: &dyn Repository,
    record: &Entity,
    kind: ContactKind,
    details: &ContactDetails,
) -> anyhow::Result<()> {
    let discovered_at = format!("{}:{}", record.asset.key(), kind.edge_label());
    let contact = repo
        .create_entity(Asset::ContactRecord(ContactRecord::new(discovered_at)))
        .await?;
    repo.link(Link {
        relation: Relation::simple(kind.edge_label()),
        from_entity: record.id.clone(),
        to_entity: contact.id.clone(),
    })
    .await?;

    if let Some(name) = &details.organization {
        let organization = repo
            .create_entity(Asset::Organization(Organization::new(name.as_str())))
            .await?;
        repo.link(Link {
            relation: Relation::simple(label::ORGANIZATION),
            from_entity: contact.id.clone(),
            to_entity: organization.id,
        })
        .await?;
    }
    if let Some(email) = &details.email {
        let identifier = repo
            .create_entity(Asset::Identifier(Identifier::email(email.as_str())))
            .await?;
        repo.link(Link {
            relation: Relation::simple(label::EMAIL),
            from_entity: contact.id.clone(),
            to_entity: identifier.id,
        })
        .await?;
    }
    if let Some(phone) = &details.phone {
        let phone_entity = repo
            .create_entity(Asset::Phone(Phone {
                phone_type: "voice".to_string(),
                raw: phone.clone(),
            }))
            .await?;
        repo.link(Link {
            relation: Relation::simple(label::PHONE),
            from_entity: contact.id.clone(),
            to_entity: phone_entity.id,
        })
        .await?;
    }
    if let Some(location) = &details.location {
        let location_entity = repo
            .create_entity(Asset::Location(location.clone()))
            .await?;
        repo.link(Link {
            relation: Relation::simple(label::LOCATION),
            from_entity: contact.id,
            to_entity: location_entity.id,
        })
        .await?;
    }
    Ok(())
}

/// Polls until the record has at least one contact edge or the bounded
/// timeout expires.
async fn wait_for_contact_edges(repo: &dyn Repository, record_id: &str) {
    let deadline = tokio::time::Instant::now() + CONTACT_WAIT;
    loop {
        match repo.outgoing_edges(record_id, 0, CONTACT_LABELS).await {
            Ok(edges) if !edges.is_empty() => return,
            _ => {}
        }
        if tokio::time::Instant::now() >= deadline {
            debug!(record = %record_id, "contact edges did not appear before timeout");
            return;
        }
        tokio::time::sleep(CONTACT_POLL).await;
    }
}
