//! Horizontal-discovery plugin: scope widening through associations.
//!
//! Two handlers:
//! - the FQDN handler examines out-of-scope names that resolve or are PTR
//!   targets, runs the association walk with scope change enabled, and
//!   applies the PTR widening rules in both directions;
//! - the ContactRecord handler submits each entity reachable over
//!   `organization` / `location` / `email` edges as an association
//!   candidate.
//!
//! Every confirmed association gets symmetric `associated_with` edges
//! between the two top-level assets, skipped when the endpoints coincide.

use std::sync::Arc;

use surveyor_core::{label, Asset, AssetType, Relation};
use tracing::debug;

use super::support::ip_address_sweep;
use super::Plugin;
use crate::dispatch::{callback, Event, Handler, HandlerRegistry};
use crate::error::EngineError;
use crate::repository::{Link, Repository};
use crate::scope::{is_associated, AssociationRequest};

/// The horizontal-discovery plugin.
pub struct HorizontalPlugin;

impl Plugin for HorizontalPlugin {
    fn name(&self) -> &'static str {
        "horizontal"
    }

    fn start(&self, registry: &HandlerRegistry) -> anyhow::Result<()> {
        registry.register(Handler {
            plugin: "horizontal".to_string(),
            name: "fqdn-associate".to_string(),
            priority: 5,
            max_instances: 1,
            transforms: vec!["fqdn->fqdn".to_string()],
            event_type: AssetType::Fqdn,
            callback: callback(|event| async move { handle_fqdn(&event).await }),
        });
        registry.register(Handler {
            plugin: "horizontal".to_string(),
            name: "contact-associate".to_string(),
            priority: 5,
            max_instances: 1,
            transforms: vec!["contact_record->organization".to_string()],
            event_type: AssetType::ContactRecord,
            callback: callback(|event| async move { handle_contact(&event).await }),
        });
        Ok(())
    }
}

/// Creates `associated_with` edges in both directions.
async fn link_associated(repo: &dyn Repository, a: &str, b: &str) {
    if a == b {
        return;
    }
    for (from, to) in [(a, b), (b, a)] {
        let result = repo
            .link(Link {
                relation: Relation::simple(label::ASSOCIATED_WITH),
                from_entity: from.to_string(),
                to_entity: to.to_string(),
            })
            .await;
        if let Err(err) = result {
            debug!(error = %err, "associated_with link failed");
        }
    }
}

/// Out-of-scope FQDN examination with PTR widening.
async fn handle_fqdn(event: &Event) -> Result<(), EngineError> {
    let Asset::Fqdn(fqdn) = &event.entity.asset else {
        return Ok(());
    };
    let session = &event.session;
    let conf = session.config().default_confidence;
    let cache = session.cache();

    if session
        .scope()
        .is_asset_in_scope(&event.entity.asset, conf)
        .matched
    {
        return Ok(());
    }

    // Candidates must be live: resolving, or the target of a PTR.
    let resolves = !cache
        .outgoing_edges(
            &event.entity.id,
            0,
            &["a_record", "aaaa_record", "cname_record"],
        )
        .await
        .map_err(EngineError::Other)?
        .is_empty();
    let ptr_edges = cache
        .incoming_edges(&event.entity.id, 0, &["ptr_record"])
        .await
        .map_err(EngineError::Other)?;
    if !resolves && ptr_edges.is_empty() {
        return Ok(());
    }

    let request = AssociationRequest {
        submission: event.entity.clone(),
        confidence: conf,
        scope_change: true,
    };
    let associations = is_associated(session.scope(), cache.as_ref(), &request)
        .await
        .map_err(EngineError::Other)?;
    for association in &associations {
        link_associated(cache.as_ref(), &event.entity.id, &association.anchor.id).await;
    }

    // PTR widening, both directions.
    for edge in ptr_edges {
        let Ok(Some(origin)) = cache.find_entity_by_id(&edge.from_entity).await else {
            continue;
        };
        let origin_in_scope = session.scope().is_asset_in_scope(&origin.asset, conf).matched;

        if origin_in_scope {
            // An in-scope address points at this name: pull the name's
            // registered domain into scope and dispatch it.
            if let Some(registered) = fqdn.registered_domain() {
                if session.scope().add_fqdn(&registered) {
                    session.log(
                        "info",
                        format!("scope widened with domain {}", registered.name()),
                    );
                    if let Ok(entity) = cache.create_entity(Asset::Fqdn(registered)).await {
                        event.dispatcher.dispatch(Event::for_entity(
                            entity,
                            Arc::clone(session),
                            event.dispatcher.clone(),
                        ));
                    }
                }
            }
        } else if session
            .scope()
            .is_asset_in_scope(&event.entity.asset, conf)
            .matched
        {
            // The PTR target (now) sits in scope: the originating address
            // belongs too; admit it and sweep its neighbourhood.
            if let Asset::IpAddress(ip) = &origin.asset {
                session.scope().add_address(ip.address);
                let origin_event = Event::for_entity(
                    origin.clone(),
                    Arc::clone(session),
                    event.dispatcher.clone(),
                );
                ip_address_sweep(&origin_event, ip.address, "horizontal", super::SWEEP_MAX_DEFAULT)
                    .await;
            }
        }
    }
    Ok(())
}

/// Contact-record traversal: every reachable organization, location or
/// email identifier is an association candidate.
async fn handle_contact(event: &Event) -> Result<(), EngineError> {
    let session = &event.session;
    let cache = session.cache();
    let conf = session.config().default_confidence;

    let edges = cache
        .outgoing_edges(
            &event.entity.id,
            0,
            &[label::ORGANIZATION, label::LOCATION, label::EMAIL],
        )
        .await
        .map_err(EngineError::Other)?;

    for edge in edges {
        let Ok(Some(candidate)) = cache.find_entity_by_id(&edge.to_entity).await else {
            continue;
        };
        let request = AssociationRequest {
            submission: candidate.clone(),
            confidence: conf,
            scope_change: true,
        };
        let associations = is_associated(session.scope(), cache.as_ref(), &request)
            .await
            .map_err(EngineError::Other)?;
        for association in &associations {
            link_associated(cache.as_ref(), &candidate.id, &association.anchor.id).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use surveyor_core::{ContactRecord, DomainRecord, Fqdn, IpAddress, Organization};

    use super::*;
    use crate::config::{EngineConfig, ScopeSeed};
    use crate::dispatch::DispatchHandle;
    use crate::session::Session;

    async fn create(session: &Arc<Session>, asset: Asset) -> surveyor_core::Entity {
        session.cache().create_entity(asset).await.expect("create")
    }

    async fn simple_link(
        session: &Arc<Session>,
        from: &surveyor_core::Entity,
        to: &surveyor_core::Entity,
        name: &str,
    ) {
        session
            .cache()
            .link(Link {
                relation: Relation::simple(name),
                from_entity: from.id.clone(),
                to_entity: to.id.clone(),
            })
            .await
            .expect("link");
    }

    fn session_with(domains: &[&str], orgs: &[&str]) -> Arc<Session> {
        Session::ephemeral(EngineConfig {
            scope: ScopeSeed {
                domains: domains.iter().map(ToString::to_string).collect(),
                organizations: orgs.iter().map(ToString::to_string).collect(),
                ..ScopeSeed::default()
            },
            ..EngineConfig::default()
        })
    }

    #[tokio::test]
    async fn ptr_from_in_scope_ip_widens_scope() {
        // Scope {example.com}; a.example.com resolves to 1.2.3.4 whose PTR
        // points at b.example.org. The engine must pull example.org in.
        let session = session_with(&["example.com"], &[]);
        session.scope().add_address("1.2.3.4".parse().expect("ip"));

        let ip = create(
            &session,
            Asset::IpAddress(IpAddress::parse("1.2.3.4").expect("valid")),
        )
        .await;
        let target = create(
            &session,
            Asset::Fqdn(Fqdn::new("b.example.org").expect("valid")),
        )
        .await;
        simple_link(&session, &ip, &target, "ptr_record").await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let event = Event::for_entity(target, Arc::clone(&session), DispatchHandle::new(tx));
        handle_fqdn(&event).await.expect("handle");

        assert!(session.scope().domains().contains(&"example.org".to_string()));
        let dispatched = rx.recv().await.expect("dispatched fqdn");
        assert_eq!(dispatched.name, "fqdn:example.org");
    }

    #[tokio::test]
    async fn association_creates_symmetric_edges() {
        let session = session_with(&[], &["Example Industries"]);

        let name = create(
            &session,
            Asset::Fqdn(Fqdn::new("candidate.net").expect("valid")),
        )
        .await;
        let address = create(
            &session,
            Asset::IpAddress(IpAddress::parse("9.9.9.9").expect("valid")),
        )
        .await;
        simple_link(&session, &name, &address, "a_record").await;

        let record = create(
            &session,
            Asset::DomainRecord(DomainRecord {
                domain: "candidate.net".to_string(),
                ..DomainRecord::default()
            }),
        )
        .await;
        let contact = create(
            &session,
            Asset::ContactRecord(ContactRecord::new("whois:candidate.net")),
        )
        .await;
        let org = create(
            &session,
            Asset::Organization(Organization::new("Example Industries")),
        )
        .await;
        simple_link(&session, &name, &record, label::REGISTRATION).await;
        simple_link(&session, &record, &contact, label::REGISTRANT_CONTACT).await;
        simple_link(&session, &contact, &org, label::ORGANIZATION).await;

        let event = Event::for_entity(
            name.clone(),
            Arc::clone(&session),
            DispatchHandle::disconnected(),
        );
        handle_fqdn(&event).await.expect("handle");

        // Scope grew with the submission's domain.
        assert!(session.scope().domains().contains(&"candidate.net".to_string()));

        // Symmetric associated_with edges between name and anchor.
        let out = session
            .cache()
            .outgoing_edges(&name.id, 0, &[label::ASSOCIATED_WITH])
            .await
            .expect("edges");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to_entity, record.id);
        let back = session
            .cache()
            .outgoing_edges(&record.id, 0, &[label::ASSOCIATED_WITH])
            .await
            .expect("edges");
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].to_entity, name.id);
    }

    #[tokio::test]
    async fn dormant_names_are_ignored() {
        let session = session_with(&[], &["Example Industries"]);
        let name = create(
            &session,
            Asset::Fqdn(Fqdn::new("parked.net").expect("valid")),
        )
        .await;
        let event = Event::for_entity(name, Arc::clone(&session), DispatchHandle::disconnected());
        handle_fqdn(&event).await.expect("handle");
        assert!(session.scope().domains().is_empty());
    }

    #[tokio::test]
    async fn contact_handler_submits_reachable_candidates() {
        let session = session_with(&[], &["Example Industries"]);

        let contact = create(
            &session,
            Asset::ContactRecord(ContactRecord::new("whois:candidate.net")),
        )
        .await;
        let org = create(
            &session,
            Asset::Organization(Organization::new("Example Industries")),
        )
        .await;
        let record = create(
            &session,
            Asset::DomainRecord(DomainRecord {
                domain: "candidate.net".to_string(),
                ..DomainRecord::default()
            }),
        )
        .await;
        simple_link(&session, &contact, &org, label::ORGANIZATION).await;
        simple_link(&session, &record, &contact, label::REGISTRANT_CONTACT).await;

        let event = Event::for_entity(
            contact,
            Arc::clone(&session),
            DispatchHandle::disconnected(),
        );
        handle_contact(&event).await.expect("handle");

        // The org reached the record anchor; symmetric edges exist.
        let out = session
            .cache()
            .outgoing_edges(&org.id, 0, &[label::ASSOCIATED_WITH])
            .await
            .expect("edges");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to_entity, record.id);
    }
}
