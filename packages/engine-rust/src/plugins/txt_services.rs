//! TXT-record service discovery.
//!
//! Many SaaS products demand a domain-verification TXT record; their
//! presence reveals which services an organization uses. This plugin reads
//! the cached `dns_record` properties on an FQDN (placed there by the DNS
//! plugin) and matches them against a closed substring-to-service mapping,
//! emitting one service finding per hit.

use surveyor_core::{label, rr_type, Asset, AssetType, Property, Relation, Service};

use super::support::{process_assets_with_source, Finding};
use super::Plugin;
use crate::dispatch::{callback, Event, Handler, HandlerRegistry};
use crate::error::EngineError;
use crate::repository::Repository;

/// The closed substring -> service-name mapping.
const SERVICE_MARKERS: &[(&str, &str)] = &[
    ("google-site-verification", "Google Workspace"),
    ("atlassian-domain-verification", "Atlassian"),
    ("facebook-domain-verification", "Facebook Business"),
    ("adobe-idp-site-verification", "Adobe Enterprise"),
    ("adobe-sign-verification", "Adobe Sign"),
    ("docusign=", "DocuSign"),
    ("dropbox-domain-verification", "Dropbox Business"),
    ("onetrust-domain-verification", "OneTrust"),
    ("stripe-verification", "Stripe"),
    ("zoom-domain-verification", "Zoom"),
    ("miro-verification", "Miro"),
    ("slack-domain-verification", "Slack"),
    ("mongodb-site-verification", "MongoDB Atlas"),
    ("shopify-verification-code", "Shopify"),
    ("openai-domain-verification", "OpenAI"),
];

/// The TXT service-discovery plugin.
pub struct TxtServicesPlugin;

impl Plugin for TxtServicesPlugin {
    fn name(&self) -> &'static str {
        "txt_services"
    }

    fn start(&self, registry: &HandlerRegistry) -> anyhow::Result<()> {
        registry.register(Handler {
            plugin: "txt_services".to_string(),
            name: "txt-service-match".to_string(),
            // After the DNS plugin so the TXT properties are in place.
            priority: 6,
            max_instances: 1,
            transforms: vec!["fqdn->service".to_string()],
            event_type: AssetType::Fqdn,
            callback: callback(|event| async move { handle_fqdn(&event).await }),
        });
        Ok(())
    }
}

/// Matches one TXT value against the marker table.
fn service_for(txt: &str) -> Option<&'static str> {
    let lowered = txt.to_lowercase();
    SERVICE_MARKERS
        .iter()
        .find(|(marker, _)| lowered.contains(marker))
        .map(|(_, service)| *service)
}

async fn handle_fqdn(event: &Event) -> Result<(), EngineError> {
    let Asset::Fqdn(fqdn) = &event.entity.asset else {
        return Ok(());
    };
    let tags = event
        .session
        .cache()
        .get_entity_tags(&event.entity.id, 0, &["dns_record"])
        .await
        .map_err(EngineError::Other)?;

    let mut findings = Vec::new();
    for tag in tags {
        let Property::DnsRecord { header, data } = &tag.property else {
            continue;
        };
        if header.rr_type != rr_type::TXT {
            continue;
        }
        if let Some(service) = service_for(data) {
            findings.push(Finding::from_event(
                event,
                Asset::Service(Service {
                    identifier: format!("{}:{service}", fqdn.name()),
                    banner: service.to_string(),
                    output: data.clone(),
                    port: 0,
                }),
                Relation::simple(label::SERVICE),
            ));
        }
    }

    process_assets_with_source(event, findings, "txt_services", 90).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use surveyor_core::{DnsHeader, Fqdn};

    use super::*;
    use crate::config::EngineConfig;
    use crate::dispatch::DispatchHandle;
    use crate::session::Session;

    #[test]
    fn marker_matching_is_closed_and_case_insensitive() {
        assert_eq!(
            service_for("google-site-verification=AbC123"),
            Some("Google Workspace")
        );
        assert_eq!(
            service_for("Atlassian-Domain-Verification=xyz"),
            Some("Atlassian")
        );
        assert_eq!(service_for("v=spf1 include:_spf.example.com -all"), None);
    }

    #[tokio::test]
    async fn txt_markers_become_service_findings() {
        let session = Session::ephemeral(EngineConfig::default());
        let entity = session
            .cache()
            .create_entity(Asset::Fqdn(Fqdn::new("example.com").expect("valid")))
            .await
            .expect("create");

        for data in [
            "google-site-verification=AbC123",
            "docusign=5678",
            "v=spf1 -all",
        ] {
            // Tag identity is (name, value): three dns_record properties
            // coexist on the same entity.
            session
                .cache()
                .create_entity_tag(
                    &entity.id,
                    Property::DnsRecord {
                        header: DnsHeader::new(rr_type::TXT, 300),
                        data: data.to_string(),
                    },
                )
                .await
                .expect("tag");

            let event = Event::for_entity(
                entity.clone(),
                Arc::clone(&session),
                DispatchHandle::disconnected(),
            );
            handle_fqdn(&event).await.expect("handle");
        }

        let services = session
            .cache()
            .find_entities_by_type(AssetType::Service, 0)
            .await
            .expect("query");
        let banners: Vec<String> = services
            .iter()
            .map(|e| match &e.asset {
                Asset::Service(s) => s.banner.clone(),
                _ => String::new(),
            })
            .collect();
        assert!(banners.contains(&"Google Workspace".to_string()));
        assert!(banners.contains(&"DocuSign".to_string()));
        assert_eq!(services.len(), 2);

        let edges = session
            .cache()
            .outgoing_edges(&entity.id, 0, &[label::SERVICE])
            .await
            .expect("edges");
        assert_eq!(edges.len(), 2);
    }
}
