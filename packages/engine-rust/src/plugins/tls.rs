//! TLS certificate plugin.
//!
//! Fetches the certificate chain a host presents (through the abstract
//! [`CertSource`]), stores each certificate with a `certificate` edge from
//! the host, and fans the certificate's contents out: FQDNs for the
//! common name and SAN DNS names, addresses for SAN IPs, URLs for SAN
//! URIs / OCSP / issuing-certificate endpoints, and contact records with
//! organizations for the subject and issuer distinguished names.

use std::net::IpAddr;
use std::sync::Arc;

use surveyor_core::{
    label, Asset, AssetType, ContactRecord, Fqdn, IpAddress, Organization, Relation, Url,
};

use super::clients::CertSource;
use super::support::{
    asset_monitored_within_ttl, mark_asset_monitored, process_assets_with_source, ttl_start_time,
    Finding,
};
use super::Plugin;
use crate::dispatch::{callback, Event, Handler, HandlerRegistry};
use crate::error::EngineError;
use crate::repository::{Link, Repository};

/// The TLS certificate plugin.
pub struct TlsPlugin {
    source: Arc<dyn CertSource>,
    /// Port probed for certificates.
    port: u16,
}

impl TlsPlugin {
    #[must_use]
    pub fn new(source: Arc<dyn CertSource>) -> Self {
        Self { source, port: 443 }
    }
}

impl Plugin for TlsPlugin {
    fn name(&self) -> &'static str {
        "cert"
    }

    fn start(&self, registry: &HandlerRegistry) -> anyhow::Result<()> {
        let source = Arc::clone(&self.source);
        let port = self.port;
        registry.register(Handler {
            plugin: "cert".to_string(),
            name: "cert-fetch".to_string(),
            priority: 4,
            max_instances: 2,
            transforms: vec!["fqdn->tls_certificate".to_string()],
            event_type: AssetType::Fqdn,
            callback: callback(move |event| {
                let source = Arc::clone(&source);
                async move { handle_fqdn(source.as_ref(), port, &event).await }
            }),
        });
        Ok(())
    }
}

async fn handle_fqdn(
    source: &dyn CertSource,
    port: u16,
    event: &Event,
) -> Result<(), EngineError> {
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
    let since = ttl_start_time(config, AssetType::Fqdn, AssetType::TlsCertificate, "cert");
    if asset_monitored_within_ttl(session, &event.entity.id, "cert", since).await {
        return Ok(());
    }

    let certificates = match source.certificates(fqdn.name(), port).await {
        Ok(certificates) => certificates,
        Err(err) => {
            mark_asset_monitored(session, &event.entity.id, "cert").await;
            return Err(EngineError::TransientIo(err.to_string()));
        }
    };
    mark_asset_monitored(session, &event.entity.id, "cert").await;

    let cache = session.cache();
    for certificate in certificates {
        let cert_entity = cache
            .create_entity(Asset::TlsCertificate(certificate.clone()))
            .await
            .map_err(EngineError::Other)?;
        cache
            .link(Link {
                relation: Relation::simple(label::CERTIFICATE),
                from_entity: event.entity.id.clone(),
                to_entity: cert_entity.id.clone(),
            })
            .await
            .map_err(EngineError::Other)?;

        // Fan the certificate's contents out from the certificate entity.
        let cert_event = Event::for_entity(
            cert_entity.clone(),
            Arc::clone(session),
            event.dispatcher.clone(),
        );
        let mut findings = Vec::new();

        if let Ok(name) = Fqdn::new(certificate.subject_common_name.trim_start_matches("*.")) {
            findings.push(Finding::from_event(
                &cert_event,
                Asset::Fqdn(name),
                Relation::simple(label::COMMON_NAME),
            ));
        }
        for san in &certificate.san_dns_names {
            if let Ok(name) = Fqdn::new(san.trim_start_matches("*.")) {
                findings.push(Finding::from_event(
                    &cert_event,
                    Asset::Fqdn(name),
                    Relation::simple(label::SAN_DNS_NAME),
                ));
            }
        }
        for san in &certificate.san_ip_addresses {
            if let Ok(address) = san.parse::<IpAddr>() {
                findings.push(Finding::from_event(
                    &cert_event,
                    Asset::IpAddress(IpAddress::new(address)),
                    Relation::simple(label::SAN_IP_ADDRESS),
                ));
            }
        }
        for (urls, relation) in [
            (&certificate.san_urls, label::SAN_URL),
            (&certificate.ocsp_servers, label::OCSP_SERVER),
            (
                &certificate.issuing_certificate_urls,
                label::ISSUING_CERTIFICATE_URL,
            ),
        ] {
            for raw in urls {
                if let Ok(url) = Url::parse(raw) {
                    findings.push(Finding::from_event(
                        &cert_event,
                        Asset::Url(url),
                        Relation::simple(relation),
                    ));
                }
            }
        }

        process_assets_with_source(&cert_event, findings, "cert", 100).await;

        // Subject and issuer DNs become contact records with organizations.
        for (dn_name, contact_label) in [
            (&certificate.subject_common_name, label::SUBJECT_CONTACT),
            (&certificate.issuer_common_name, label::ISSUER_CONTACT),
        ] {
            if dn_name.is_empty() {
                continue;
            }
            if let Err(err) =
                materialize_dn(cache.as_ref(), &cert_entity.id, dn_name, contact_label).await
            {
                session.log("warn", format!("certificate DN: {err}"));
            }
        }
    }
    Ok(())
}

/// Builds `cert -> contact -> organization` for one distinguished name.
async fn materialize_dn(
    repo: &dyn Repository,
    cert_id: &str,
    dn_name: &str,
    contact_label: &str,
) -> anyhow::Result<()> {
    let contact = repo
        .create_entity(Asset::ContactRecord(ContactRecord::new(format!(
            "cert:{contact_label}:{dn_name}"
        ))))
        .await?;
    repo.link(Link {
        relation: Relation::simple(contact_label),
        from_entity: cert_id.to_string(),
        to_entity: contact.id.clone(),
    })
    .await?;

    let organization = repo
        .create_entity(Asset::Organization(Organization::new(dn_name)))
        .await?;
    repo.link(Link {
        relation: Relation::simple(label::ORGANIZATION),
        from_entity: contact.id,
        to_entity: organization.id,
    })
    .await?;
    Ok(())
}
