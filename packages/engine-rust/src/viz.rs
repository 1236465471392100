//! Read-only graph projection for visualization.
//!
//! `viz_data` walks the stored graph breadth-first from the FQDNs matching
//! the requested domains, following a per-variant allow-list of relation
//! labels, and streams out deduplicated nodes plus directed edges. The
//! repository is never mutated; exporters (GEXF, DOT, D3, ...) are pure
//! consumers of the returned pair.

use std::collections::{HashMap, HashSet, VecDeque};

use surveyor_core::{label, Asset, AssetType, Entity, Fqdn, UnixMillis};

use crate::repository::Repository;

/// Upper bound on projected nodes; beyond it the walk stops expanding.
const MAX_VIZ_NODES: usize = 10_000;

/// One projected node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VizNode {
    /// Entity identifier in the repository.
    pub id: String,
    /// Human-readable key; the deduplication unit.
    pub key: String,
    pub asset_type: AssetType,
}

/// One projected directed edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VizEdge {
    pub from: String,
    pub to: String,
    /// Relation label, doubled into `title` for exporters that want both.
    pub label: String,
    pub title: String,
}

/// Outgoing labels the projection follows per source variant.
fn allowed_labels(asset: &Asset) -> &'static [&'static str] {
    match asset {
        Asset::Fqdn(_) => &[
            "a_record",
            "aaaa_record",
            "cname_record",
            "mx_record",
            "ns_record",
            "srv_record",
            "ptr_record",
            label::NODE,
            label::REGISTRATION,
            label::CERTIFICATE,
            label::SERVICE,
            label::ASSOCIATED_WITH,
        ],
        Asset::IpAddress(_) => &["ptr_record", label::PORT],
        Asset::Netblock(_) => &[label::CONTAINS, label::REGISTRATION],
        Asset::AutonomousSystem(_) => &[label::ANNOUNCES, label::REGISTRATION],
        Asset::TlsCertificate(_) => &[
            label::COMMON_NAME,
            label::SAN_DNS_NAME,
            label::SAN_IP_ADDRESS,
            label::SAN_URL,
            label::OCSP_SERVER,
            label::ISSUING_CERTIFICATE_URL,
            label::SUBJECT_CONTACT,
            label::ISSUER_CONTACT,
        ],
        Asset::DomainRecord(_) | Asset::IpNetRecord(_) | Asset::AutnumRecord(_) => &[
            label::REGISTRANT_CONTACT,
            label::ADMIN_CONTACT,
            label::TECHNICAL_CONTACT,
            label::BILLING_CONTACT,
            label::ABUSE_CONTACT,
            label::ASSOCIATED_WITH,
        ],
        Asset::ContactRecord(_) => &[
            label::ORGANIZATION,
            label::LOCATION,
            label::EMAIL,
            label::PHONE,
            label::ID,
        ],
        Asset::Url(_) => &[label::NODE, label::PORT],
        Asset::Service(_) => &[label::CERTIFICATE],
        _ => &[],
    }
}

fn node_key(entity: &Entity) -> String {
    format!("{}:{}", entity.asset.asset_type(), entity.asset.key())
}

/// Projects the graph slice reachable from FQDNs under `domains`.
///
/// Only rows with `last_seen >= since` are visited (`since == 0`
/// disables the filter, as everywhere).
///
/// # Errors
///
/// Propagates repository read failures.
pub async fn viz_data(
    domains: &[&str],
    since: UnixMillis,
    repo: &dyn Repository,
) -> anyhow::Result<(Vec<VizNode>, Vec<VizEdge>)> {
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    let mut seen_keys: HashMap<String, String> = HashMap::new();
    let mut seen_edges: HashSet<(String, String, String)> = HashSet::new();
    let mut frontier: VecDeque<Entity> = VecDeque::new();

    // Seed: every stored FQDN at or under one of the requested domains.
    for entity in repo.find_entities_by_type(AssetType::Fqdn, since).await? {
        let Asset::Fqdn(fqdn) = &entity.asset else {
            continue;
        };
        if domains.iter().any(|domain| fqdn.is_within(domain)) {
            admit_node(&entity, &mut nodes, &mut seen_keys, &mut frontier);
        }
    }

    while let Some(entity) = frontier.pop_front() {
        if nodes.len() >= MAX_VIZ_NODES {
            break;
        }
        let labels = allowed_labels(&entity.asset);
        if labels.is_empty() {
            continue;
        }
        for edge in repo.outgoing_edges(&entity.id, since, labels).await? {
            let Some(target) = repo.find_entity_by_id(&edge.to_entity).await? else {
                continue;
            };
            admit_node(&target, &mut nodes, &mut seen_keys, &mut frontier);

            let from_id = seen_keys
                .get(&node_key(&entity))
                .cloned()
                .unwrap_or_else(|| entity.id.clone());
            let to_id = seen_keys
                .get(&node_key(&target))
                .cloned()
                .unwrap_or_else(|| target.id.clone());
            let relation_label = edge.relation.label().to_string();
            if seen_edges.insert((from_id.clone(), to_id.clone(), relation_label.clone())) {
                edges.push(VizEdge {
                    from: from_id,
                    to: to_id,
                    title: relation_label.clone(),
                    label: relation_label,
                });
            }
        }
    }

    Ok((nodes, edges))
}

/// Adds the entity as a node unless its key was already projected.
fn admit_node(
    entity: &Entity,
    nodes: &mut Vec<VizNode>,
    seen_keys: &mut HashMap<String, String>,
    frontier: &mut VecDeque<Entity>,
) {
    let key = node_key(entity);
    if seen_keys.contains_key(&key) {
        return;
    }
    seen_keys.insert(key.clone(), entity.id.clone());
    nodes.push(VizNode {
        id: entity.id.clone(),
        key,
        asset_type: entity.asset.asset_type(),
    });
    frontier.push_back(entity.clone());
}

/// Whether a stored FQDN belongs under one of the requested domains.
/// Exposed for exporters that pre-filter seeds themselves.
#[must_use]
pub fn domain_matches(fqdn: &Fqdn, domains: &[&str]) -> bool {
    domains.iter().any(|domain| fqdn.is_within(domain))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use surveyor_core::{IpAddress, Relation};

    use super::*;
    use crate::repository::{Link, MemoryRepository};

    async fn seed_graph(repo: &MemoryRepository) -> (Entity, Entity) {
        let name = repo
            .create_entity(Asset::Fqdn(Fqdn::new("owasp.org").expect("valid")))
            .await
            .expect("create");
        let address = repo
            .create_entity(Asset::IpAddress(
                IpAddress::parse("205.251.199.98").expect("valid"),
            ))
            .await
            .expect("create");
        repo.link(Link {
            relation: Relation::basic_dns("a_record", surveyor_core::rr_type::A, 300),
            from_entity: name.id.clone(),
            to_entity: address.id.clone(),
        })
        .await
        .expect("link");
        (name, address)
    }

    #[tokio::test]
    async fn projects_seeded_domain_with_address() {
        let repo = MemoryRepository::new();
        let (name, address) = seed_graph(&repo).await;

        let (nodes, edges) = viz_data(&["owasp.org"], 0, &repo).await.expect("viz");
        assert_eq!(nodes.len(), 2);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from, name.id);
        assert_eq!(edges[0].to, address.id);
        assert_eq!(edges[0].label, "a_record");
        assert_eq!(edges[0].title, "a_record");
    }

    #[tokio::test]
    async fn unrelated_domains_are_excluded() {
        let repo = MemoryRepository::new();
        seed_graph(&repo).await;
        repo.create_entity(Asset::Fqdn(Fqdn::new("other.net").expect("valid")))
            .await
            .expect("create");

        let (nodes, _) = viz_data(&["owasp.org"], 0, &repo).await.expect("viz");
        assert!(nodes.iter().all(|n| n.key != "fqdn:other.net"));
    }

    #[tokio::test]
    async fn disallowed_labels_stop_the_walk() {
        let repo = MemoryRepository::new();
        let (name, _) = seed_graph(&repo).await;
        // A relation outside the FQDN allow-list must not be followed.
        let secret = repo
            .create_entity(Asset::Fqdn(Fqdn::new("hidden.example.net").expect("valid")))
            .await
            .expect("create");
        repo.link(Link {
            relation: Relation::simple("unlisted_relation"),
            from_entity: name.id,
            to_entity: secret.id,
        })
        .await
        .expect("link");

        let (nodes, _) = viz_data(&["owasp.org"], 0, &repo).await.expect("viz");
        assert!(nodes.iter().all(|n| n.key != "fqdn:hidden.example.net"));
    }

    #[tokio::test]
    async fn temporal_window_filters_stale_rows() {
        let repo = MemoryRepository::new();
        let (name, _) = seed_graph(&repo).await;

        let future = name.last_seen + 60_000;
        let (nodes, edges) = viz_data(&["owasp.org"], future, &repo).await.expect("viz");
        assert!(nodes.is_empty());
        assert!(edges.is_empty());
    }

    #[tokio::test]
    async fn projection_does_not_mutate_store() {
        let repo = Arc::new(MemoryRepository::new());
        seed_graph(&repo).await;

        let before = repo
            .find_entities_by_type(AssetType::Fqdn, 0)
            .await
            .expect("query")
            .len()
            + repo
                .find_entities_by_type(AssetType::IpAddress, 0)
                .await
                .expect("query")
                .len();
        let _ = viz_data(&["owasp.org"], 0, repo.as_ref()).await.expect("viz");
        let after = repo
            .find_entities_by_type(AssetType::Fqdn, 0)
            .await
            .expect("query")
            .len()
            + repo
                .find_entities_by_type(AssetType::IpAddress, 0)
                .await
                .expect("query")
                .len();
        assert_eq!(before, after);
    }
}
