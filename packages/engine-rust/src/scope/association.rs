//! Horizontal discovery: inferring shared ownership through anchors.
//!
//! An anchor is an asset whose presence justifies an association inference:
//! a WHOIS domain record, an RIR network or ASN record, or a TLS
//! certificate that some host presents (an incoming `certificate` edge).
//! Starting from a submitted asset, the walk moves toward anchors, then
//! away from each anchor to its related assets (registrant contacts,
//! organizations, locations, announced netblocks). Each related asset is
//! scope-tested; one hit at or above the requested confidence confirms the
//! anchor. With `scope_change` set, impacted assets join the scope and the
//! walk repeats until no further growth.

use std::collections::{HashMap, HashSet, VecDeque};

use surveyor_core::{label, swg_similarity, Asset, Entity, Fqdn};

use super::{Scope, ScopeMatch};
use crate::repository::Repository;

/// How far the walk moves from the submission toward anchors.
const ANCHOR_WALK_DEPTH: usize = 3;
/// How far the walk moves from an anchor toward related assets.
const RELATED_WALK_DEPTH: usize = 2;
/// Similarity gate between a certificate's subject name and a linked
/// organization before the certificate may act as an anchor.
const CERT_NAME_THRESHOLD: f64 = 0.5;

/// Edge labels followed when walking away from an anchor.
const RELATED_LABELS: &[&str] = &[
    label::REGISTRANT_CONTACT,
    label::ADMIN_CONTACT,
    label::TECHNICAL_CONTACT,
    label::BILLING_CONTACT,
    label::ABUSE_CONTACT,
    label::SUBJECT_CONTACT,
    label::ISSUER_CONTACT,
    label::ORGANIZATION,
    label::LOCATION,
    label::EMAIL,
    label::ID,
    label::ANNOUNCES,
];

/// A submission to the association engine.
#[derive(Debug, Clone)]
pub struct AssociationRequest {
    /// The entity whose ownership is in question.
    pub submission: Entity,
    /// Confidence threshold in [0, 100] a related asset must reach.
    pub confidence: f64,
    /// When set, confirmed associations widen the scope and the walk runs
    /// to fixpoint.
    pub scope_change: bool,
}

/// One confirmed association.
#[derive(Debug, Clone)]
pub struct Association {
    /// Identifier of the submitted entity.
    pub submission_id: String,
    /// The anchor that mediated the inference.
    pub anchor: Entity,
    /// Accuracy of the best related-asset scope hit.
    pub accuracy: f64,
}

/// Per-invocation memo for `is_asset_in_scope`; cleared whenever the scope
/// grows so the fixpoint sees fresh answers.
struct ScopeMemo {
    answers: HashMap<String, ScopeMatch>,
}

impl ScopeMemo {
    fn new() -> Self {
        Self {
            answers: HashMap::new(),
        }
    }

    fn check(&mut self, scope: &Scope, asset: &Asset, conf: f64) -> ScopeMatch {
        let key = format!("{}:{}", asset.asset_type(), asset.key());
        if let Some(hit) = self.answers.get(&key) {
            return *hit;
        }
        let result = scope.is_asset_in_scope(asset, conf);
        self.answers.insert(key, result);
        result
    }

    fn clear(&mut self) {
        self.answers.clear();
    }
}

/// Whether an entity can serve as an anchor. TLS certificates only count
/// when some host presents them (incoming `certificate` edge).
async fn is_anchor(repo: &dyn Repository, entity: &Entity) -> anyhow::Result<bool> {
    match &entity.asset {
        Asset::DomainRecord(_) | Asset::IpNetRecord(_) | Asset::AutnumRecord(_) => Ok(true),
        Asset::TlsCertificate(_) => {
            let presented = repo
                .incoming_edges(&entity.id, 0, &[label::CERTIFICATE])
                .await?;
            Ok(!presented.is_empty())
        }
        _ => Ok(false),
    }
}

/// Collects anchors reachable from `start` within the walk depth,
/// following edges in both directions.
async fn find_anchors(repo: &dyn Repository, start: &Entity) -> anyhow::Result<Vec<Entity>> {
    let mut seen: HashSet<String> = HashSet::from([start.id.clone()]);
    let mut frontier: VecDeque<(String, usize)> = VecDeque::from([(start.id.clone(), 0)]);
    let mut anchors = Vec::new();

    while let Some((entity_id, depth)) = frontier.pop_front() {
        if depth >= ANCHOR_WALK_DEPTH {
            continue;
        }
        let mut neighbour_ids = Vec::new();
        for edge in repo.outgoing_edges(&entity_id, 0, &[]).await? {
            neighbour_ids.push(edge.to_entity);
        }
        for edge in repo.incoming_edges(&entity_id, 0, &[]).await? {
            neighbour_ids.push(edge.from_entity);
        }
        for neighbour_id in neighbour_ids {
            if !seen.insert(neighbour_id.clone()) {
                continue;
            }
            let Some(neighbour) = repo.find_entity_by_id(&neighbour_id).await? else {
                continue;
            };
            if is_anchor(repo, &neighbour).await? {
                anchors.push(neighbour.clone());
            }
            frontier.push_back((neighbour_id, depth + 1));
        }
    }
    Ok(anchors)
}

/// Collects the assets reachable away from an anchor along the related
/// labels, contact records included so their children are visited.
async fn related_assets(repo: &dyn Repository, anchor: &Entity) -> anyhow::Result<Vec<Entity>> {
    let mut seen: HashSet<String> = HashSet::from([anchor.id.clone()]);
    let mut frontier: VecDeque<(String, usize)> = VecDeque::from([(anchor.id.clone(), 0)]);
    let mut related = Vec::new();

    while let Some((entity_id, depth)) = frontier.pop_front() {
        if depth >= RELATED_WALK_DEPTH {
            continue;
        }
        for edge in repo.outgoing_edges(&entity_id, 0, RELATED_LABELS).await? {
            if !seen.insert(edge.to_entity.clone()) {
                continue;
            }
            let Some(neighbour) = repo.find_entity_by_id(&edge.to_entity).await? else {
                continue;
            };
            frontier.push_back((edge.to_entity, depth + 1));
            related.push(neighbour);
        }
    }
    Ok(related)
}

/// The certificate gate: the anchor certificate's subject name, reduced to
/// the registrable domain's first label, must resemble a linked
/// organization's name.
fn certificate_gate(anchor: &Entity, related: &[Entity]) -> bool {
    let Asset::TlsCertificate(cert) = &anchor.asset else {
        return true;
    };
    let stripped = cert.subject_common_name.trim_start_matches("*.");
    let subject_label = Fqdn::new(stripped)
        .ok()
        .and_then(|fqdn| fqdn.registered_domain())
        .map_or_else(|| stripped.to_string(), |d| d.first_label().to_string());

    related.iter().any(|entity| match &entity.asset {
        Asset::Organization(org) => {
            swg_similarity(&org.name, &subject_label) >= CERT_NAME_THRESHOLD
        }
        _ => false,
    })
}

/// Runs the association walk for one submission.
///
/// Returns every confirmed anchor. With `scope_change` set, the submission
/// and each confirmed anchor's related assets are added to scope and the
/// walk repeats until the scope stops growing.
///
/// # Errors
///
/// Propagates repository failures; scope state may have partially grown.
pub async fn is_associated(
    scope: &Scope,
    repo: &dyn Repository,
    request: &AssociationRequest,
) -> anyhow::Result<Vec<Association>> {
    let mut memo = ScopeMemo::new();
    let mut confirmed: HashSet<String> = HashSet::new();
    let mut results = Vec::new();

    loop {
        let mut grew = false;
        let anchors = find_anchors(repo, &request.submission).await?;

        for anchor in anchors {
            if confirmed.contains(&anchor.id) {
                continue;
            }
            let related = related_assets(repo, &anchor).await?;
            if !certificate_gate(&anchor, &related) {
                continue;
            }

            let mut best: Option<f64> = None;
            for candidate in &related {
                let hit = memo.check(scope, &candidate.asset, request.confidence);
                if hit.matched && hit.accuracy >= request.confidence {
                    best = Some(best.unwrap_or(0.0).max(hit.accuracy));
                }
            }

            if let Some(accuracy) = best {
                confirmed.insert(anchor.id.clone());
                if request.scope_change {
                    grew |= scope.add(&request.submission.asset);
                    grew |= scope.add(&anchor.asset);
                    for candidate in &related {
                        grew |= scope.add(&candidate.asset);
                    }
                }
                results.push(Association {
                    submission_id: request.submission.id.clone(),
                    anchor,
                    accuracy,
                });
            }
        }

        if !request.scope_change || !grew {
            return Ok(results);
        }
        // Scope moved: cached answers are stale, walk again to fixpoint.
        memo.clear();
    }
}
