//! In-memory [`Repository`] backed by [`DashMap`].
//!
//! Provides concurrent read/write access without external locking. Serves
//! as the cache backing inside [`CacheRepository`](super::CacheRepository)
//! and as the store of choice in tests. Deleting an entity cascades its
//! edges and tags, which is the cache-side delete contract.

use async_trait::async_trait;
use dashmap::DashMap;
use surveyor_core::{
    now_millis, Asset, AssetType, Edge, EdgeTag, Entity, EntityTag, Property, UnixMillis,
};
use uuid::Uuid;

use super::{label_matches, within_window, Link, Repository};

/// Concurrent in-memory graph store.
pub struct MemoryRepository {
    entities: DashMap<String, Entity>,
    /// (type, key) -> entity id.
    entity_keys: DashMap<(AssetType, String), String>,
    edges: DashMap<String, Edge>,
    /// (from, to, label) -> edge id.
    edge_keys: DashMap<(String, String, String), String>,
    entity_tags: DashMap<String, EntityTag>,
    /// (entity id, property name, property value) -> tag id.
    entity_tag_keys: DashMap<(String, String, String), String>,
    edge_tags: DashMap<String, EdgeTag>,
    /// (edge id, property name, property value) -> tag id.
    edge_tag_keys: DashMap<(String, String, String), String>,
}

impl MemoryRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: DashMap::new(),
            entity_keys: DashMap::new(),
            edges: DashMap::new(),
            edge_keys: DashMap::new(),
            entity_tags: DashMap::new(),
            entity_tag_keys: DashMap::new(),
            edge_tags: DashMap::new(),
            edge_tag_keys: DashMap::new(),
        }
    }

    fn next_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Removes every edge touching `entity_id`, with the edges' own tags.
    fn cascade_edges(&self, entity_id: &str) {
        let doomed: Vec<String> = self
            .edges
            .iter()
            .filter(|e| e.from_entity == entity_id || e.to_entity == entity_id)
            .map(|e| e.id.clone())
            .collect();
        for edge_id in doomed {
            self.remove_edge_row(&edge_id);
        }
    }

    fn remove_edge_row(&self, edge_id: &str) {
        if let Some((_, edge)) = self.edges.remove(edge_id) {
            self.edge_keys.remove(&(
                edge.from_entity.clone(),
                edge.to_entity.clone(),
                edge.relation.label().to_string(),
            ));
            let doomed: Vec<(String, String, String)> = self
                .edge_tags
                .iter()
                .filter(|t| t.edge_id == edge_id)
                .map(|t| (t.id.clone(), t.property.name().to_string(), t.property.value()))
                .collect();
            for (tag_id, name, value) in doomed {
                self.edge_tags.remove(&tag_id);
                self.edge_tag_keys.remove(&(edge_id.to_string(), name, value));
            }
        }
    }
}

impl MemoryRepository {
    /// Direct edge lookup by identifier, bypassing the directional queries.
    pub(crate) fn edge_by_id(&self, id: &str) -> Option<Edge> {
        self.edges.get(id).map(|e| e.clone())
    }

    /// Direct entity-tag lookup by identifier.
    pub(crate) fn entity_tag_by_id(&self, id: &str) -> Option<EntityTag> {
        self.entity_tags.get(id).map(|t| t.clone())
    }

    /// Upserts a row imported from another store, preserving its temporal
    /// window instead of stamping "now". Used by the write-back cache when
    /// promoting durable-store results.
    pub(crate) fn import_entity(&self, entity: &Entity) -> Entity {
        let index_key = (entity.asset.asset_type(), entity.asset.key());
        if let Some(id) = self.entity_keys.get(&index_key).map(|e| e.value().clone()) {
            if let Some(mut existing) = self.entities.get_mut(&id) {
                existing.asset = entity.asset.clone();
                existing.created_at = existing.created_at.min(entity.created_at);
                existing.touch(entity.last_seen);
                return existing.clone();
            }
        }
        let imported = Entity {
            id: Self::next_id(),
            asset: entity.asset.clone(),
            created_at: entity.created_at,
            last_seen: entity.last_seen,
        };
        self.entity_keys.insert(index_key, imported.id.clone());
        self.entities.insert(imported.id.clone(), imported.clone());
        imported
    }

    /// Upserts an imported edge between two cache-resident entities,
    /// preserving the source window.
    pub(crate) fn import_edge(&self, source: &Edge, from_id: &str, to_id: &str) -> Option<Edge> {
        if !self.entities.contains_key(from_id) || !self.entities.contains_key(to_id) {
            return None;
        }
        let index_key = (
            from_id.to_string(),
            to_id.to_string(),
            source.relation.label().to_string(),
        );
        if let Some(id) = self.edge_keys.get(&index_key).map(|e| e.value().clone()) {
            if let Some(mut existing) = self.edges.get_mut(&id) {
                existing.relation = source.relation.clone();
                existing.created_at = existing.created_at.min(source.created_at);
                existing.touch(source.last_seen);
                return Some(existing.clone());
            }
        }
        let imported = Edge {
            id: Self::next_id(),
            relation: source.relation.clone(),
            from_entity: from_id.to_string(),
            to_entity: to_id.to_string(),
            created_at: source.created_at,
            last_seen: source.last_seen,
        };
        self.edge_keys.insert(index_key, imported.id.clone());
        self.edges.insert(imported.id.clone(), imported.clone());
        Some(imported)
    }

    /// Upserts an imported tag onto a cache-resident entity, preserving the
    /// source window.
    pub(crate) fn import_entity_tag(&self, entity_id: &str, source: &EntityTag) {
        let index_key = (
            entity_id.to_string(),
            source.property.name().to_string(),
            source.property.value(),
        );
        if let Some(id) = self
            .entity_tag_keys
            .get(&index_key)
            .map(|e| e.value().clone())
        {
            if let Some(mut existing) = self.entity_tags.get_mut(&id) {
                existing.property = source.property.clone();
                existing.created_at = existing.created_at.min(source.created_at);
                if source.last_seen > existing.last_seen {
                    existing.last_seen = source.last_seen;
                }
                return;
            }
        }
        let imported = EntityTag {
            id: Self::next_id(),
            property: source.property.clone(),
            entity_id: entity_id.to_string(),
            created_at: source.created_at,
            last_seen: source.last_seen,
        };
        self.entity_tag_keys.insert(index_key, imported.id.clone());
        self.entity_tags.insert(imported.id.clone(), imported);
    }

    /// Upserts an imported tag onto a cache-resident edge, preserving the
    /// source window.
    pub(crate) fn import_edge_tag(&self, edge_id: &str, source: &EdgeTag) {
        let index_key = (
            edge_id.to_string(),
            source.property.name().to_string(),
            source.property.value(),
        );
        if let Some(id) = self.edge_tag_keys.get(&index_key).map(|e| e.value().clone()) {
            if let Some(mut existing) = self.edge_tags.get_mut(&id) {
                existing.property = source.property.clone();
                existing.created_at = existing.created_at.min(source.created_at);
                if source.last_seen > existing.last_seen {
                    existing.last_seen = source.last_seen;
                }
                return;
            }
        }
        let imported = EdgeTag {
            id: Self::next_id(),
            property: source.property.clone(),
            edge_id: edge_id.to_string(),
            created_at: source.created_at,
            last_seen: source.last_seen,
        };
        self.edge_tag_keys.insert(index_key, imported.id.clone());
        self.edge_tags.insert(imported.id.clone(), imported);
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_entity(&self, asset: Asset) -> anyhow::Result<Entity> {
        let now = now_millis();
        let index_key = (asset.asset_type(), asset.key());

        if let Some(id) = self.entity_keys.get(&index_key).map(|e| e.value().clone()) {
            if let Some(mut existing) = self.entities.get_mut(&id) {
                existing.asset = asset;
                existing.touch(now);
                return Ok(existing.clone());
            }
        }

        let entity = Entity {
            id: Self::next_id(),
            asset,
            created_at: now,
            last_seen: now,
        };
        self.entity_keys.insert(index_key, entity.id.clone());
        self.entities.insert(entity.id.clone(), entity.clone());
        Ok(entity)
    }

    async fn update_entity_last_seen(&self, id: &str) -> anyhow::Result<()> {
        match self.entities.get_mut(id) {
            Some(mut entity) => {
                entity.touch(now_millis());
                Ok(())
            }
            None => anyhow::bail!("entity not found: {id}"),
        }
    }

    async fn delete_entity(&self, id: &str) -> anyhow::Result<()> {
        if let Some((_, entity)) = self.entities.remove(id) {
            self.entity_keys
                .remove(&(entity.asset.asset_type(), entity.asset.key()));
            self.cascade_edges(id);
            let doomed: Vec<(String, String, String)> = self
                .entity_tags
                .iter()
                .filter(|t| t.entity_id == id)
                .map(|t| (t.id.clone(), t.property.name().to_string(), t.property.value()))
                .collect();
            for (tag_id, name, value) in doomed {
                self.entity_tags.remove(&tag_id);
                self.entity_tag_keys.remove(&(id.to_string(), name, value));
            }
        }
        Ok(())
    }

    async fn find_entity_by_id(&self, id: &str) -> anyhow::Result<Option<Entity>> {
        Ok(self.entities.get(id).map(|e| e.clone()))
    }

    async fn find_entities_by_content(
        &self,
        asset: &Asset,
        since: UnixMillis,
    ) -> anyhow::Result<Vec<Entity>> {
        let key = (asset.asset_type(), asset.key());
        Ok(self
            .entity_keys
            .get(&key)
            .and_then(|id| self.entities.get(id.value()).map(|e| e.clone()))
            .filter(|e| within_window(e.last_seen, since))
            .into_iter()
            .collect())
    }

    async fn find_entities_by_type(
        &self,
        asset_type: AssetType,
        since: UnixMillis,
    ) -> anyhow::Result<Vec<Entity>> {
        Ok(self
            .entities
            .iter()
            .filter(|e| {
                e.asset.asset_type() == asset_type && within_window(e.last_seen, since)
            })
            .map(|e| e.clone())
            .collect())
    }

    async fn link(&self, link: Link) -> anyhow::Result<Edge> {
        let now = now_millis();
        if !self.entities.contains_key(&link.from_entity) {
            anyhow::bail!("link source entity not found: {}", link.from_entity);
        }
        if !self.entities.contains_key(&link.to_entity) {
            anyhow::bail!("link destination entity not found: {}", link.to_entity);
        }

        let index_key = (
            link.from_entity.clone(),
            link.to_entity.clone(),
            link.relation.label().to_string(),
        );
        if let Some(id) = self.edge_keys.get(&index_key).map(|e| e.value().clone()) {
            if let Some(mut existing) = self.edges.get_mut(&id) {
                existing.relation = link.relation;
                existing.touch(now);
                return Ok(existing.clone());
            }
        }

        let edge = Edge {
            id: Self::next_id(),
            relation: link.relation,
            from_entity: link.from_entity,
            to_entity: link.to_entity,
            created_at: now,
            last_seen: now,
        };
        self.edge_keys.insert(index_key, edge.id.clone());
        self.edges.insert(edge.id.clone(), edge.clone());
        Ok(edge)
    }

    async fn incoming_edges(
        &self,
        entity_id: &str,
        since: UnixMillis,
        labels: &[&str],
    ) -> anyhow::Result<Vec<Edge>> {
        Ok(self
            .edges
            .iter()
            .filter(|e| {
                e.to_entity == entity_id
                    && within_window(e.last_seen, since)
                    && label_matches(e.relation.label(), labels)
            })
            .map(|e| e.clone())
            .collect())
    }

    async fn outgoing_edges(
        &self,
        entity_id: &str,
        since: UnixMillis,
        labels: &[&str],
    ) -> anyhow::Result<Vec<Edge>> {
        Ok(self
            .edges
            .iter()
            .filter(|e| {
                e.from_entity == entity_id
                    && within_window(e.last_seen, since)
                    && label_matches(e.relation.label(), labels)
            })
            .map(|e| e.clone())
            .collect())
    }

    async fn delete_edge(&self, id: &str) -> anyhow::Result<()> {
        self.remove_edge_row(id);
        Ok(())
    }

    async fn create_entity_tag(
        &self,
        entity_id: &str,
        property: Property,
    ) -> anyhow::Result<EntityTag> {
        if !self.entities.contains_key(entity_id) {
            anyhow::bail!("tag target entity not found: {entity_id}");
        }
        let now = now_millis();
        let index_key = (
            entity_id.to_string(),
            property.name().to_string(),
            property.value(),
        );

        if let Some(id) = self
            .entity_tag_keys
            .get(&index_key)
            .map(|e| e.value().clone())
        {
            if let Some(mut existing) = self.entity_tags.get_mut(&id) {
                existing.property = property;
                if now > existing.last_seen {
                    existing.last_seen = now;
                }
                return Ok(existing.clone());
            }
        }

        let tag = EntityTag {
            id: Self::next_id(),
            property,
            entity_id: entity_id.to_string(),
            created_at: now,
            last_seen: now,
        };
        self.entity_tag_keys.insert(index_key, tag.id.clone());
        self.entity_tags.insert(tag.id.clone(), tag.clone());
        Ok(tag)
    }

    async fn get_entity_tags(
        &self,
        entity_id: &str,
        since: UnixMillis,
        names: &[&str],
    ) -> anyhow::Result<Vec<EntityTag>> {
        Ok(self
            .entity_tags
            .iter()
            .filter(|t| {
                t.entity_id == entity_id
                    && within_window(t.last_seen, since)
                    && label_matches(t.property.name(), names)
            })
            .map(|t| t.clone())
            .collect())
    }

    async fn delete_entity_tag(&self, id: &str) -> anyhow::Result<()> {
        if let Some((_, tag)) = self.entity_tags.remove(id) {
            self.entity_tag_keys.remove(&(
                tag.entity_id,
                tag.property.name().to_string(),
                tag.property.value(),
            ));
        }
        Ok(())
    }

    async fn create_edge_tag(
        &self,
        edge_id: &str,
        property: Property,
    ) -> anyhow::Result<EdgeTag> {
        if !self.edges.contains_key(edge_id) {
            anyhow::bail!("tag target edge not found: {edge_id}");
        }
        let now = now_millis();
        let index_key = (
            edge_id.to_string(),
            property.name().to_string(),
            property.value(),
        );

        if let Some(id) = self.edge_tag_keys.get(&index_key).map(|e| e.value().clone()) {
            if let Some(mut existing) = self.edge_tags.get_mut(&id) {
                existing.property = property;
                if now > existing.last_seen {
                    existing.last_seen = now;
                }
                return Ok(existing.clone());
            }
        }

        let tag = EdgeTag {
            id: Self::next_id(),
            property,
            edge_id: edge_id.to_string(),
            created_at: now,
            last_seen: now,
        };
        self.edge_tag_keys.insert(index_key, tag.id.clone());
        self.edge_tags.insert(tag.id.clone(), tag.clone());
        Ok(tag)
    }

    async fn get_edge_tags(
        &self,
        edge_id: &str,
        since: UnixMillis,
        names: &[&str],
    ) -> anyhow::Result<Vec<EdgeTag>> {
        Ok(self
            .edge_tags
            .iter()
            .filter(|t| {
                t.edge_id == edge_id
                    && within_window(t.last_seen, since)
                    && label_matches(t.property.name(), names)
            })
            .map(|t| t.clone())
            .collect())
    }

    async fn delete_edge_tag(&self, id: &str) -> anyhow::Result<()> {
        if let Some((_, tag)) = self.edge_tags.remove(id) {
            self.edge_tag_keys.remove(&(
                tag.edge_id,
                tag.property.name().to_string(),
                tag.property.value(),
            ));
        }
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use surveyor_core::{label, Fqdn, IpAddress, Relation};

    use super::*;

    fn fqdn(name: &str) -> Asset {
        Asset::Fqdn(Fqdn::new(name).expect("valid fqdn"))
    }

    #[tokio::test]
    async fn create_entity_is_upsert() {
        let repo = MemoryRepository::new();
        let first = repo.create_entity(fqdn("owasp.org")).await.expect("create");
        let second = repo.create_entity(fqdn("owasp.org")).await.expect("upsert");

        assert_eq!(first.id, second.id);
        assert!(second.last_seen >= first.last_seen);
        let all = repo
            .find_entities_by_type(AssetType::Fqdn, 0)
            .await
            .expect("query");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn find_by_content_honours_window() {
        let repo = MemoryRepository::new();
        let entity = repo.create_entity(fqdn("example.com")).await.expect("create");

        let asset = fqdn("example.com");
        let hit = repo
            .find_entities_by_content(&asset, entity.last_seen)
            .await
            .expect("query");
        assert_eq!(hit.len(), 1);

        let miss = repo
            .find_entities_by_content(&asset, entity.last_seen + 10_000)
            .await
            .expect("query");
        assert!(miss.is_empty());
    }

    #[tokio::test]
    async fn link_requires_both_endpoints() {
        let repo = MemoryRepository::new();
        let from = repo.create_entity(fqdn("example.com")).await.expect("create");

        let result = repo
            .link(Link {
                relation: Relation::simple(label::NODE),
                from_entity: from.id.clone(),
                to_entity: "missing".to_string(),
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn link_upserts_on_same_label() {
        let repo = MemoryRepository::new();
        let from = repo.create_entity(fqdn("example.com")).await.expect("create");
        let to = repo
            .create_entity(Asset::IpAddress(
                IpAddress::parse("1.2.3.4").expect("valid"),
            ))
            .await
            .expect("create");

        let link = Link {
            relation: Relation::basic_dns("a_record", surveyor_core::rr_type::A, 300),
            from_entity: from.id.clone(),
            to_entity: to.id.clone(),
        };
        let first = repo.link(link.clone()).await.expect("link");
        let second = repo.link(link).await.expect("relink");
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn incoming_edges_filter_by_label_and_direction() {
        let repo = MemoryRepository::new();
        let a = repo.create_entity(fqdn("a.example.com")).await.expect("create");
        let b = repo.create_entity(fqdn("b.example.com")).await.expect("create");

        repo.link(Link {
            relation: Relation::simple(label::NODE),
            from_entity: a.id.clone(),
            to_entity: b.id.clone(),
        })
        .await
        .expect("link");
        repo.link(Link {
            relation: Relation::simple(label::CONTAINS),
            from_entity: a.id.clone(),
            to_entity: b.id.clone(),
        })
        .await
        .expect("link");

        let incoming = repo
            .incoming_edges(&b.id, 0, &[label::NODE])
            .await
            .expect("query");
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].to_entity, b.id);
        assert_eq!(incoming[0].relation.label(), label::NODE);

        let all = repo.incoming_edges(&b.id, 0, &[]).await.expect("query");
        assert_eq!(all.len(), 2);
        assert!(repo.incoming_edges(&a.id, 0, &[]).await.expect("query").is_empty());
    }

    #[tokio::test]
    async fn delete_entity_cascades_edges_and_tags() {
        let repo = MemoryRepository::new();
        let a = repo.create_entity(fqdn("a.example.com")).await.expect("create");
        let b = repo.create_entity(fqdn("b.example.com")).await.expect("create");
        let edge = repo
            .link(Link {
                relation: Relation::simple(label::NODE),
                from_entity: a.id.clone(),
                to_entity: b.id.clone(),
            })
            .await
            .expect("link");
        repo.create_entity_tag(&a.id, Property::source("dns", 90))
            .await
            .expect("tag");
        repo.create_edge_tag(&edge.id, Property::source("dns", 90))
            .await
            .expect("tag");

        repo.delete_entity(&a.id).await.expect("delete");

        assert!(repo.find_entity_by_id(&a.id).await.expect("query").is_none());
        assert!(repo.incoming_edges(&b.id, 0, &[]).await.expect("query").is_empty());
        assert!(repo
            .get_edge_tags(&edge.id, 0, &[])
            .await
            .expect("query")
            .is_empty());
    }

    #[tokio::test]
    async fn entity_tag_identity_is_name_and_value() {
        let repo = MemoryRepository::new();
        let entity = repo.create_entity(fqdn("example.com")).await.expect("create");

        let first = repo
            .create_entity_tag(&entity.id, Property::simple("monitor:dns", "monitored"))
            .await
            .expect("tag");
        let refreshed = repo
            .create_entity_tag(&entity.id, Property::simple("monitor:dns", "monitored"))
            .await
            .expect("tag");
        assert_eq!(first.id, refreshed.id);
        assert!(refreshed.last_seen >= first.last_seen);

        // Distinct values coexist: multiple TXT records per name.
        let other = repo
            .create_entity_tag(&entity.id, Property::simple("monitor:dns", "alternate"))
            .await
            .expect("tag");
        assert_ne!(first.id, other.id);

        let tags = repo
            .get_entity_tags(&entity.id, 0, &["monitor:dns"])
            .await
            .expect("query");
        assert_eq!(tags.len(), 2);
    }
}
