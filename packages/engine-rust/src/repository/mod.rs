//! Typed graph storage: the repository contract and its implementations.
//!
//! Three implementations share one contract:
//! - [`MemoryRepository`]: concurrent in-memory store, the cache backing
//! - [`SqlRepository`]: durable sqlx-backed store (SQLite by default)
//! - [`CacheRepository`]: write-back cache composing the two
//!
//! All temporal-filter methods return only rows whose `last_seen >= since`;
//! `since == 0` disables the filter. Errors are surfaced untyped
//! (`anyhow`); the plugin framework decides retry-or-ignore per kind.

mod cache;
mod memory;
#[cfg(feature = "sqlite")]
mod sql;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surveyor_core::{
    Asset, AssetType, Edge, EdgeTag, Entity, EntityTag, Property, Relation, UnixMillis,
};

pub use cache::CacheRepository;
pub use memory::MemoryRepository;
#[cfg(feature = "sqlite")]
pub use sql::SqlRepository;

/// A new edge to be linked: relation plus existing endpoint identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub relation: Relation,
    pub from_entity: String,
    pub to_entity: String,
}

/// Typed CRUD over entities, edges and tags with temporal windowing.
///
/// Used as `Arc<dyn Repository>`. Implementations must be serialisable
/// across concurrent callers and must not panic on transient I/O failures.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Upserts an entity by (variant, key). A second call with an equal
    /// value returns the same identifier and refreshes `last_seen`.
    async fn create_entity(&self, asset: Asset) -> anyhow::Result<Entity>;

    /// Refreshes `last_seen` on an existing entity.
    async fn update_entity_last_seen(&self, id: &str) -> anyhow::Result<()>;

    /// Deletes an entity by identifier. Edge cascade behaviour is
    /// implementation-defined: the cache cascades, the durable store
    /// soft-deletes the entity row only.
    async fn delete_entity(&self, id: &str) -> anyhow::Result<()>;

    async fn find_entity_by_id(&self, id: &str) -> anyhow::Result<Option<Entity>>;

    /// Finds entities whose (variant, key) matches `asset` and whose
    /// `last_seen >= since`.
    async fn find_entities_by_content(
        &self,
        asset: &Asset,
        since: UnixMillis,
    ) -> anyhow::Result<Vec<Entity>>;

    async fn find_entities_by_type(
        &self,
        asset_type: AssetType,
        since: UnixMillis,
    ) -> anyhow::Result<Vec<Entity>>;

    /// Upserts an edge by (from, to, label). Both endpoints must exist.
    async fn link(&self, link: Link) -> anyhow::Result<Edge>;

    /// Edges pointing at `entity_id`, filtered by `since` and, when
    /// non-empty, by relation label.
    async fn incoming_edges(
        &self,
        entity_id: &str,
        since: UnixMillis,
        labels: &[&str],
    ) -> anyhow::Result<Vec<Edge>>;

    /// Edges leaving `entity_id`, filtered by `since` and, when non-empty,
    /// by relation label.
    async fn outgoing_edges(
        &self,
        entity_id: &str,
        since: UnixMillis,
        labels: &[&str],
    ) -> anyhow::Result<Vec<Edge>>;

    async fn delete_edge(&self, id: &str) -> anyhow::Result<()>;

    /// Upserts a tag on an entity by (entity, property name).
    async fn create_entity_tag(
        &self,
        entity_id: &str,
        property: Property,
    ) -> anyhow::Result<EntityTag>;

    async fn get_entity_tags(
        &self,
        entity_id: &str,
        since: UnixMillis,
        names: &[&str],
    ) -> anyhow::Result<Vec<EntityTag>>;

    async fn delete_entity_tag(&self, id: &str) -> anyhow::Result<()>;

    /// Upserts a tag on an edge by (edge, property name).
    async fn create_edge_tag(&self, edge_id: &str, property: Property)
        -> anyhow::Result<EdgeTag>;

    async fn get_edge_tags(
        &self,
        edge_id: &str,
        since: UnixMillis,
        names: &[&str],
    ) -> anyhow::Result<Vec<EdgeTag>>;

    async fn delete_edge_tag(&self, id: &str) -> anyhow::Result<()>;

    /// Flushes pending work and releases resources. Idempotent.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Keeps only rows satisfying the temporal window.
pub(crate) fn within_window(last_seen: UnixMillis, since: UnixMillis) -> bool {
    since == 0 || last_seen >= since
}

/// Keeps only edges matching the label filter; an empty filter matches all.
pub(crate) fn label_matches(label: &str, labels: &[&str]) -> bool {
    labels.is_empty() || labels.contains(&label)
}
