//! Write-back cache composing the in-memory store with the durable store.
//!
//! Writes land in the cache synchronously and append a mirror operation to
//! a FIFO callback queue; one dedicated worker task replays the queue
//! against the durable store, up to [`CALLBACK_BATCH`] operations per loop
//! iteration so shutdown and flush requests stay responsive.
//!
//! Reads are served from the cache with freshness promotion: when `since`
//! precedes the cache start time, or the freshness marker for the query
//! kind has not been recorded yet, the query is re-issued synchronously
//! against the durable store, the results are imported into the cache, and
//! the marker is set.
//!
//! Identifiers differ between the two stores, so mirror operations are
//! keyed by asset content, never by id. Delete mismatches (the durable row
//! is already gone) are silently ignored.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use surveyor_core::{
    now_millis, Asset, AssetType, Edge, EdgeTag, Entity, EntityTag, Property, Relation,
    UnixMillis,
};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Link, MemoryRepository, Repository};

/// Maximum callbacks replayed per worker-loop iteration.
const CALLBACK_BATCH: usize = 10;

/// Freshness-marker names, one per promotable query kind.
mod freshness {
    pub const FIND_ENTITY_BY_CONTENT: &str = "cache_find_entity_by_content";
    pub const FIND_ENTITIES_BY_TYPE: &str = "cache_find_entities_by_type";
    pub const GET_ENTITY_TAGS: &str = "cache_get_entity_tags";
    pub const INCOMING_EDGES: &str = "cache_incoming_edges";
    pub const OUTGOING_EDGES: &str = "cache_outgoing_edges";
}

/// A deferred mirror of one cache write, replayed against the durable
/// store. Content-addressed: both sides resolve their own row identifiers.
#[derive(Debug, Clone)]
enum CacheOp {
    CreateEntity(Asset),
    DeleteEntity(Asset),
    Link {
        relation: Relation,
        from: Asset,
        to: Asset,
    },
    DeleteEdge {
        label: String,
        from: Asset,
        to: Asset,
    },
    CreateEntityTag {
        owner: Asset,
        property: Property,
    },
    DeleteEntityTag {
        owner: Asset,
        name: String,
    },
    CreateEdgeTag {
        label: String,
        from: Asset,
        to: Asset,
        property: Property,
    },
    DeleteEdgeTag {
        label: String,
        from: Asset,
        to: Asset,
        name: String,
    },
}

struct Inner {
    cache: MemoryRepository,
    db: Arc<dyn Repository>,
    start_time: UnixMillis,
    /// FIFO callback queue. The lock is held only to push/drain, never
    /// while talking to the durable store.
    // TODO: spill to disk past a bound; the backlog is assumed to fit in
    // memory today.
    queue: parking_lot::Mutex<VecDeque<CacheOp>>,
    wakeup: Notify,
    shutdown: watch::Sender<bool>,
    /// Freshness markers keyed `<kind>:<discriminator>`.
    freshness: DashMap<String, UnixMillis>,
}

impl Inner {
    fn enqueue(&self, op: CacheOp) {
        self.queue.lock().push_back(op);
        self.wakeup.notify_one();
    }

    fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    fn mark_fresh(&self, key: String) {
        self.freshness.insert(key, now_millis());
    }

    /// Whether the cache alone can answer a query with this window.
    fn can_serve_locally(&self, key: &str, since: UnixMillis) -> bool {
        since >= self.start_time && self.freshness.contains_key(key)
    }

    /// Resolves the durable-store entity matching `asset`, if any.
    async fn db_entity(&self, asset: &Asset) -> anyhow::Result<Option<Entity>> {
        Ok(self
            .db
            .find_entities_by_content(asset, 0)
            .await?
            .into_iter()
            .next())
    }

    /// Replays one mirror operation against the durable store.
    async fn apply(&self, op: CacheOp) -> anyhow::Result<()> {
        match op {
            CacheOp::CreateEntity(asset) => {
                self.db.create_entity(asset).await?;
            }
            CacheOp::DeleteEntity(asset) => {
                if let Some(entity) = self.db_entity(&asset).await? {
                    self.db.delete_entity(&entity.id).await?;
                }
            }
            CacheOp::Link { relation, from, to } => {
                let from_entity = self.db.create_entity(from).await?;
                let to_entity = self.db.create_entity(to).await?;
                self.db
                    .link(Link {
                        relation,
                        from_entity: from_entity.id,
                        to_entity: to_entity.id,
                    })
                    .await?;
            }
            CacheOp::DeleteEdge { label, from, to } => {
                if let Some(edge) = self.db_edge(&label, &from, &to).await? {
                    self.db.delete_edge(&edge.id).await?;
                }
            }
            CacheOp::CreateEntityTag { owner, property } => {
                let entity = self.db.create_entity(owner).await?;
                self.db.create_entity_tag(&entity.id, property).await?;
            }
            CacheOp::DeleteEntityTag { owner, name } => {
                if let Some(entity) = self.db_entity(&owner).await? {
                    for tag in self.db.get_entity_tags(&entity.id, 0, &[&name]).await? {
                        self.db.delete_entity_tag(&tag.id).await?;
                    }
                }
            }
            CacheOp::CreateEdgeTag {
                label,
                from,
                to,
                property,
            } => {
                if let Some(edge) = self.db_edge(&label, &from, &to).await? {
                    self.db.create_edge_tag(&edge.id, property).await?;
                }
            }
            CacheOp::DeleteEdgeTag {
                label,
                from,
                to,
                name,
            } => {
                if let Some(edge) = self.db_edge(&label, &from, &to).await? {
                    for tag in self.db.get_edge_tags(&edge.id, 0, &[&name]).await? {
                        self.db.delete_edge_tag(&tag.id).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn db_edge(
        &self,
        label: &str,
        from: &Asset,
        to: &Asset,
    ) -> anyhow::Result<Option<Edge>> {
        let Some(from_entity) = self.db_entity(from).await? else {
            return Ok(None);
        };
        let Some(to_entity) = self.db_entity(to).await? else {
            return Ok(None);
        };
        Ok(self
            .db
            .outgoing_edges(&from_entity.id, 0, &[label])
            .await?
            .into_iter()
            .find(|e| e.to_entity == to_entity.id))
    }

    /// Callback worker body: drain in submission order, small batches.
    async fn run_worker(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            let batch: Vec<CacheOp> = {
                let mut queue = self.queue.lock();
                let take = queue.len().min(CALLBACK_BATCH);
                queue.drain(..take).collect()
            };

            if batch.is_empty() {
                if *shutdown_rx.borrow() {
                    return;
                }
                tokio::select! {
                    () = self.wakeup.notified() => {}
                    _ = shutdown_rx.changed() => {}
                }
                continue;
            }

            for op in batch {
                if let Err(err) = self.apply(op).await {
                    // Mirror failures must never poison the cache path.
                    debug!(error = %err, "write-back callback failed");
                }
            }
        }
    }

    /// Resolves the durable-store row mirroring a cache entity id, if the
    /// entity exists on both sides. Promotion paths tolerate misses.
    async fn db_twin(&self, entity_id: &str) -> anyhow::Result<Option<Entity>> {
        let Some(local) = self.cache.find_entity_by_id(entity_id).await? else {
            return Ok(None);
        };
        self.db_entity(&local.asset).await
    }

    /// Resolves the asset behind a cache entity id, for mirror keying.
    async fn asset_of(&self, entity_id: &str) -> anyhow::Result<Asset> {
        self.cache
            .find_entity_by_id(entity_id)
            .await?
            .map(|e| e.asset)
            .ok_or_else(|| anyhow::anyhow!("entity not found in cache: {entity_id}"))
    }

    /// Imports a durable-store edge and its endpoints into the cache.
    async fn import_edge_row(&self, edge: &Edge) -> anyhow::Result<Option<Edge>> {
        let Some(from) = self.db.find_entity_by_id(&edge.from_entity).await? else {
            return Ok(None);
        };
        let Some(to) = self.db.find_entity_by_id(&edge.to_entity).await? else {
            return Ok(None);
        };
        let from_local = self.cache.import_entity(&from);
        let to_local = self.cache.import_entity(&to);
        Ok(self.cache.import_edge(edge, &from_local.id, &to_local.id))
    }
}

/// The write-back cache repository.
///
/// One instance per session. `close()` drains the callback queue before
/// returning; the durable store itself is closed by the session, not here.
pub struct CacheRepository {
    inner: Arc<Inner>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl CacheRepository {
    /// Creates the cache in front of `db` and starts the callback worker.
    #[must_use]
    pub fn new(db: Arc<dyn Repository>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            cache: MemoryRepository::new(),
            db,
            start_time: now_millis(),
            queue: parking_lot::Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            shutdown,
            freshness: DashMap::new(),
        });
        let worker = tokio::spawn(Arc::clone(&inner).run_worker());
        Self {
            inner,
            worker: parking_lot::Mutex::new(Some(worker)),
        }
    }

    /// The moment this cache came up; reads older than this promote to the
    /// durable store.
    #[must_use]
    pub fn start_time(&self) -> UnixMillis {
        self.inner.start_time
    }

    /// Number of mirror operations not yet replayed.
    #[must_use]
    pub fn pending_callbacks(&self) -> usize {
        self.inner.pending()
    }

    /// Waits until the callback queue is empty. Used by the memory guard
    /// and by tests; `close()` performs its own drain.
    pub async fn flush(&self) {
        while self.inner.pending() > 0 {
            self.inner.wakeup.notify_one();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Repository for CacheRepository {
    async fn create_entity(&self, asset: Asset) -> anyhow::Result<Entity> {
        let entity = self.inner.cache.create_entity(asset.clone()).await?;
        self.inner.enqueue(CacheOp::CreateEntity(asset));
        Ok(entity)
    }

    async fn update_entity_last_seen(&self, id: &str) -> anyhow::Result<()> {
        self.inner.cache.update_entity_last_seen(id).await?;
        // The durable upsert refreshes last_seen as a side effect.
        let asset = self.inner.asset_of(id).await?;
        self.inner.enqueue(CacheOp::CreateEntity(asset));
        Ok(())
    }

    async fn delete_entity(&self, id: &str) -> anyhow::Result<()> {
        let asset = self.inner.asset_of(id).await?;
        self.inner.cache.delete_entity(id).await?;
        self.inner.enqueue(CacheOp::DeleteEntity(asset));
        Ok(())
    }

    async fn find_entity_by_id(&self, id: &str) -> anyhow::Result<Option<Entity>> {
        self.inner.cache.find_entity_by_id(id).await
    }

    async fn find_entities_by_content(
        &self,
        asset: &Asset,
        since: UnixMillis,
    ) -> anyhow::Result<Vec<Entity>> {
        let marker = format!(
            "{}:{}:{}",
            freshness::FIND_ENTITY_BY_CONTENT,
            asset.asset_type(),
            asset.key()
        );
        if !self.inner.can_serve_locally(&marker, since) {
            if let Ok(rows) = self.inner.db.find_entities_by_content(asset, since).await {
                for row in &rows {
                    self.inner.cache.import_entity(row);
                }
                self.inner.mark_fresh(marker);
            }
        }
        self.inner.cache.find_entities_by_content(asset, since).await
    }

    async fn find_entities_by_type(
        &self,
        asset_type: AssetType,
        since: UnixMillis,
    ) -> anyhow::Result<Vec<Entity>> {
        let marker = format!("{}:{asset_type}", freshness::FIND_ENTITIES_BY_TYPE);
        if !self.inner.can_serve_locally(&marker, since) {
            if let Ok(rows) = self.inner.db.find_entities_by_type(asset_type, since).await {
                for row in &rows {
                    self.inner.cache.import_entity(row);
                }
                self.inner.mark_fresh(marker);
            }
        }
        self.inner.cache.find_entities_by_type(asset_type, since).await
    }

    async fn link(&self, link: Link) -> anyhow::Result<Edge> {
        let from = self.inner.asset_of(&link.from_entity).await?;
        let to = self.inner.asset_of(&link.to_entity).await?;
        let edge = self.inner.cache.link(link.clone()).await?;
        self.inner.enqueue(CacheOp::Link {
            relation: link.relation,
            from,
            to,
        });
        Ok(edge)
    }

    async fn incoming_edges(
        &self,
        entity_id: &str,
        since: UnixMillis,
        labels: &[&str],
    ) -> anyhow::Result<Vec<Edge>> {
        let marker = format!("{}:{entity_id}", freshness::INCOMING_EDGES);
        if !self.inner.can_serve_locally(&marker, since) {
            if let Ok(Some(db_entity)) = self.inner.db_twin(entity_id).await {
                if let Ok(rows) = self
                    .inner
                    .db
                    .incoming_edges(&db_entity.id, since, &[])
                    .await
                {
                    for row in &rows {
                        let _ = self.inner.import_edge_row(row).await;
                    }
                    self.inner.mark_fresh(marker);
                }
            }
        }
        self.inner.cache.incoming_edges(entity_id, since, labels).await
    }

    async fn outgoing_edges(
        &self,
        entity_id: &str,
        since: UnixMillis,
        labels: &[&str],
    ) -> anyhow::Result<Vec<Edge>> {
        let marker = format!("{}:{entity_id}", freshness::OUTGOING_EDGES);
        if !self.inner.can_serve_locally(&marker, since) {
            if let Ok(Some(db_entity)) = self.inner.db_twin(entity_id).await {
                if let Ok(rows) = self
                    .inner
                    .db
                    .outgoing_edges(&db_entity.id, since, &[])
                    .await
                {
                    for row in &rows {
                        let _ = self.inner.import_edge_row(row).await;
                    }
                    self.inner.mark_fresh(marker);
                }
            }
        }
        self.inner.cache.outgoing_edges(entity_id, since, labels).await
    }

    async fn delete_edge(&self, id: &str) -> anyhow::Result<()> {
        // Resolve the edge row before removal so the mirror can re-key it.
        if let Some(edge) = self.inner.cache.edge_by_id(id) {
            let from = self.inner.asset_of(&edge.from_entity).await?;
            let to = self.inner.asset_of(&edge.to_entity).await?;
            self.inner.cache.delete_edge(id).await?;
            self.inner.enqueue(CacheOp::DeleteEdge {
                label: edge.relation.label().to_string(),
                from,
                to,
            });
        }
        Ok(())
    }

    async fn create_entity_tag(
        &self,
        entity_id: &str,
        property: Property,
    ) -> anyhow::Result<EntityTag> {
        let owner = self.inner.asset_of(entity_id).await?;
        let tag = self
            .inner
            .cache
            .create_entity_tag(entity_id, property.clone())
            .await?;
        self.inner.enqueue(CacheOp::CreateEntityTag { owner, property });
        Ok(tag)
    }

    async fn get_entity_tags(
        &self,
        entity_id: &str,
        since: UnixMillis,
        names: &[&str],
    ) -> anyhow::Result<Vec<EntityTag>> {
        let marker = format!("{}:{entity_id}", freshness::GET_ENTITY_TAGS);
        if !self.inner.can_serve_locally(&marker, since) {
            if let Ok(Some(db_entity)) = self.inner.db_twin(entity_id).await {
                if let Ok(rows) = self
                    .inner
                    .db
                    .get_entity_tags(&db_entity.id, since, &[])
                    .await
                {
                    for row in &rows {
                        self.inner.cache.import_entity_tag(entity_id, row);
                    }
                    self.inner.mark_fresh(marker);
                }
            }
        }
        self.inner.cache.get_entity_tags(entity_id, since, names).await
    }

    async fn delete_entity_tag(&self, id: &str) -> anyhow::Result<()> {
        if let Some(tag) = self.inner.cache.entity_tag_by_id(id) {
            let owner = self.inner.asset_of(&tag.entity_id).await?;
            self.inner.cache.delete_entity_tag(id).await?;
            self.inner.enqueue(CacheOp::DeleteEntityTag {
                owner,
                name: tag.property.name().to_string(),
            });
        }
        Ok(())
    }

    async fn create_edge_tag(
        &self,
        edge_id: &str,
        property: Property,
    ) -> anyhow::Result<EdgeTag> {
        let edge = self
            .inner
            .cache
            .edge_by_id(edge_id)
            .ok_or_else(|| anyhow::anyhow!("edge not found in cache: {edge_id}"))?;
        let from = self.inner.asset_of(&edge.from_entity).await?;
        let to = self.inner.asset_of(&edge.to_entity).await?;
        let tag = self
            .inner
            .cache
            .create_edge_tag(edge_id, property.clone())
            .await?;
        self.inner.enqueue(CacheOp::CreateEdgeTag {
            label: edge.relation.label().to_string(),
            from,
            to,
            property,
        });
        Ok(tag)
    }

    async fn get_edge_tags(
        &self,
        edge_id: &str,
        since: UnixMillis,
        names: &[&str],
    ) -> anyhow::Result<Vec<EdgeTag>> {
        self.inner.cache.get_edge_tags(edge_id, since, names).await
    }

    async fn delete_edge_tag(&self, id: &str) -> anyhow::Result<()> {
        self.inner.cache.delete_edge_tag(id).await
    }

    async fn close(&self) -> anyhow::Result<()> {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            // The worker drains the remaining queue before observing the
            // shutdown flag with an empty batch.
            let _ = self.inner.shutdown.send(true);
            self.inner.wakeup.notify_one();
            let _ = handle.await;
        }
        Ok(())
    }
}
