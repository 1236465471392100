//! Durable [`Repository`] backed by sqlx.
//!
//! SQLite is the default store (`sqlite://<path>` or `sqlite::memory:`
//! DSNs). Rows are soft-deleted: `deleted = 1` hides them from every query
//! while keeping history for cross-run diffing. Asset, relation and
//! property payloads are stored as JSON columns next to the `etype`/`ekey`
//! columns the lookups run on.
//!
//! Writes are serialised through a single pooled connection; SQLite does
//! its own file locking underneath.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use surveyor_core::{
    now_millis, Asset, AssetType, Edge, EdgeTag, Entity, EntityTag, Property, UnixMillis,
};
use uuid::Uuid;

use super::{label_matches, Link, Repository};

/// Schema statements applied once at open. `IF NOT EXISTS` keeps re-opens
/// idempotent.
const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS entities (
        id TEXT PRIMARY KEY,
        etype TEXT NOT NULL,
        ekey TEXT NOT NULL,
        asset TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        last_seen INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        UNIQUE (etype, ekey)
    )",
    "CREATE TABLE IF NOT EXISTS edges (
        id TEXT PRIMARY KEY,
        label TEXT NOT NULL,
        relation TEXT NOT NULL,
        from_entity TEXT NOT NULL,
        to_entity TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        last_seen INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        UNIQUE (from_entity, to_entity, label)
    )",
    "CREATE TABLE IF NOT EXISTS entity_tags (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        value TEXT NOT NULL,
        property TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        last_seen INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        UNIQUE (entity_id, name, value)
    )",
    "CREATE TABLE IF NOT EXISTS edge_tags (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        value TEXT NOT NULL,
        property TEXT NOT NULL,
        edge_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        last_seen INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        UNIQUE (edge_id, name, value)
    )",
    "CREATE INDEX IF NOT EXISTS idx_entities_type ON entities (etype, last_seen)",
    "CREATE INDEX IF NOT EXISTS idx_edges_from ON edges (from_entity, last_seen)",
    "CREATE INDEX IF NOT EXISTS idx_edges_to ON edges (to_entity, last_seen)",
];

/// sqlx-backed durable graph store.
pub struct SqlRepository {
    pool: SqlitePool,
}

impl SqlRepository {
    /// Opens (creating if necessary) the store at `dsn` and applies
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns an error when the DSN is malformed, the file cannot be
    /// created, or a migration fails. Callers treat this as fatal.
    pub async fn open(dsn: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(dsn)?.create_if_missing(true);
        // One connection serialises writers; SQLite is single-writer anyway.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    fn next_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn entity_from_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Entity> {
        Ok(Entity {
            id: row.get("id"),
            asset: serde_json::from_str(row.get::<&str, _>("asset"))?,
            created_at: row.get("created_at"),
            last_seen: row.get("last_seen"),
        })
    }

    fn edge_from_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Edge> {
        Ok(Edge {
            id: row.get("id"),
            relation: serde_json::from_str(row.get::<&str, _>("relation"))?,
            from_entity: row.get("from_entity"),
            to_entity: row.get("to_entity"),
            created_at: row.get("created_at"),
            last_seen: row.get("last_seen"),
        })
    }

    async fn edges_of(
        &self,
        column: &str,
        entity_id: &str,
        since: UnixMillis,
        labels: &[&str],
    ) -> anyhow::Result<Vec<Edge>> {
        let query = format!(
            "SELECT * FROM edges WHERE {column} = ? AND last_seen >= ? AND deleted = 0"
        );
        let rows = sqlx::query(&query)
            .bind(entity_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        let mut edges = Vec::with_capacity(rows.len());
        for row in &rows {
            let edge = Self::edge_from_row(row)?;
            if label_matches(edge.relation.label(), labels) {
                edges.push(edge);
            }
        }
        Ok(edges)
    }
}

#[async_trait]
impl Repository for SqlRepository {
    async fn create_entity(&self, asset: Asset) -> anyhow::Result<Entity> {
        let now = now_millis();
        let etype = asset.asset_type().as_str();
        let ekey = asset.key();
        let payload = serde_json::to_string(&asset)?;

        let existing = sqlx::query(
            "SELECT id, created_at, last_seen FROM entities
             WHERE etype = ? AND ekey = ? AND deleted = 0",
        )
        .bind(etype)
        .bind(&ekey)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            let id: String = row.get("id");
            let created_at: UnixMillis = row.get("created_at");
            let last_seen: UnixMillis = row.get::<UnixMillis, _>("last_seen").max(now);
            sqlx::query("UPDATE entities SET asset = ?, last_seen = ? WHERE id = ?")
                .bind(&payload)
                .bind(last_seen)
                .bind(&id)
                .execute(&self.pool)
                .await?;
            return Ok(Entity {
                id,
                asset,
                created_at,
                last_seen,
            });
        }

        let id = Self::next_id();
        sqlx::query(
            "INSERT INTO entities (id, etype, ekey, asset, created_at, last_seen)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(etype)
        .bind(&ekey)
        .bind(&payload)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(Entity {
            id,
            asset,
            created_at: now,
            last_seen: now,
        })
    }

    async fn update_entity_last_seen(&self, id: &str) -> anyhow::Result<()> {
        let result = sqlx::query(
            "UPDATE entities SET last_seen = MAX(last_seen, ?) WHERE id = ? AND deleted = 0",
        )
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("entity not found: {id}");
        }
        Ok(())
    }

    async fn delete_entity(&self, id: &str) -> anyhow::Result<()> {
        // Soft delete by identifier only; edges stay for history.
        sqlx::query("UPDATE entities SET deleted = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_entity_by_id(&self, id: &str) -> anyhow::Result<Option<Entity>> {
        let row = sqlx::query("SELECT * FROM entities WHERE id = ? AND deleted = 0")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::entity_from_row).transpose()
    }

    async fn find_entities_by_content(
        &self,
        asset: &Asset,
        since: UnixMillis,
    ) -> anyhow::Result<Vec<Entity>> {
        let rows = sqlx::query(
            "SELECT * FROM entities
             WHERE etype = ? AND ekey = ? AND last_seen >= ? AND deleted = 0",
        )
        .bind(asset.asset_type().as_str())
        .bind(asset.key())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::entity_from_row).collect()
    }

    async fn find_entities_by_type(
        &self,
        asset_type: AssetType,
        since: UnixMillis,
    ) -> anyhow::Result<Vec<Entity>> {
        let rows = sqlx::query(
            "SELECT * FROM entities WHERE etype = ? AND last_seen >= ? AND deleted = 0",
        )
        .bind(asset_type.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::entity_from_row).collect()
    }

    async fn link(&self, link: Link) -> anyhow::Result<Edge> {
        let now = now_millis();
        for endpoint in [&link.from_entity, &link.to_entity] {
            let exists =
                sqlx::query("SELECT 1 FROM entities WHERE id = ? AND deleted = 0")
                    .bind(endpoint)
                    .fetch_optional(&self.pool)
                    .await?;
            if exists.is_none() {
                anyhow::bail!("link endpoint not found: {endpoint}");
            }
        }

        let label = link.relation.label().to_string();
        let payload = serde_json::to_string(&link.relation)?;
        let existing = sqlx::query(
            "SELECT id, created_at, last_seen FROM edges
             WHERE from_entity = ? AND to_entity = ? AND label = ? AND deleted = 0",
        )
        .bind(&link.from_entity)
        .bind(&link.to_entity)
        .bind(&label)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            let id: String = row.get("id");
            let created_at: UnixMillis = row.get("created_at");
            let last_seen: UnixMillis = row.get::<UnixMillis, _>("last_seen").max(now);
            sqlx::query("UPDATE edges SET relation = ?, last_seen = ? WHERE id = ?")
                .bind(&payload)
                .bind(last_seen)
                .bind(&id)
                .execute(&self.pool)
                .await?;
            return Ok(Edge {
                id,
                relation: link.relation,
                from_entity: link.from_entity,
                to_entity: link.to_entity,
                created_at,
                last_seen,
            });
        }

        let id = Self::next_id();
        sqlx::query(
            "INSERT INTO edges (id, label, relation, from_entity, to_entity, created_at, last_seen)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&label)
        .bind(&payload)
        .bind(&link.from_entity)
        .bind(&link.to_entity)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(Edge {
            id,
            relation: link.relation,
            from_entity: link.from_entity,
            to_entity: link.to_entity,
            created_at: now,
            last_seen: now,
        })
    }

    async fn incoming_edges(
        &self,
        entity_id: &str,
        since: UnixMillis,
        labels: &[&str],
    ) -> anyhow::Result<Vec<Edge>> {
        self.edges_of("to_entity", entity_id, since, labels).await
    }

    async fn outgoing_edges(
        &self,
        entity_id: &str,
        since: UnixMillis,
        labels: &[&str],
    ) -> anyhow::Result<Vec<Edge>> {
        self.edges_of("from_entity", entity_id, since, labels).await
    }

    async fn delete_edge(&self, id: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE edges SET deleted = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_entity_tag(
        &self,
        entity_id: &str,
        property: Property,
    ) -> anyhow::Result<EntityTag> {
        upsert_tag(
            &self.pool,
            "entity_tags",
            "entity_id",
            entity_id,
            property.clone(),
        )
        .await
        .map(|(id, created_at, last_seen)| EntityTag {
            id,
            property,
            entity_id: entity_id.to_string(),
            created_at,
            last_seen,
        })
    }

    async fn get_entity_tags(
        &self,
        entity_id: &str,
        since: UnixMillis,
        names: &[&str],
    ) -> anyhow::Result<Vec<EntityTag>> {
        let rows = sqlx::query(
            "SELECT * FROM entity_tags
             WHERE entity_id = ? AND last_seen >= ? AND deleted = 0",
        )
        .bind(entity_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        let mut tags = Vec::new();
        for row in &rows {
            let property: Property = serde_json::from_str(row.get::<&str, _>("property"))?;
            if label_matches(property.name(), names) {
                tags.push(EntityTag {
                    id: row.get("id"),
                    property,
                    entity_id: entity_id.to_string(),
                    created_at: row.get("created_at"),
                    last_seen: row.get("last_seen"),
                });
            }
        }
        Ok(tags)
    }

    async fn delete_entity_tag(&self, id: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE entity_tags SET deleted = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_edge_tag(
        &self,
        edge_id: &str,
        property: Property,
    ) -> anyhow::Result<EdgeTag> {
        upsert_tag(&self.pool, "edge_tags", "edge_id", edge_id, property.clone())
            .await
            .map(|(id, created_at, last_seen)| EdgeTag {
                id,
                property,
                edge_id: edge_id.to_string(),
                created_at,
                last_seen,
            })
    }

    async fn get_edge_tags(
        &self,
        edge_id: &str,
        since: UnixMillis,
        names: &[&str],
    ) -> anyhow::Result<Vec<EdgeTag>> {
        let rows = sqlx::query(
            "SELECT * FROM edge_tags WHERE edge_id = ? AND last_seen >= ? AND deleted = 0",
        )
        .bind(edge_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        let mut tags = Vec::new();
        for row in &rows {
            let property: Property = serde_json::from_str(row.get::<&str, _>("property"))?;
            if label_matches(property.name(), names) {
                tags.push(EdgeTag {
                    id: row.get("id"),
                    property,
                    edge_id: edge_id.to_string(),
                    created_at: row.get("created_at"),
                    last_seen: row.get("last_seen"),
                });
            }
        }
        Ok(tags)
    }

    async fn delete_edge_tag(&self, id: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE edge_tags SET deleted = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Shared upsert for the two tag tables; tag identity is
/// (owner, property name, property value). Returns (id, created, last
/// seen).
async fn upsert_tag(
    pool: &SqlitePool,
    table: &str,
    owner_column: &str,
    owner_id: &str,
    property: Property,
) -> anyhow::Result<(String, UnixMillis, UnixMillis)> {
    let now = now_millis();
    let name = property.name().to_string();
    let value = property.value();
    let payload = serde_json::to_string(&property)?;

    let select = format!(
        "SELECT id, created_at, last_seen FROM {table}
         WHERE {owner_column} = ? AND name = ? AND value = ? AND deleted = 0"
    );
    let existing = sqlx::query(&select)
        .bind(owner_id)
        .bind(&name)
        .bind(&value)
        .fetch_optional(pool)
        .await?;

    if let Some(row) = existing {
        let id: String = row.get("id");
        let created_at: UnixMillis = row.get("created_at");
        let last_seen: UnixMillis = row.get::<UnixMillis, _>("last_seen").max(now);
        let update = format!("UPDATE {table} SET property = ?, last_seen = ? WHERE id = ?");
        sqlx::query(&update)
            .bind(&payload)
            .bind(last_seen)
            .bind(&id)
            .execute(pool)
            .await?;
        return Ok((id, created_at, last_seen));
    }

    let id = Uuid::new_v4().to_string();
    let insert = format!(
        "INSERT INTO {table} (id, name, value, property, {owner_column}, created_at, last_seen)
         VALUES (?, ?, ?, ?, ?, ?, ?)"
    );
    sqlx::query(&insert)
        .bind(&id)
        .bind(&name)
        .bind(&value)
        .bind(&payload)
        .bind(owner_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
    Ok((id, now, now))
}
