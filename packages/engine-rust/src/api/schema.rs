//! GraphQL schema over the engine: session lifecycle, asset injection,
//! stats, and the structured log stream.

use std::sync::Arc;

use async_graphql::{Context, Json, Object, Schema, SimpleObject, Subscription};
use surveyor_core::Asset;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::dispatch::Event;
use crate::engine::Engine;
use crate::logging::LogRecord;
use crate::repository::Repository;
use crate::session::Session;

/// The assembled schema type.
pub type EngineSchema = Schema<QueryRoot, MutationRoot, SubscriptionRoot>;

/// Builds the schema with the engine injected as context data.
#[must_use]
pub fn build_schema(engine: Arc<Engine>) -> EngineSchema {
    Schema::build(QueryRoot, MutationRoot, SubscriptionRoot)
        .data(engine)
        .finish()
}

/// Resolves a session token or fails the field.
fn session_for(ctx: &Context<'_>, token: &str) -> async_graphql::Result<Arc<Session>> {
    let engine = ctx.data::<Arc<Engine>>()?;
    let id = Uuid::parse_str(token)?;
    engine
        .manager()
        .get(id)
        .ok_or_else(|| async_graphql::Error::new(format!("unknown session token {token}")))
}

/// Work-item counters for one session.
#[derive(SimpleObject)]
pub struct SessionStatsPayload {
    pub work_items_total: u64,
    pub work_items_completed: u64,
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Current work-item counters for a session.
    async fn session_stats(
        &self,
        ctx: &Context<'_>,
        token: String,
    ) -> async_graphql::Result<SessionStatsPayload> {
        let session = session_for(ctx, &token)?;
        Ok(SessionStatsPayload {
            work_items_total: session.stats().work_items_total(),
            work_items_completed: session.stats().work_items_completed(),
        })
    }
}

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    /// Creates a session from the given configuration; returns its token.
    async fn create_session(
        &self,
        ctx: &Context<'_>,
        config: Json<EngineConfig>,
    ) -> async_graphql::Result<String> {
        let engine = ctx.data::<Arc<Engine>>()?;
        let session = engine.launch_session(config.0).await?;
        Ok(session.id().to_string())
    }

    /// Injects one asset into a session and dispatches it.
    async fn create_asset(
        &self,
        ctx: &Context<'_>,
        token: String,
        asset: Json<Asset>,
    ) -> async_graphql::Result<String> {
        let engine = ctx.data::<Arc<Engine>>()?;
        let session = session_for(ctx, &token)?;

        let entity = session.cache().create_entity(asset.0).await?;
        let handle = engine.dispatch_handle();
        handle.dispatch(Event::for_entity(
            entity.clone(),
            Arc::clone(&session),
            handle.clone(),
        ));
        Ok(entity.id)
    }

    /// Cancels a session, draining in-flight work first (bounded).
    async fn terminate_session(
        &self,
        ctx: &Context<'_>,
        token: String,
    ) -> async_graphql::Result<bool> {
        let engine = ctx.data::<Arc<Engine>>()?;
        let id = Uuid::parse_str(&token)?;
        engine.manager().cancel_session(id).await?;
        Ok(true)
    }
}

pub struct SubscriptionRoot;

#[Subscription]
impl SubscriptionRoot {
    /// Streams a session's structured log records.
    async fn subscribe(
        &self,
        ctx: &Context<'_>,
        token: String,
    ) -> async_graphql::Result<impl Stream<Item = Json<LogRecord>>> {
        let session = session_for(ctx, &token)?;
        let receiver = session.subscribe_logs();
        Ok(BroadcastStream::new(receiver).filter_map(|record| record.ok().map(Json)))
    }
}
