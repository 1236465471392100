//! GraphQL endpoint with deferred startup lifecycle.
//!
//! `new()` assembles the schema, `start()` binds the TCP listener, and
//! `serve()` accepts connections until the shutdown future resolves. The
//! split lets the embedder wire shared state between binding and serving,
//! and makes the actual bound port observable for tests using port 0.

use std::sync::Arc;
use std::time::Duration;

use async_graphql_axum::{GraphQL, GraphQLSubscription};
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::schema::{build_schema, EngineSchema};
use crate::engine::Engine;

/// Per-request budget on the HTTP surface.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The local GraphQL API server.
pub struct ApiServer {
    bind: String,
    listener: Option<TcpListener>,
    schema: EngineSchema,
}

impl ApiServer {
    /// Creates the server without binding any port.
    #[must_use]
    pub fn new(engine: Arc<Engine>, bind: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            listener: None,
            schema: build_schema(engine),
        }
    }

    /// Assembles the axum router.
    ///
    /// Routes:
    /// - `POST /graphql` -- queries and mutations
    /// - `GET /graphql/ws` -- subscription transport
    #[must_use]
    pub fn build_router(&self) -> Router {
        // Layer order (outermost first): trace, then per-request timeout.
        let layers = ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

        Router::new()
            .route_service("/graphql", GraphQL::new(self.schema.clone()))
            .route_service("/graphql/ws", GraphQLSubscription::new(self.schema.clone()))
            .layer(layers)
    }

    /// Binds the configured address; returns the actual port (useful with
    /// port 0).
    ///
    /// # Errors
    ///
    /// Returns an error when the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let listener = TcpListener::bind(&self.bind).await?;
        let port = listener.local_addr()?.port();
        info!(bind = %self.bind, port, "GraphQL endpoint bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error on fatal I/O failures, or when `start()` was not
    /// called first.
    pub async fn serve(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router();
        let Some(listener) = self.listener else {
            anyhow::bail!("start() must be called before serve()");
        };
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("GraphQL endpoint stopped");
        Ok(())
    }
}
