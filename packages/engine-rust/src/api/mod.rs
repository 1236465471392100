//! The local GraphQL surface: schema and HTTP server.

mod schema;
mod server;

pub use schema::{build_schema, EngineSchema, MutationRoot, QueryRoot, SubscriptionRoot};
pub use server::ApiServer;
