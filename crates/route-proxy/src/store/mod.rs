//! Route persistence.
//!
//! [`RouteStore`] is the one contract the rest of the proxy talks to. Three
//! implementations exist: [`SqliteRouteStore`] (embedded file, the default),
//! [`HostedRouteStore`] (a PostgREST/Supabase table) and [`MemoryRouteStore`]
//! (tests). The backend is picked once at startup by [`open`].

mod hosted;
mod memory;
pub mod schema;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ProxyConfig, StoreBackend};
use crate::route::{Route, RouteFields};

pub use hosted::HostedRouteStore;
pub use memory::MemoryRouteStore;
pub use sqlite::SqliteRouteStore;

/// Path of the route seeded into an empty store.
pub const DEFAULT_ROUTE_PATH: &str = "/api";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid route: {0}")]
    InvalidInput(String),

    #[error("a route with path '{0}' already exists")]
    DuplicatePath(String),

    #[error("route {0} not found")]
    NotFound(i64),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("hosted store error: {0}")]
    Hosted(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("route store lock poisoned")]
    LockPoisoned,
}

/// Persistence contract for routes. Listings are ordered by `path` ascending.
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Short backend name for logs and `/health`.
    fn backend(&self) -> &'static str;

    /// Bring the schema up to [`schema::SCHEMA_VERSION`] and return the
    /// version now in place. A no-op when already current.
    async fn ensure_schema(&self) -> Result<u32, StoreError>;

    async fn list(&self) -> Result<Vec<Route>, StoreError>;

    async fn list_enabled(&self) -> Result<Vec<Route>, StoreError>;

    async fn get_by_path(&self, path: &str) -> Result<Option<Route>, StoreError>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Route>, StoreError>;

    async fn create(&self, fields: &RouteFields) -> Result<Route, StoreError>;

    /// Replace every mutable field of route `id`.
    async fn update(&self, id: i64, fields: &RouteFields) -> Result<Route, StoreError>;

    /// Returns `true` iff a route was removed.
    async fn delete(&self, id: i64) -> Result<bool, StoreError>;
}

/// Open the configured backend. Hosted credentials were already checked by
/// the config loader, which falls back to the local file when they are missing.
pub fn open(config: &ProxyConfig, http: reqwest::Client) -> Result<Arc<dyn RouteStore>, StoreError> {
    let store: Arc<dyn RouteStore> = match &config.store {
        StoreBackend::Local { db_path } => {
            Arc::new(SqliteRouteStore::open(db_path, config.store_timeout)?)
        }
        StoreBackend::Hosted { url, api_key } => Arc::new(HostedRouteStore::new(
            http,
            url,
            api_key.clone(),
            config.store_timeout,
        )),
    };
    tracing::info!(backend = store.backend(), "route store opened");
    Ok(store)
}

/// Migrate the schema, then seed the default route if no routes exist.
pub async fn initialize(
    store: &dyn RouteStore,
    default_target: &str,
) -> Result<Option<Route>, StoreError> {
    let version = store.ensure_schema().await?;
    tracing::info!(backend = store.backend(), version, "route store schema ready");
    seed_default_route(store, default_target).await
}

/// Insert `/api -> default_target` when the store is empty. Returns the seeded
/// route, or `None` when routes already exist.
pub async fn seed_default_route(
    store: &dyn RouteStore,
    default_target: &str,
) -> Result<Option<Route>, StoreError> {
    if !store.list().await?.is_empty() {
        return Ok(None);
    }

    match store
        .create(&RouteFields::new(DEFAULT_ROUTE_PATH, default_target))
        .await
    {
        Ok(route) => {
            tracing::info!(
                path = %route.path,
                target = %route.target_url,
                "seeded default route"
            );
            Ok(Some(route))
        }
        // Another instance seeded first.
        Err(StoreError::DuplicatePath(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
