use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::schema::SCHEMA_VERSION;
use super::{RouteStore, StoreError};
use crate::route::{self, Route, RouteFields};

#[derive(Default)]
struct Inner {
    next_id: i64,
    routes: BTreeMap<i64, Route>,
}

/// Process-local store. Same contract as the persistent backends, nothing
/// survives a restart.
#[derive(Default)]
pub struct MemoryRouteStore {
    inner: Mutex<Inner>,
}

impl MemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn sorted(&self, enabled_only: bool) -> Result<Vec<Route>, StoreError> {
        let inner = self.lock()?;
        let mut routes: Vec<Route> = inner
            .routes
            .values()
            .filter(|r| !enabled_only || r.enabled)
            .cloned()
            .collect();
        routes.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(routes)
    }
}

fn path_taken(inner: &Inner, path: &str, except: Option<i64>) -> bool {
    inner
        .routes
        .values()
        .any(|r| r.path == path && Some(r.id) != except)
}

#[async_trait]
impl RouteStore for MemoryRouteStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ensure_schema(&self) -> Result<u32, StoreError> {
        Ok(SCHEMA_VERSION)
    }

    async fn list(&self) -> Result<Vec<Route>, StoreError> {
        self.sorted(false)
    }

    async fn list_enabled(&self) -> Result<Vec<Route>, StoreError> {
        self.sorted(true)
    }

    async fn get_by_path(&self, path: &str) -> Result<Option<Route>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.routes.values().find(|r| r.path == path).cloned())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Route>, StoreError> {
        Ok(self.lock()?.routes.get(&id).cloned())
    }

    async fn create(&self, fields: &RouteFields) -> Result<Route, StoreError> {
        let fields = fields.validated()?;
        let mut inner = self.lock()?;
        if path_taken(&inner, &fields.path, None) {
            return Err(StoreError::DuplicatePath(fields.path));
        }

        inner.next_id += 1;
        let now = route::now();
        let route = Route {
            id: inner.next_id,
            path: fields.path,
            target_url: fields.target_url,
            enabled: fields.enabled,
            cost: fields.cost,
            auth_header: fields.auth_header,
            is_test: fields.is_test,
            created_at: now,
            updated_at: now,
        };
        inner.routes.insert(route.id, route.clone());
        Ok(route)
    }

    async fn update(&self, id: i64, fields: &RouteFields) -> Result<Route, StoreError> {
        let fields = fields.validated()?;
        let mut inner = self.lock()?;
        if !inner.routes.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        if path_taken(&inner, &fields.path, Some(id)) {
            return Err(StoreError::DuplicatePath(fields.path));
        }

        let route = inner.routes.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        route.updated_at = route::next_update_time(route.updated_at);
        route.path = fields.path;
        route.target_url = fields.target_url;
        route.enabled = fields.enabled;
        route.cost = fields.cost;
        route.auth_header = fields.auth_header;
        route.is_test = fields.is_test;
        Ok(route.clone())
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.lock()?.routes.remove(&id).is_some())
    }
}
