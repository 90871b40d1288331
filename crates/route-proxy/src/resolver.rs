//! Longest-prefix route selection.

use std::sync::Arc;

use crate::error::ProxyError;
use crate::route::Route;
use crate::store::RouteStore;

/// Pick the enabled route whose `path` is the longest string prefix of
/// `request_path`.
///
/// Matching is on raw strings, not path segments: `/api2` is matched by a
/// route at `/api`. Equal-length matches are broken by the lower `path`, then
/// the lower `id`.
pub fn resolve<'a>(request_path: &str, routes: &'a [Route]) -> Option<&'a Route> {
    routes
        .iter()
        .filter(|r| r.enabled && request_path.starts_with(r.path.as_str()))
        .max_by(|a, b| {
            a.path
                .len()
                .cmp(&b.path.len())
                .then_with(|| b.path.cmp(&a.path))
                .then_with(|| b.id.cmp(&a.id))
        })
}

/// Resolves requests against the live route set. Holds no cache: every call
/// reads the store, so admin changes apply to the next request.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn RouteStore>,
}

impl Resolver {
    pub fn new(store: Arc<dyn RouteStore>) -> Self {
        Self { store }
    }

    pub async fn resolve_request(&self, request_path: &str) -> Result<Route, ProxyError> {
        let routes = self.store.list_enabled().await?;
        match resolve(request_path, &routes) {
            Some(route) => Ok(route.clone()),
            None => {
                tracing::debug!(path = request_path, "no route matched");
                Err(ProxyError::NoMatch(request_path.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{Cost, RouteFields};
    use crate::store::MemoryRouteStore;

    fn route(id: i64, path: &str, enabled: bool) -> Route {
        let now = chrono::Utc::now();
        Route {
            id,
            path: path.to_string(),
            target_url: format!("http://upstream-{id}"),
            enabled,
            cost: Cost::ZERO,
            auth_header: None,
            is_test: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_longest_prefix_wins() {
        let routes = vec![route(1, "/api", true), route(2, "/api/v2", true)];
        assert_eq!(resolve("/api/v2/orders", &routes).unwrap().id, 2);
        assert_eq!(resolve("/api/v1/orders", &routes).unwrap().id, 1);
        assert_eq!(resolve("/api", &routes).unwrap().id, 1);
    }

    #[test]
    fn test_match_is_not_segment_aware() {
        let routes = vec![route(1, "/api", true)];
        assert_eq!(resolve("/api2", &routes).unwrap().id, 1);
        assert!(resolve("/ap", &routes).is_none());
        assert!(resolve("/other", &routes).is_none());
    }

    #[test]
    fn test_disabled_routes_never_match() {
        let routes = vec![route(1, "/api", true), route(2, "/api/v2", false)];
        assert_eq!(resolve("/api/v2/orders", &routes).unwrap().id, 1);

        let routes = vec![route(1, "/", false)];
        assert!(resolve("/anything", &routes).is_none());
    }

    #[test]
    fn test_tie_break_is_deterministic() {
        // Only reachable when the store lets identical paths through.
        let routes = vec![route(9, "/x", true), route(4, "/x", true)];
        assert_eq!(resolve("/x/y", &routes).unwrap().id, 4);
        let reversed: Vec<Route> = routes.into_iter().rev().collect();
        assert_eq!(resolve("/x/y", &reversed).unwrap().id, 4);
    }

    #[test]
    fn test_root_route_catches_everything() {
        let routes = vec![route(1, "/", true), route(2, "/api", true)];
        assert_eq!(resolve("/favicon.ico", &routes).unwrap().id, 1);
        assert_eq!(resolve("/api/x", &routes).unwrap().id, 2);
    }

    #[actix_rt::test]
    async fn test_resolver_sees_mutations_immediately() {
        let store = Arc::new(MemoryRouteStore::new());
        let resolver = Resolver::new(store.clone());

        assert!(matches!(
            resolver.resolve_request("/api/x").await,
            Err(ProxyError::NoMatch(_))
        ));

        let created = store
            .create(&RouteFields::new("/api", "http://a"))
            .await
            .unwrap();
        assert_eq!(resolver.resolve_request("/api/x").await.unwrap().id, created.id);

        store
            .update(created.id, &created.fields().with_enabled(false))
            .await
            .unwrap();
        assert!(resolver.resolve_request("/api/x").await.is_err());
    }
}
