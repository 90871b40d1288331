//! Route administration: CRUD over `/api/routes`.

use actix_web::{error::JsonPayloadError, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use x402::security::bearer_matches;

use crate::error::ProxyError;
use crate::metrics::ROUTE_MUTATIONS_TOTAL;
use crate::route::{Cost, RouteFields};
use crate::state::AppState;

/// Body of POST and PUT. Optional fields take their defaults when omitted,
/// so a PUT is a full replace.
#[derive(Debug, Deserialize)]
pub struct RoutePayload {
    pub path: Option<String>,
    pub target_url: Option<String>,
    pub enabled: Option<bool>,
    #[serde(default, alias = "cost_usdc")]
    pub cost: Option<Cost>,
    pub auth_header: Option<String>,
    pub is_test: Option<bool>,
}

impl RoutePayload {
    pub fn into_fields(self) -> Result<RouteFields, ProxyError> {
        let (Some(path), Some(target_url)) = (
            self.path.filter(|p| !p.trim().is_empty()),
            self.target_url.filter(|t| !t.trim().is_empty()),
        ) else {
            return Err(ProxyError::InvalidInput(
                "Path and target URL are required".to_string(),
            ));
        };
        if !path.starts_with('/') {
            return Err(ProxyError::InvalidInput(
                "Path must start with /".to_string(),
            ));
        }

        let mut fields = RouteFields::new(path, target_url)
            .with_enabled(self.enabled.unwrap_or(true))
            .with_cost(self.cost.unwrap_or_default())
            .with_test_tier(self.is_test.unwrap_or(true));
        fields.auth_header = self.auth_header;
        Ok(fields)
    }
}

fn authorize(req: &HttpRequest, state: &AppState) -> Result<(), ProxyError> {
    let Some(ref expected) = state.config.admin_token else {
        return Ok(());
    };
    let header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());
    if bearer_matches(header, expected) {
        Ok(())
    } else {
        Err(ProxyError::Unauthorized)
    }
}

/// Malformed JSON is a 400 with the usual error body.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(64 * 1024)
        .error_handler(|err: JsonPayloadError, _req| {
            ProxyError::InvalidInput(format!("Invalid JSON body: {err}")).into()
        })
}

/// GET /api/routes
pub async fn list_routes(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ProxyError> {
    authorize(&req, &state)?;
    let routes = state.store.list().await?;
    Ok(HttpResponse::Ok().json(routes))
}

/// GET /api/routes/{id}
pub async fn get_route(
    req: HttpRequest,
    path: web::Path<i64>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ProxyError> {
    authorize(&req, &state)?;
    let id = path.into_inner();
    let route = state
        .store
        .get_by_id(id)
        .await?
        .ok_or(ProxyError::NotFound(id))?;
    Ok(HttpResponse::Ok().json(route))
}

/// POST /api/routes
pub async fn create_route(
    req: HttpRequest,
    body: web::Json<RoutePayload>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ProxyError> {
    authorize(&req, &state)?;
    let fields = body.into_inner().into_fields()?;
    let route = state.store.create(&fields).await?;

    ROUTE_MUTATIONS_TOTAL.with_label_values(&["create"]).inc();
    state.gate.report_unpayable(&route);
    tracing::info!(
        id = route.id,
        path = %route.path,
        target = %route.target_url,
        cost = %route.cost,
        "route created"
    );
    Ok(HttpResponse::Created().json(route))
}

/// PUT /api/routes/{id}
pub async fn update_route(
    req: HttpRequest,
    path: web::Path<i64>,
    body: web::Json<RoutePayload>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ProxyError> {
    authorize(&req, &state)?;
    let id = path.into_inner();
    let fields = body.into_inner().into_fields()?;
    let route = state.store.update(id, &fields).await?;

    ROUTE_MUTATIONS_TOTAL.with_label_values(&["update"]).inc();
    state.gate.report_unpayable(&route);
    tracing::info!(
        id = route.id,
        path = %route.path,
        target = %route.target_url,
        enabled = route.enabled,
        "route updated"
    );
    Ok(HttpResponse::Ok().json(route))
}

/// DELETE /api/routes/{id}
pub async fn delete_route(
    req: HttpRequest,
    path: web::Path<i64>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ProxyError> {
    authorize(&req, &state)?;
    let id = path.into_inner();
    if !state.store.delete(id).await? {
        return Err(ProxyError::NotFound(id));
    }

    ROUTE_MUTATIONS_TOTAL.with_label_values(&["delete"]).inc();
    tracing::info!(id, "route deleted");
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Route deleted successfully"
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/routes")
            .app_data(json_config())
            .route("", web::get().to(list_routes))
            .route("", web::post().to(create_route))
            .route("/{id}", web::get().to(get_route))
            .route("/{id}", web::put().to(update_route))
            .route("/{id}", web::delete().to(delete_route)),
    );
}
