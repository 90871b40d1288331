use actix_web::{web, HttpRequest, HttpResponse};
use prometheus::Encoder;
use x402::security::bearer_matches;

use crate::error::ProxyError;
use crate::metrics::REGISTRY;
use crate::state::AppState;

const SERVICE_NAME: &str = "x402-route-proxy";

/// GET /health
///
/// Reads the enabled routes as a store round trip. A store that cannot
/// answer turns the status to `degraded` with a 503.
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let store_reachable = match state.store.list_enabled().await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(
                backend = state.store.backend(),
                error = %e,
                "route store unreachable during health check"
            );
            false
        }
    };

    let mut body = serde_json::json!({
        "status": if store_reachable { "ok" } else { "degraded" },
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "store": state.store.backend(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    if store_reachable {
        HttpResponse::Ok().json(body)
    } else {
        body["store_error"] = "route store unreachable".into();
        HttpResponse::ServiceUnavailable().json(body)
    }
}

/// GET /metrics, behind `METRICS_TOKEN` when one is configured.
pub async fn metrics(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ProxyError> {
    if let Some(token) = state.config.metrics_token.as_deref() {
        let presented = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok());
        if !bearer_matches(presented, token) {
            return Err(ProxyError::Unauthorized);
        }
    }

    let encoder = prometheus::TextEncoder::new();
    let mut exposition = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut exposition)
        .map_err(|e| ProxyError::Internal(format!("metrics encoding: {e}")))?;

    Ok(HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(exposition))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics));
}
