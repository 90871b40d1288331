use actix_web::{web, HttpRequest, HttpResponse};

use crate::error::ProxyError;
use crate::metrics::{NO_MATCH_TOTAL, PROXY_REQUESTS_TOTAL, UPSTREAM_FAILURES_TOTAL};
use crate::payment::GateDecision;
use crate::proxy::forward;
use crate::state::AppState;

/// Catch-all: resolve the route, run the payment gate, forward.
pub async fn handle(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ProxyError> {
    let route = match state.resolver.resolve_request(req.path()).await {
        Ok(route) => route,
        Err(e) => {
            if matches!(e, ProxyError::NoMatch(_)) {
                NO_MATCH_TOTAL.inc();
            }
            return Err(e);
        }
    };

    let settlement = match state.gate.authorize(&req, &route).await {
        GateDecision::Free | GateDecision::FailOpen(_) => None,
        GateDecision::Paid(settlement) => Some(settlement),
        GateDecision::Deny(challenge) => return Ok(challenge.into_response()),
    };

    let result = forward(
        &state.http_client,
        &req,
        payload,
        &route,
        settlement.as_ref(),
        state.config.upstream_timeout,
    )
    .await;

    match result {
        Ok(response) => {
            PROXY_REQUESTS_TOTAL
                .with_label_values(&[route.path.as_str(), response.status().as_str()])
                .inc();
            Ok(response)
        }
        Err(e) => {
            if matches!(e, ProxyError::UpstreamUnavailable(_)) {
                UPSTREAM_FAILURES_TOTAL
                    .with_label_values(&[route.path.as_str()])
                    .inc();
            }
            if matches!(e, ProxyError::InvalidInput(_)) {
                tracing::warn!(
                    method = %req.method(),
                    path = %req.path(),
                    error = %e,
                    "request rejected"
                );
                return Err(e);
            }
            tracing::error!(
                method = %req.method(),
                path = %req.path(),
                upstream = %route.target_url,
                error = %e,
                "forwarding failed"
            );
            Err(e)
        }
    }
}
