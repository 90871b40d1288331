use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use x402::FacilitatorClient;

use route_proxy::{
    config::ProxyConfig, cors::build_cors, metrics::register_metrics, payment::FacilitatorVerifier,
    routes, state::AppState, store,
};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ProxyConfig::from_env().map_err(|e| {
        tracing::error!("Failed to load configuration: {e}");
        std::io::Error::other(e)
    })?;
    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();

    tracing::info!("Starting x402-route-proxy on port {}", port);
    tracing::info!("Facilitator URL: {}", config.facilitator_url);
    match config.payee_address {
        Some(address) => tracing::info!("Payee address: {:#x}", address),
        None => tracing::info!("Payee address: none (paid routes fail open)"),
    }
    tracing::info!(
        "Facilitator HMAC auth: {}",
        if config.hmac_secret.is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );

    // Control-plane client for the facilitator and the hosted store; follows
    // no redirects either.
    let service_client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(std::io::Error::other)?;

    // Open the route store, migrate, seed
    let route_store = store::open(&config, service_client.clone()).map_err(|e| {
        tracing::error!("Failed to open route store: {e}");
        std::io::Error::other(e)
    })?;
    if let Err(e) = store::initialize(route_store.as_ref(), &config.default_upstream).await {
        tracing::error!("Failed to initialize route store: {e}");
        return Err(std::io::Error::other(e));
    }

    let facilitator = FacilitatorClient::new(service_client, config.facilitator_url.clone())
        .with_api_key(config.facilitator_api_key.clone())
        .with_hmac_secret(config.hmac_secret.clone())
        .with_timeout(config.facilitator_timeout);
    let verifier = Arc::new(FacilitatorVerifier::new(facilitator));

    // Register Prometheus metrics
    register_metrics();

    // Create shared state
    let state = AppState::new(config, route_store, verifier).map_err(std::io::Error::other)?;

    if !state.gate.has_payee() {
        match state.store.list_enabled().await {
            Ok(routes) => {
                let unpayable = state.gate.unpayable(&routes);
                if !unpayable.is_empty() {
                    let paths: Vec<&str> = unpayable.iter().map(|r| r.path.as_str()).collect();
                    tracing::error!(
                        routes = ?paths,
                        "PAYEE_ADDRESS is not set; paid routes will be served without payment"
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not list routes for payee check"),
        }
    }

    let state_data = web::Data::new(state);

    // Start HTTP server
    HttpServer::new(move || {
        App::new()
            .app_data(state_data.clone())
            .wrap(Logger::default())
            .wrap(build_cors(&allowed_origins))
            .configure(routes::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
