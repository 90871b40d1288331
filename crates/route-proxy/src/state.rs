use std::sync::Arc;
use std::time::Duration;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::payment::{PaymentGate, SettlementVerifier};
use crate::resolver::Resolver;
use crate::store::RouteStore;

const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub store: Arc<dyn RouteStore>,
    pub resolver: Resolver,
    pub gate: PaymentGate,
    /// Client for upstream traffic only
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: ProxyConfig,
        store: Arc<dyn RouteStore>,
        verifier: Arc<dyn SettlementVerifier>,
    ) -> Result<Self, ProxyError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(UPSTREAM_CONNECT_TIMEOUT.min(config.upstream_timeout))
            .redirect(reqwest::redirect::Policy::none()) // Redirects go back to the client
            .build()
            .map_err(|e| ProxyError::Internal(format!("failed to create HTTP client: {e}")))?;

        let gate = PaymentGate::new(verifier, config.payee_address, config.facilitator_timeout);

        Ok(Self {
            config: Arc::new(config),
            resolver: Resolver::new(store.clone()),
            store,
            gate,
            http_client,
        })
    }
}
