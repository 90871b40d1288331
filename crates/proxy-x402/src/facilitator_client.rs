//! HTTP client for a remote x402 facilitator.
//!
//! The facilitator exposes `POST /verify` and `POST /settle`, both taking
//! `{x402Version, paymentPayload, paymentRequirements}`. The proxy always runs
//! them back to back through [`FacilitatorClient::verify_and_settle`].

use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::constants::X402_VERSION;
use crate::hmac::{compute_hmac, FACILITATOR_AUTH_HEADER};
use crate::payment::{PaymentPayload, PaymentRequirements};
use crate::response::{SettleResponse, VerifyResponse};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Failures of the facilitator call itself, as opposed to a payment that was
/// checked and found invalid (which is a successful call with `success: false`).
#[derive(Debug, Error)]
pub enum FacilitatorError {
    #[error("facilitator request failed: {0}")]
    Transport(String),

    #[error("facilitator rejected our credentials")]
    Unauthorized,

    #[error("facilitator returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("facilitator response parse failed: {0}")]
    InvalidResponse(String),
}

#[derive(Clone)]
pub struct FacilitatorClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    hmac_secret: Option<Vec<u8>>,
    timeout: Duration,
}

impl std::fmt::Debug for FacilitatorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacilitatorClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("hmac_secret", &self.hmac_secret.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl FacilitatorClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            hmac_secret: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Send `Authorization: Bearer <key>` with every facilitator call.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Sign every request body with HMAC-SHA256 in `X-Facilitator-Auth`.
    pub fn with_hmac_secret(mut self, secret: Option<Vec<u8>>) -> Self {
        self.hmac_secret = secret;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, FacilitatorError> {
        self.call("verify", payload, requirements).await
    }

    pub async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, FacilitatorError> {
        self.call("settle", payload, requirements).await
    }

    /// Verify, then settle if the payment is valid.
    ///
    /// An invalid payment comes back as `Ok` with `success: false` and the
    /// facilitator's reason, so callers can tell it apart from an outage.
    pub async fn verify_and_settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, FacilitatorError> {
        let verified = self.verify(payload, requirements).await?;
        if !verified.is_valid {
            return Ok(SettleResponse {
                success: false,
                error_reason: Some(
                    verified
                        .invalid_reason
                        .unwrap_or_else(|| "invalid_payment".to_string()),
                ),
                payer: verified.payer,
                transaction: None,
                network: requirements.network.clone(),
            });
        }
        self.settle(payload, requirements).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<T, FacilitatorError> {
        let url = format!("{}/{}", self.base_url, operation);
        let body = serde_json::json!({
            "x402Version": X402_VERSION,
            "paymentPayload": payload,
            "paymentRequirements": requirements,
        });
        let body_bytes = serde_json::to_vec(&body)
            .map_err(|e| FacilitatorError::Transport(format!("serialization failed: {e}")))?;

        let mut request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .timeout(self.timeout);

        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }
        if let Some(ref secret) = self.hmac_secret {
            request = request.header(FACILITATOR_AUTH_HEADER, compute_hmac(secret, &body_bytes));
        }

        let response = request
            .body(body_bytes)
            .send()
            .await
            .map_err(|e| FacilitatorError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(FacilitatorError::Unauthorized);
        }

        let text = response
            .text()
            .await
            .map_err(|e| FacilitatorError::Transport(format!("failed to read response: {e}")))?;

        // Facilitators answer malformed payments with 400 and a regular
        // verify/settle body; only treat the status as an outage when the body
        // is not one.
        let parsed = serde_json::from_str::<T>(&text);
        if status.is_success() {
            return parsed.map_err(|e| FacilitatorError::InvalidResponse(e.to_string()));
        }
        if status.is_client_error() {
            if let Ok(parsed) = parsed {
                return Ok(parsed);
            }
        }

        tracing::warn!(
            operation,
            status = %status,
            body = %text,
            "facilitator returned non-success response"
        );
        Err(FacilitatorError::Status {
            status: status.as_u16(),
            body: text,
        })
    }
}
