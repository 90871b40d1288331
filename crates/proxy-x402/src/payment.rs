use alloy::primitives::Address;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::constants::{Network, SCHEME_NAME, USDC_DECIMALS, X402_VERSION};
use crate::error::X402Error;
use crate::price::format_amount;

/// Wire-format payment payload (sent in the `X-PAYMENT` header, base64-encoded JSON).
///
/// The scheme-specific `payload` (signature + EIP-3009 authorization) is opaque
/// to the proxy and handed to the facilitator untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: u32,
    pub scheme: String,
    pub network: String,
    pub payload: serde_json::Value,
}

impl PaymentPayload {
    /// Decode a base64 JSON payment header value.
    pub fn from_header(value: &str) -> Result<Self, X402Error> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(value.trim())
            .map_err(|e| X402Error::InvalidPaymentHeader(format!("not base64: {e}")))?;
        serde_json::from_slice(&decoded)
            .map_err(|e| X402Error::InvalidPaymentHeader(format!("not a payment payload: {e}")))
    }

    pub fn to_header(&self) -> Result<String, X402Error> {
        let json = serde_json::to_vec(self)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }
}

/// A single entry in the `accepts` array of a 402 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    /// Amount in USDC base units (6 decimals), as a decimal string.
    pub max_amount_required: String,
    /// What is being paid for, e.g. `"GET /weather"`.
    pub resource: String,
    pub description: String,
    pub mime_type: String,
    pub pay_to: Address,
    pub max_timeout_seconds: u64,
    pub asset: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl PaymentRequirements {
    /// Requirements for paying `amount` USDC base units on `network` for `resource`.
    pub fn exact_usdc(
        network: Network,
        amount: u64,
        pay_to: Address,
        resource: impl Into<String>,
        max_timeout_seconds: u64,
    ) -> Self {
        let resource = resource.into();
        let (name, version) = network.usdc_domain();
        Self {
            scheme: SCHEME_NAME.to_string(),
            network: network.as_str().to_string(),
            max_amount_required: amount.to_string(),
            description: format!(
                "${} USDC for {resource}",
                format_amount(amount, USDC_DECIMALS)
            ),
            resource,
            mime_type: "application/json".to_string(),
            pay_to,
            max_timeout_seconds,
            asset: network.usdc(),
            extra: Some(serde_json::json!({ "name": name, "version": version })),
        }
    }
}

/// The 402 response body returned by the resource server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredBody {
    pub x402_version: u32,
    pub error: String,
    pub accepts: Vec<PaymentRequirements>,
}

impl PaymentRequiredBody {
    pub fn new(error: impl Into<String>, requirements: PaymentRequirements) -> Self {
        Self {
            x402_version: X402_VERSION,
            error: error.into(),
            accepts: vec![requirements],
        }
    }
}
