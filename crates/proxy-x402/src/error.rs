use thiserror::Error;

/// Errors returned by x402 wire and pricing operations.
#[derive(Debug, Error)]
pub enum X402Error {
    #[error("invalid price: {0}")]
    InvalidPrice(String),

    #[error("invalid payment header: {0}")]
    InvalidPaymentHeader(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
