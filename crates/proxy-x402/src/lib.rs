//! x402 payment protocol types for the route proxy.
//!
//! The proxy plays the *resource server* role of the x402 three-party model:
//!
//! - **Client**: signs a payment authorization and sends it in `X-PAYMENT`
//! - **Resource server** (the proxy): answers 402 with [`PaymentRequirements`]
//!   and hands signed payments to the facilitator
//! - **Facilitator** ([`FacilitatorClient`]): verifies and settles on-chain
//!
//! Prices are USDC amounts handled as integer base units ([`price`]); the
//! network tier (Avalanche Fuji for test routes, Avalanche C-Chain otherwise)
//! is picked with [`Network::for_tier`].

pub mod constants;
pub mod error;
pub mod facilitator_client;
pub mod hmac;
pub mod payment;
pub mod price;
pub mod response;
pub mod security;

pub use constants::*;
pub use error::X402Error;
pub use facilitator_client::{FacilitatorClient, FacilitatorError};
pub use payment::*;
pub use response::*;
