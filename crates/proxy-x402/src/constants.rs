use alloy::primitives::{address, Address};

/// x402 protocol version spoken by the proxy.
pub const X402_VERSION: u32 = 1;

/// x402 scheme name for EIP-3009 `transferWithAuthorization` payments.
pub const SCHEME_NAME: &str = "exact";

/// USDC has 6 decimal places on every supported network.
pub const USDC_DECIMALS: u32 = 6;

/// Request header carrying the base64 payment payload.
pub const PAYMENT_HEADER: &str = "X-PAYMENT";

/// Alternate payment header accepted for clients of newer x402 revisions.
pub const PAYMENT_SIGNATURE_HEADER: &str = "PAYMENT-SIGNATURE";

/// Response header carrying the base64 settlement result.
pub const PAYMENT_RESPONSE_HEADER: &str = "X-PAYMENT-RESPONSE";

/// Public facilitator used when none is configured.
pub const DEFAULT_FACILITATOR_URL: &str = "https://x402.org/facilitator";

/// USDC on Avalanche Fuji testnet.
pub const USDC_AVALANCHE_FUJI: Address = address!("5425890298aed601595a70AB815c96711a31Bc65");

/// USDC on Avalanche C-Chain mainnet.
pub const USDC_AVALANCHE: Address = address!("B97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E");

/// Payment network tier. Each route selects one with its `is_test` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    AvalancheFuji,
    Avalanche,
}

impl Network {
    pub fn for_tier(is_test: bool) -> Self {
        if is_test {
            Network::AvalancheFuji
        } else {
            Network::Avalanche
        }
    }

    /// Network identifier as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::AvalancheFuji => "avalanche-fuji",
            Network::Avalanche => "avalanche",
        }
    }

    pub fn usdc(&self) -> Address {
        match self {
            Network::AvalancheFuji => USDC_AVALANCHE_FUJI,
            Network::Avalanche => USDC_AVALANCHE,
        }
    }

    /// EIP-712 domain name/version of the USDC contract, sent as `extra`.
    pub fn usdc_domain(&self) -> (&'static str, &'static str) {
        ("USD Coin", "2")
    }

    pub fn is_test(&self) -> bool {
        matches!(self, Network::AvalancheFuji)
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_selects_network() {
        assert_eq!(Network::for_tier(true), Network::AvalancheFuji);
        assert_eq!(Network::for_tier(false), Network::Avalanche);
        assert_eq!(Network::for_tier(true).as_str(), "avalanche-fuji");
        assert_eq!(Network::for_tier(false).as_str(), "avalanche");
    }

    #[test]
    fn each_network_has_its_own_usdc() {
        assert_ne!(Network::AvalancheFuji.usdc(), Network::Avalanche.usdc());
        assert!(Network::AvalancheFuji.is_test());
        assert!(!Network::Avalanche.is_test());
    }
}
