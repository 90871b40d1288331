//! Payment gating for routes with a cost.
//!
//! The gate builds the x402 requirement for a request and asks a
//! [`SettlementVerifier`] for a verdict. When the verifier cannot give one
//! (unreachable, erroring, too slow, or no payee configured) the request is
//! let through and the incident is logged and counted.

use std::sync::Arc;
use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse};
use alloy::primitives::Address;
use async_trait::async_trait;
use x402::{
    FacilitatorClient, FacilitatorError, Network, PaymentPayload, PaymentRequiredBody,
    PaymentRequirements, SettleResponse, PAYMENT_HEADER, PAYMENT_SIGNATURE_HEADER,
};

use crate::metrics::{PAYMENT_DECISIONS_TOTAL, VERIFIER_UNAVAILABLE_TOTAL};
use crate::route::Route;

/// Validity window offered to clients for a signed payment.
pub const MAX_TIMEOUT_SECONDS: u64 = 60;

/// A response the verifier wants returned to the client as is.
#[derive(Debug, Clone, PartialEq)]
pub struct Challenge {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}

impl Challenge {
    /// A 402 carrying the x402 `accepts` list.
    pub fn payment_required(body: &PaymentRequiredBody) -> Self {
        let body = serde_json::to_value(body).unwrap_or_else(|e| {
            serde_json::json!({ "error": format!("failed to encode requirements: {e}") })
        });
        Self {
            status: StatusCode::PAYMENT_REQUIRED.as_u16(),
            headers: Vec::new(),
            body,
        }
    }

    pub fn into_response(self) -> HttpResponse {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::PAYMENT_REQUIRED);
        let mut builder = HttpResponse::build(status);
        for (name, value) in self.headers {
            builder.insert_header((name, value));
        }
        builder.json(self.body)
    }
}

#[derive(Debug, Clone)]
pub enum Verdict {
    /// Payment settled; forward the request.
    Allow(SettleResponse),
    /// Payment missing or rejected; answer with the challenge.
    Deny(Challenge),
}

/// The verifier could not reach a verdict.
#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error(transparent)]
    Facilitator(#[from] FacilitatorError),

    #[error("verifier unavailable: {0}")]
    Unavailable(String),
}

/// Decides whether a request has paid `requirements`. `payment` is the raw
/// payment header, if the client sent one.
#[async_trait]
pub trait SettlementVerifier: Send + Sync {
    async fn settle(
        &self,
        payment: Option<&str>,
        requirements: &PaymentRequirements,
    ) -> Result<Verdict, VerifierError>;
}

/// Verifier backed by a remote x402 facilitator.
#[derive(Debug, Clone)]
pub struct FacilitatorVerifier {
    client: FacilitatorClient,
}

impl FacilitatorVerifier {
    pub fn new(client: FacilitatorClient) -> Self {
        Self { client }
    }
}

fn deny(error: impl Into<String>, requirements: &PaymentRequirements) -> Verdict {
    Verdict::Deny(Challenge::payment_required(&PaymentRequiredBody::new(
        error,
        requirements.clone(),
    )))
}

#[async_trait]
impl SettlementVerifier for FacilitatorVerifier {
    async fn settle(
        &self,
        payment: Option<&str>,
        requirements: &PaymentRequirements,
    ) -> Result<Verdict, VerifierError> {
        let Some(raw) = payment else {
            return Ok(deny(
                format!("{PAYMENT_HEADER} header is required"),
                requirements,
            ));
        };

        let payload = match PaymentPayload::from_header(raw) {
            Ok(payload) => payload,
            Err(e) => return Ok(deny(e.to_string(), requirements)),
        };
        if payload.scheme != requirements.scheme || payload.network != requirements.network {
            return Ok(deny(
                format!(
                    "payment is for {}/{}, expected {}/{}",
                    payload.scheme, payload.network, requirements.scheme, requirements.network
                ),
                requirements,
            ));
        }

        let settlement = self.client.verify_and_settle(&payload, requirements).await?;
        if settlement.success {
            Ok(Verdict::Allow(settlement))
        } else {
            let reason = settlement
                .error_reason
                .unwrap_or_else(|| "payment was not settled".to_string());
            Ok(deny(reason, requirements))
        }
    }
}

/// Outcome of the gate for one request.
#[derive(Debug, Clone)]
pub enum GateDecision {
    /// Route has no cost.
    Free,
    Paid(SettleResponse),
    /// Verification could not run; forwarded without payment.
    FailOpen(String),
    Deny(Challenge),
}

#[derive(Clone)]
pub struct PaymentGate {
    verifier: Arc<dyn SettlementVerifier>,
    pay_to: Option<Address>,
    timeout: Duration,
}

impl PaymentGate {
    pub fn new(
        verifier: Arc<dyn SettlementVerifier>,
        pay_to: Option<Address>,
        timeout: Duration,
    ) -> Self {
        Self {
            verifier,
            pay_to,
            timeout,
        }
    }

    pub fn requires_payment(route: &Route) -> bool {
        !route.cost.is_free()
    }

    pub fn has_payee(&self) -> bool {
        self.pay_to.is_some()
    }

    /// Enabled paid routes that will be served for free because no payee is
    /// configured. Empty when a payee is set.
    pub fn unpayable<'a>(&self, routes: &'a [Route]) -> Vec<&'a Route> {
        if self.has_payee() {
            return Vec::new();
        }
        routes
            .iter()
            .filter(|route| route.enabled && Self::requires_payment(route))
            .collect()
    }

    /// Report a paid route that cannot be charged for.
    pub fn report_unpayable(&self, route: &Route) {
        if !self.unpayable(std::slice::from_ref(route)).is_empty() {
            tracing::error!(
                route = %route.path,
                cost = %route.cost,
                "paid route has no payee address configured; it will be served without payment"
            );
        }
    }

    /// Requirement for `METHOD route.path` at the route's price and tier.
    pub fn requirements(route: &Route, method: &str, pay_to: Address) -> PaymentRequirements {
        PaymentRequirements::exact_usdc(
            Network::for_tier(route.is_test),
            route.cost.units(),
            pay_to,
            format!("{method} {}", route.path),
            MAX_TIMEOUT_SECONDS,
        )
    }

    pub async fn authorize(&self, req: &HttpRequest, route: &Route) -> GateDecision {
        if !Self::requires_payment(route) {
            return GateDecision::Free;
        }
        let network = Network::for_tier(route.is_test);

        let Some(pay_to) = self.pay_to else {
            return fail_open(network, route, "no payee address configured".to_string());
        };
        let requirements = Self::requirements(route, req.method().as_str(), pay_to);
        let payment = payment_header(req);

        let outcome = tokio::time::timeout(
            self.timeout,
            self.verifier.settle(payment.as_deref(), &requirements),
        )
        .await;

        match outcome {
            Ok(Ok(Verdict::Allow(settlement))) => {
                tracing::info!(
                    route = %route.path,
                    network = %network,
                    payer = ?settlement.payer,
                    transaction = ?settlement.transaction,
                    "payment settled"
                );
                record(network, "paid");
                GateDecision::Paid(settlement)
            }
            Ok(Ok(Verdict::Deny(challenge))) => {
                tracing::debug!(route = %route.path, status = challenge.status, "payment required");
                record(network, "denied");
                GateDecision::Deny(challenge)
            }
            Ok(Err(e)) => fail_open(network, route, e.to_string()),
            Err(_) => fail_open(
                network,
                route,
                format!("verification timed out after {:?}", self.timeout),
            ),
        }
    }
}

fn fail_open(network: Network, route: &Route, reason: String) -> GateDecision {
    tracing::warn!(
        route = %route.path,
        network = %network,
        reason = %reason,
        "payment verification unavailable, forwarding without payment"
    );
    VERIFIER_UNAVAILABLE_TOTAL.inc();
    record(network, "fail_open");
    GateDecision::FailOpen(reason)
}

fn record(network: Network, outcome: &str) {
    PAYMENT_DECISIONS_TOTAL
        .with_label_values(&[network.as_str(), outcome])
        .inc();
}

/// Raw payment header: `X-PAYMENT`, or `PAYMENT-SIGNATURE` from newer clients.
pub fn payment_header(req: &HttpRequest) -> Option<String> {
    [PAYMENT_HEADER, PAYMENT_SIGNATURE_HEADER]
        .iter()
        .find_map(|name| req.headers().get(*name))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::Cost;
    use actix_web::test::TestRequest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn payee() -> Address {
        "0x1234567890123456789012345678901234567890"
            .parse()
            .unwrap()
    }

    fn route(cost: &str, is_test: bool) -> Route {
        let now = chrono::Utc::now();
        Route {
            id: 1,
            path: "/paid".to_string(),
            target_url: "http://upstream".to_string(),
            enabled: true,
            cost: cost.parse::<Cost>().unwrap(),
            auth_header: None,
            is_test,
            created_at: now,
            updated_at: now,
        }
    }

    enum Behaviour {
        Allow,
        Deny,
        Fail,
        Hang,
    }

    struct StubVerifier {
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl StubVerifier {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SettlementVerifier for StubVerifier {
        async fn settle(
            &self,
            _payment: Option<&str>,
            requirements: &PaymentRequirements,
        ) -> Result<Verdict, VerifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Allow => Ok(Verdict::Allow(SettleResponse {
                    success: true,
                    error_reason: None,
                    payer: Some("0xpayer".to_string()),
                    transaction: Some("0xtx".to_string()),
                    network: requirements.network.clone(),
                })),
                Behaviour::Deny => Ok(deny("nope", requirements)),
                Behaviour::Fail => Err(VerifierError::Unavailable("connection refused".into())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Err(VerifierError::Unavailable("unreachable".into()))
                }
            }
        }
    }

    fn gate(verifier: Arc<StubVerifier>) -> PaymentGate {
        PaymentGate::new(verifier, Some(payee()), Duration::from_millis(100))
    }

    #[test]
    fn test_requirements_follow_route() {
        let req = PaymentGate::requirements(&route("2.50", true), "GET", payee());
        assert_eq!(req.network, "avalanche-fuji");
        assert_eq!(req.max_amount_required, "2500000");
        assert_eq!(req.resource, "GET /paid");
        assert_eq!(req.asset, Network::AvalancheFuji.usdc());

        let req = PaymentGate::requirements(&route("0.01", false), "POST", payee());
        assert_eq!(req.network, "avalanche");
        assert_eq!(req.max_amount_required, "10000");
        assert_eq!(req.resource, "POST /paid");
    }

    #[actix_rt::test]
    async fn test_free_routes_never_reach_verifier() {
        for is_test in [true, false] {
            let verifier = StubVerifier::new(Behaviour::Deny);
            let decision = gate(verifier.clone())
                .authorize(&TestRequest::default().to_http_request(), &route("0", is_test))
                .await;
            assert!(matches!(decision, GateDecision::Free));
            assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
        }
    }

    #[actix_rt::test]
    async fn test_allow_and_deny() {
        let req = TestRequest::default().to_http_request();

        let decision = gate(StubVerifier::new(Behaviour::Allow))
            .authorize(&req, &route("2.50", true))
            .await;
        assert!(matches!(decision, GateDecision::Paid(ref s) if s.network == "avalanche-fuji"));

        let decision = gate(StubVerifier::new(Behaviour::Deny))
            .authorize(&req, &route("2.50", true))
            .await;
        let GateDecision::Deny(challenge) = decision else {
            panic!("expected a denial");
        };
        assert_eq!(challenge.status, 402);
        assert_eq!(challenge.body["accepts"][0]["maxAmountRequired"], "2500000");
    }

    #[actix_rt::test]
    async fn test_fail_open_on_error_timeout_and_missing_payee() {
        let req = TestRequest::default().to_http_request();
        let paid = route("1", true);

        let decision = gate(StubVerifier::new(Behaviour::Fail))
            .authorize(&req, &paid)
            .await;
        assert!(matches!(decision, GateDecision::FailOpen(ref r) if r.contains("refused")));

        let decision = gate(StubVerifier::new(Behaviour::Hang))
            .authorize(&req, &paid)
            .await;
        assert!(matches!(decision, GateDecision::FailOpen(ref r) if r.contains("timed out")));

        let verifier = StubVerifier::new(Behaviour::Deny);
        let no_payee = PaymentGate::new(verifier.clone(), None, Duration::from_secs(1));
        let decision = no_payee.authorize(&req, &paid).await;
        assert!(matches!(decision, GateDecision::FailOpen(_)));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unpayable_only_without_payee() {
        let mut disabled = route("1", true);
        disabled.enabled = false;
        let routes = vec![route("1", true), route("0", true), disabled];

        let with_payee = gate(StubVerifier::new(Behaviour::Allow));
        assert!(with_payee.has_payee());
        assert!(with_payee.unpayable(&routes).is_empty());

        let no_payee =
            PaymentGate::new(StubVerifier::new(Behaviour::Allow), None, Duration::from_secs(1));
        assert!(!no_payee.has_payee());
        let unpayable = no_payee.unpayable(&routes);
        assert_eq!(unpayable.len(), 1);
        assert_eq!(unpayable[0].cost.units(), 1_000_000);
    }

    #[test]
    fn test_payment_header_lookup() {
        let req = TestRequest::default()
            .insert_header(("PAYMENT-SIGNATURE", "abc"))
            .to_http_request();
        assert_eq!(payment_header(&req).as_deref(), Some("abc"));

        let req = TestRequest::default()
            .insert_header(("X-PAYMENT", "xyz"))
            .insert_header(("PAYMENT-SIGNATURE", "abc"))
            .to_http_request();
        assert_eq!(payment_header(&req).as_deref(), Some("xyz"));

        assert!(payment_header(&TestRequest::default().to_http_request()).is_none());
    }

    #[actix_rt::test]
    async fn test_facilitator_verifier_denies_without_header() {
        let client = FacilitatorClient::new(reqwest::Client::new(), "http://127.0.0.1:9");
        let verifier = FacilitatorVerifier::new(client);
        let requirements = PaymentGate::requirements(&route("2.50", true), "GET", payee());

        let Verdict::Deny(challenge) = verifier.settle(None, &requirements).await.unwrap() else {
            panic!("expected a denial");
        };
        assert_eq!(challenge.status, 402);
        assert_eq!(challenge.body["x402Version"], 1);
        assert_eq!(challenge.body["accepts"][0]["network"], "avalanche-fuji");

        let Verdict::Deny(challenge) = verifier
            .settle(Some("%%%not-base64"), &requirements)
            .await
            .unwrap()
        else {
            panic!("expected a denial");
        };
        assert!(challenge.body["error"].as_str().unwrap().contains("base64"));
    }
}
