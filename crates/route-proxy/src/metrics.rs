use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::{LazyLock, Once};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Proxy metrics
pub static PROXY_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "proxy_requests_total",
            "Forwarded requests by matched route and upstream status",
        ),
        &["route", "status"],
    )
    .unwrap()
});

pub static NO_MATCH_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "proxy_no_match_total",
        "Requests that matched no enabled route",
    )
    .unwrap()
});

pub static UPSTREAM_FAILURES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "proxy_upstream_failures_total",
            "Upstream connection failures and timeouts per route",
        ),
        &["route"],
    )
    .unwrap()
});

pub static PROXY_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "proxy_upstream_latency_seconds",
            "Time until the upstream returned response headers",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .unwrap()
});

// Payment metrics
pub static PAYMENT_DECISIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "proxy_payment_decisions_total",
            "Payment gate outcomes for paid routes",
        ),
        &["network", "outcome"],
    )
    .unwrap()
});

pub static VERIFIER_UNAVAILABLE_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "proxy_payment_verifier_unavailable_total",
        "Paid requests forwarded without payment because verification could not run",
    )
    .unwrap()
});

// Admin metrics
pub static ROUTE_MUTATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "proxy_route_mutations_total",
            "Route changes made through the admin API",
        ),
        &["operation"],
    )
    .unwrap()
});

static REGISTER: Once = Once::new();

/// Register all metrics with the registry. Safe to call more than once.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(PROXY_REQUESTS_TOTAL.clone()))
            .unwrap();
        REGISTRY.register(Box::new(NO_MATCH_TOTAL.clone())).unwrap();
        REGISTRY
            .register(Box::new(UPSTREAM_FAILURES_TOTAL.clone()))
            .unwrap();
        REGISTRY.register(Box::new(PROXY_LATENCY.clone())).unwrap();
        REGISTRY
            .register(Box::new(PAYMENT_DECISIONS_TOTAL.clone()))
            .unwrap();
        REGISTRY
            .register(Box::new(VERIFIER_UNAVAILABLE_TOTAL.clone()))
            .unwrap();
        REGISTRY
            .register(Box::new(ROUTE_MUTATIONS_TOTAL.clone()))
            .unwrap();
    });
}
