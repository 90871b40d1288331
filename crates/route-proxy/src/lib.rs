//! Reconfigurable reverse proxy with x402 pay-per-request gating.
//!
//! Requests are matched by longest path prefix against routes kept in a
//! [`store::RouteStore`], optionally charged through the [`payment`] gate and
//! streamed to the route's upstream by [`proxy::forward`]. Routes are managed
//! at runtime over the admin API in [`routes::admin`].

pub mod config;
pub mod cors;
pub mod error;
pub mod metrics;
pub mod payment;
pub mod proxy;
pub mod resolver;
pub mod route;
pub mod routes;
pub mod state;
pub mod store;

pub use config::ProxyConfig;
pub use error::ProxyError;
pub use route::{Cost, Route, RouteFields};
pub use state::AppState;
pub use store::{RouteStore, StoreError};
