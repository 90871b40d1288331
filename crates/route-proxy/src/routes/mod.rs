pub mod admin;
pub mod health;
pub mod proxy;

use actix_web::web;

/// Fixed endpoints first; every other path falls through to the proxy.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.configure(health::configure)
        .configure(admin::configure)
        .default_service(web::to(proxy::handle));
}
