//! # rb-api
//!
//! The web routing and orchestration layer for Rusty-Board.

pub mod error;
pub mod form;
pub mod handlers;
pub mod health;
pub mod middleware;

use actix_web::web;

pub use error::ApiError;
pub use handlers::AppState;
pub use health::{Dependencies, Health};

/// Configures the board, account and readiness routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(handlers::index))
        .route("/ready", web::get().to(handlers::ready))
        .route("/boards", web::get().to(handlers::boards))
        .route("/register", web::post().to(handlers::register))
        .route("/anonregister", web::post().to(handlers::anon_register))
        .route("/login", web::post().to(handlers::login))
        .route("/verify", web::post().to(handlers::verify))
        .route("/thread/all", web::get().to(handlers::all_threads))
        .service(
            web::resource("/thread")
                .route(web::get().to(handlers::get_thread))
                .route(web::post().to(handlers::add_thread)),
        )
        .route("/post", web::post().to(handlers::add_post));
}

/// Liveness check, served on its own port.
pub fn configure_live(cfg: &mut web::ServiceConfig) {
    cfg.route("/live", web::get().to(handlers::live));
}
