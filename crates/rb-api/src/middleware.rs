//! rusty-board/crates/rb-api/src/middleware.rs Middleware
//!
//! Request logging and CORS shared by both listeners.

use actix_cors::Cors;
use actix_web::middleware::Logger;

/// Access log: remote-ip "request-line" status-code response-size latency.
pub fn standard_middleware() -> Logger {
    Logger::new(r#"%a "%r" %s %b %Dms"#)
}

pub fn cors_policy() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allowed_methods(vec!["GET", "POST"])
        .allow_any_header()
        .max_age(3600)
}
