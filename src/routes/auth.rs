use axum::{Router, routing::get, routing::post};

use crate::{AppState, handlers};

/// Liveness probe. No state, no auth.
async fn health_check() -> &'static str {
    "OK"
}

/// The passwordless handshake endpoints plus the health probe. Both auth
/// endpoints are public by nature: they are how a client *becomes*
/// authenticated.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/auth/email", post(handlers::send_confirmation_code))
        .route("/auth/token", post(handlers::get_token))
}
