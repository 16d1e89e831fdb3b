use axum::{Router, routing::get};

use crate::{AppState, handlers};

/// Identity and user administration. The whole router sits behind the
/// authentication middleware (layered in `create_router`), so anonymous
/// callers are rejected with 401 before any handler runs; the /users
/// handlers then gate on the admin predicate for 403.
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(handlers::get_me).patch(handlers::update_me))
        .route(
            "/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        .route(
            "/users/{username}",
            get(handlers::get_user_detail)
                .patch(handlers::update_user)
                .delete(handlers::delete_user),
        )
}
