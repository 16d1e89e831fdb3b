use axum::{Router, routing::get};

use crate::{AppState, handlers};

/// Catalog taxonomy and titles. Reads are public; writes check the
/// admin-or-read-only predicate inside the handlers, so the authorization
/// failure mode is 403 for a logged-in non-admin and 401 for an anonymous
/// caller (the write handlers take `AuthUser`).
pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/categories",
            get(handlers::list_categories).post(handlers::create_category),
        )
        .route(
            "/categories/{slug}",
            get(handlers::get_category).delete(handlers::delete_category),
        )
        .route(
            "/genres",
            get(handlers::list_genres).post(handlers::create_genre),
        )
        .route(
            "/genres/{slug}",
            get(handlers::get_genre).delete(handlers::delete_genre),
        )
        .route(
            "/titles",
            get(handlers::list_titles).post(handlers::create_title),
        )
        .route(
            "/titles/{id}",
            get(handlers::get_title_detail)
                .patch(handlers::update_title)
                .delete(handlers::delete_title),
        )
}
