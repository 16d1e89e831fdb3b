use axum::{Router, routing::get};

use crate::{AppState, handlers};

/// The nested user-generated-content tree: reviews under titles, comments
/// under reviews. Reads are public; the create/update/delete handlers take
/// `AuthUser` and run the author/moderator/admin predicate themselves.
pub fn content_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/titles/{title_id}/reviews",
            get(handlers::list_reviews).post(handlers::create_review),
        )
        .route(
            "/titles/{title_id}/reviews/{review_id}",
            get(handlers::get_review_detail)
                .patch(handlers::update_review)
                .delete(handlers::delete_review),
        )
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments",
            get(handlers::list_comments).post(handlers::create_comment),
        )
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
            get(handlers::get_comment_detail)
                .patch(handlers::update_comment)
                .delete(handlers::delete_comment),
        )
}
