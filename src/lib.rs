use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod models;
pub mod permissions;
pub mod repository;
pub mod validation;

// Routing, split by resource family.
pub mod routes;
use auth::AuthUser;
use routes::{auth as auth_routes, catalog, content, users};

// --- Public Re-exports ---

// Core state types for the binary entry point and the test suite.
pub use config::AppConfig;
pub use error::ApiError;
pub use mailer::{HttpMailClient, MailerState, MockMailer};
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};

/// ApiDoc
///
/// Auto-generates the OpenAPI documentation (Swagger JSON) for the service.
/// Aggregates every path decorated with `#[utoipa::path]` and every schema
/// deriving `utoipa::ToSchema`. Served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::send_confirmation_code, handlers::get_token,
        handlers::get_me, handlers::update_me,
        handlers::list_users, handlers::create_user, handlers::get_user_detail,
        handlers::update_user, handlers::delete_user,
        handlers::list_categories, handlers::create_category,
        handlers::get_category, handlers::delete_category,
        handlers::list_genres, handlers::create_genre,
        handlers::get_genre, handlers::delete_genre,
        handlers::list_titles, handlers::create_title, handlers::get_title_detail,
        handlers::update_title, handlers::delete_title,
        handlers::list_reviews, handlers::create_review, handlers::get_review_detail,
        handlers::update_review, handlers::delete_review,
        handlers::list_comments, handlers::create_comment, handlers::get_comment_detail,
        handlers::update_comment, handlers::delete_comment,
    ),
    components(
        schemas(
            models::Role, models::User, models::Category, models::Genre,
            models::TitleRead, models::ReviewRead, models::CommentRead,
            models::SendEmailRequest, models::GetTokenRequest, models::TokenResponse,
            models::SlugPayload, models::CreateTitleRequest, models::UpdateTitleRequest,
            models::CreateReviewRequest, models::UpdateReviewRequest,
            models::CreateCommentRequest, models::UpdateCommentRequest,
            models::CreateUserRequest, models::UpdateUserRequest, models::UpdateMeRequest,
        )
    ),
    tags(
        (name = "reviewdb", description = "Title review and rating API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single, thread-safe, immutable container holding all application
/// services and configuration, shared across every request.
#[derive(Clone)]
pub struct AppState {
    /// Repository layer: all persistent state behind one trait object.
    pub repo: RepositoryState,
    /// Outbound mail for the confirmation-code flow.
    pub mailer: MailerState,
    /// The loaded, immutable environment configuration.
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

// Let extractors pull individual components out of the shared AppState.

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for MailerState {
    fn from_ref(app_state: &AppState) -> MailerState {
        app_state.mailer.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Enforces authentication for the user-management routes.
///
/// *Mechanism*: attempts to extract `AuthUser` from the request. Since
/// `AuthUser` implements `FromRequestParts`, a failed extraction (missing
/// header, bad or expired token, deleted user) rejects the request with 401
/// before the handler runs. On success the request proceeds unchanged.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the full routing structure, applies global and scoped
/// middleware, and registers the application state.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header name constant for request correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        // Documentation: serve the auto-generated Swagger UI.
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Public handshake + health.
        .merge(auth_routes::auth_routes())
        // Catalog and content: public reads, handler-gated writes.
        .merge(catalog::catalog_routes())
        .merge(content::content_routes())
        // Identity routes: nothing here is public, so the whole subtree is
        // behind the authentication middleware.
        .merge(
            users::user_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        )
        .with_state(state);

    // Observability and correlation layers, applied outermost.
    base_router
        .layer(
            ServiceBuilder::new()
                // Unique UUID for every incoming request.
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                // Wrap the request/response lifecycle in a tracing span that
                // carries the request id.
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                // Return the generated x-request-id header to the client.
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Customizes the `TraceLayer` span: includes the `x-request-id` header (if
/// present) alongside the HTTP method and URI, so every log line for one
/// request is correlated by a unique id.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
