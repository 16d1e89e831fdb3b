use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// ApiError
///
/// The single error taxonomy for the whole request path. Every repository
/// and handler failure maps onto one of these variants, and the
/// `IntoResponse` impl below is the only place where internal error kinds
/// become HTTP status codes:
///
/// Validation → 400, Unauthenticated → 401, Forbidden → 403,
/// NotFound → 404, Conflict → 409, Database → 500.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or out-of-range field. Carries the field name so the
    /// caller gets field-level detail.
    #[error("validation failed on `{field}`: {message}")]
    Validation { field: String, message: String },

    /// Uniqueness violation (duplicate review, duplicate email/username).
    #[error("{0}")]
    Conflict(String),

    /// Unknown id or slug reference.
    #[error("{0}")]
    NotFound(String),

    /// Missing or invalid credentials.
    #[error("authentication required")]
    Unauthenticated,

    /// Authenticated, but the permission predicates rejected the action.
    #[error("permission denied")]
    Forbidden,

    /// Underlying storage failure. Never exposes driver details to callers.
    #[error("database error")]
    Database(#[from] sqlx::Error),

    /// Anything else that should never happen per request (e.g. token
    /// signing failure). Logged, answered as a bare 500.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Shorthand for a field-level validation failure.
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{what} not found"))
    }

    /// Remaps a storage-layer unique-constraint violation to a Conflict with
    /// a caller-meaningful message. The database constraint is the
    /// authoritative enforcement of every uniqueness invariant; this is how
    /// its verdict surfaces.
    pub fn conflict_on_unique(err: sqlx::Error, message: &str) -> Self {
        match &err {
            sqlx::Error::Database(db)
                if db.is_unique_violation() =>
            {
                Self::Conflict(message.to_string())
            }
            _ => Self::Database(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Validation { field, message } => (
                StatusCode::BAD_REQUEST,
                json!({ "field": field, "error": message }),
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "authentication required" }),
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                json!({ "error": "permission denied" }),
            ),
            ApiError::Database(e) => {
                // Log the driver error, answer with a generic body. A failed
                // request must never take the process down or leak internals.
                tracing::error!("database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal error" }),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
