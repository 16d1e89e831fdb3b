use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{
    DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::ApiError,
    models::Role,
    repository::RepositoryState,
};

/// Access tokens are valid for 24 hours from issuance.
const TOKEN_TTL_SECONDS: i64 = 60 * 60 * 24;

/// Claims
///
/// Payload of the signed bearer token minted by the code-exchange endpoint.
/// Signed with the server secret (HS256) and validated on every
/// authenticated request.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user's UUID.
    pub sub: Uuid,
    /// Expiration time. Tokens are rejected past this timestamp.
    pub exp: usize,
    /// Issued-at timestamp.
    pub iat: usize,
}

/// Mints a signed access token bound to the given user identity.
///
/// This is the `IssueToken` capability: expiry plus tamper-evident
/// signature. Verification is the mirror image inside the `AuthUser`
/// extractor.
pub fn issue_token(user_id: Uuid, secret: &str) -> Result<String, ApiError> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id,
        iat: now as usize,
        exp: (now + TOKEN_TTL_SECONDS) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("token signing failed: {e}")))
}

/// AuthUser
///
/// The resolved identity of an authenticated request: everything the
/// permission predicates need (id, role, elevated flag) plus the username
/// for author attribution.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    /// Platform staff/superuser flag, orthogonal to `role`.
    pub elevated: bool,
}

/// AuthUser Extractor
///
/// Implements Axum's `FromRequestParts`, making `AuthUser` usable as a
/// handler argument. Separates authentication (here) from business logic
/// (handlers):
///
/// 1. Bearer token extraction from the Authorization header.
/// 2. JWT decoding and expiry validation against the configured secret.
/// 3. Database lookup, so role changes and deletions take effect
///    immediately rather than at token expiry.
///
/// Rejects with 401 on any failure.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthenticated)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthenticated)?;

        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let token_data = match decode::<Claims>(token, &decoding_key, &validation) {
            Ok(data) => data,
            Err(e) => {
                match e.kind() {
                    // The common case for a valid-but-old token.
                    ErrorKind::ExpiredSignature => return Err(ApiError::Unauthenticated),
                    // Bad signature, malformed token, wrong algorithm, ...
                    _ => return Err(ApiError::Unauthenticated),
                }
            }
        };

        // The token may be valid while the user no longer exists.
        let user = repo
            .get_user(token_data.claims.sub)
            .await?
            .ok_or(ApiError::Unauthenticated)?;

        Ok(AuthUser {
            id: user.id,
            username: user.username,
            role: user.role,
            elevated: user.elevated,
        })
    }
}
