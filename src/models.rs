use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Core Application Schemas (Mapped to Database) ---

/// Role
///
/// The role ladder for role-based access control. Stored in Postgres as the
/// `user_role` enum type and serialized in lowercase on the wire. The
/// platform-elevated flag on `User` is deliberately *not* part of this enum:
/// role and elevation are two independent authority sources, and the
/// permission predicates evaluate the pair.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, sqlx::Type, Default,
)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    #[default]
    User,
    Moderator,
    Admin,
}

/// User
///
/// Canonical identity record from the `users` table. `email` and `username`
/// are unique across all users (database constraints). The confirmation code
/// is the single active passwordless credential: overwritten on every
/// reissue, never exposed in responses.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    /// Platform staff/superuser flag, orthogonal to `role`.
    pub elevated: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    #[serde(skip_serializing, default)]
    #[ts(skip)]
    #[schema(ignore)]
    pub confirmation_code: Option<String>,
}

/// NewUser
///
/// Insertion payload used internally by the identity store. Split from
/// `User` so the id and defaults are always server-assigned.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub role: Role,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub confirmation_code: Option<String>,
}

/// Category
///
/// A catalog category ("Books", "Films", ...). `name` and `slug` are unique;
/// the slug is the URL-safe lookup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

/// Genre
///
/// Same shape and lifecycle as `Category`, related to titles many-to-many.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Genre {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

/// Title
///
/// Raw database row for a catalogued work. Handlers never return this
/// directly — reads go through `TitleRead`, which resolves the category,
/// genre list and aggregate rating.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct Title {
    pub id: Uuid,
    pub name: String,
    pub year: Option<i32>,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
}

/// TitleRead
///
/// The read view of a title: embeds the resolved category and genres, plus
/// the derived `rating` — the arithmetic mean of the title's review scores,
/// `null` while no reviews exist. The rating is computed by aggregation at
/// query time and never stored.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct TitleRead {
    pub id: Uuid,
    pub name: String,
    pub year: Option<i32>,
    pub description: Option<String>,
    pub rating: Option<f64>,
    pub category: Option<Category>,
    pub genre: Vec<Genre>,
}

/// Review
///
/// Raw review row. At most one review per (title, author) pair — enforced by
/// a database unique constraint, not application logic.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct Review {
    pub id: Uuid,
    pub author_id: Uuid,
    pub title_id: Uuid,
    pub text: String,
    pub score: i16,
    pub pub_date: DateTime<Utc>,
}

/// Comment
///
/// Raw comment row. Cascade-deleted with its parent review and its author.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct Comment {
    pub id: i64,
    pub author_id: Uuid,
    pub review_id: Uuid,
    pub text: String,
    pub pub_date: DateTime<Utc>,
}

/// ReviewRead
///
/// Review response shape, joined with the author's username.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct ReviewRead {
    pub id: Uuid,
    pub author_id: Uuid,
    /// Author's username, loaded via a JOIN in the repository query.
    pub author: String,
    pub text: String,
    pub score: i16,
    #[ts(type = "string")]
    pub pub_date: DateTime<Utc>,
}

/// CommentRead
///
/// Comment response shape, joined with the author's username. Comment ids
/// are a plain i64 sequence — comments are the highest-volume table.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct CommentRead {
    pub id: i64,
    pub author_id: Uuid,
    pub author: String,
    pub text: String,
    #[ts(type = "string")]
    pub pub_date: DateTime<Utc>,
}

// --- Request Payloads (Write Views) ---

/// SendEmailRequest
///
/// Input for POST /auth/email: requests a confirmation code.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct SendEmailRequest {
    pub email: String,
}

/// GetTokenRequest
///
/// Input for POST /auth/token: exchanges (email, code) for a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct GetTokenRequest {
    pub email: String,
    pub confirmation_code: String,
}

/// TokenResponse
///
/// Output of a successful code exchange.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct TokenResponse {
    pub token: String,
}

/// SlugPayload
///
/// Shared write view for categories and genres: a display name plus the
/// unique URL-safe slug.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct SlugPayload {
    pub name: String,
    pub slug: String,
}

/// CreateTitleRequest
///
/// Title write view. Category and genres are referenced by slug and resolved
/// to existing rows; an unknown slug fails the write with Not-Found. A
/// supplied genre list must be non-empty; the category is optional.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateTitleRequest {
    pub name: String,
    pub year: Option<i32>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub genre: Option<Vec<String>>,
}

/// UpdateTitleRequest
///
/// Partial title update: only supplied fields change. `genre`, when present,
/// replaces the whole membership list.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateTitleRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<Vec<String>>,
}

/// CreateReviewRequest
///
/// Review write view. The author is always the acting user and `pub_date`
/// is server-assigned — neither is ever client-supplied.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateReviewRequest {
    pub text: String,
    /// Defaults to 10 when omitted.
    pub score: Option<i16>,
}

/// UpdateReviewRequest
///
/// Partial review update (text and/or score).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateReviewRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i16>,
}

/// CreateCommentRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateCommentRequest {
    pub text: String,
}

/// UpdateCommentRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateCommentRequest {
    pub text: String,
}

/// CreateUserRequest
///
/// Admin-path user creation. This is the only write view that accepts a
/// role — the self-service paths always default to `Role::User`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub role: Option<Role>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
}

/// UpdateUserRequest
///
/// Admin-path partial user update. May change the role (the admin path is
/// the only role-escalation route).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

/// UpdateMeRequest
///
/// Self-service profile update (PATCH /me). Note the absence of `role` and
/// `elevated`: a user can never escalate through this path.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateMeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}
